//! Pull-based resample stage.
//!
//! Uses Rubato to convert decoded interleaved `f32` audio from the track's native rate
//! to the device rate. The stage owns its decoder stream and carries interpolation
//! history, so it is only valid for one contiguous run of frames: after any seek the
//! caller builds a fresh instance against the repositioned stream.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler as RubatoResampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction, calculate_cutoff,
};

use crate::decode::Stream;
use crate::error::{PlayerError, Result};

/// Native-rate stream converted to the device rate.
pub struct Resampler {
    stream: Box<dyn Stream>,
    channels: usize,
    mode: Mode,
}

enum Mode {
    /// Native rate already matches the device.
    Passthrough,
    Sinc(Box<SincState>),
}

struct SincState {
    resampler: Async<f32>,
    chunk_frames: usize,
    input: Vec<f32>,
    output: Vec<f32>,
    out_pos: usize,
    out_len: usize,
    indexing: Indexing,
    tail: Tail,
}

/// End-of-stream progress of the sinc stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tail {
    Reading,
    /// Stream ended; feed silence until this many delayed output frames are out.
    Flush(usize),
    Done,
}

impl Resampler {
    /// Wrap `stream` for conversion from `native_rate` to `device_rate`.
    ///
    /// All buffers are allocated here; `pull` does not allocate.
    pub fn new(
        stream: Box<dyn Stream>,
        native_rate: u32,
        device_rate: u32,
        chunk_frames: usize,
    ) -> Result<Self> {
        if native_rate == 0 || device_rate == 0 {
            return Err(PlayerError::Resample(format!(
                "invalid rates {native_rate} -> {device_rate}"
            )));
        }
        let channels = stream.channels().max(1);
        if native_rate == device_rate {
            return Ok(Self {
                stream,
                channels,
                mode: Mode::Passthrough,
            });
        }

        let f_ratio = device_rate as f64 / native_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let chunk_frames = chunk_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| PlayerError::Resample(e.to_string()))?;

        let out_frames = resampler.output_frames_max();
        Ok(Self {
            stream,
            channels,
            mode: Mode::Sinc(Box::new(SincState {
                resampler,
                chunk_frames,
                input: vec![0.0; chunk_frames * channels],
                output: vec![0.0; out_frames * channels],
                out_pos: 0,
                out_len: 0,
                indexing: Indexing {
                    input_offset: 0,
                    output_offset: 0,
                    active_channels_mask: None,
                    partial_len: None,
                },
                tail: Tail::Reading,
            })),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.mode, Mode::Passthrough)
    }

    /// The wrapped decoder stream (read-only; position is advanced by `pull`).
    pub fn stream(&self) -> &dyn Stream {
        self.stream.as_ref()
    }

    /// Fill `out` with interleaved device-rate frames.
    ///
    /// Returns the number of frames written; `0` means the stream is exhausted.
    pub fn pull(&mut self, out: &mut [f32]) -> Result<usize> {
        let channels = self.channels;
        let state = match &mut self.mode {
            Mode::Passthrough => return self.stream.read(out),
            Mode::Sinc(state) => state,
        };

        let want = out.len() / channels;
        let mut filled = 0usize;
        while filled < want {
            if state.out_pos < state.out_len {
                let avail = (state.out_len - state.out_pos) / channels;
                let take = avail.min(want - filled);
                let n = take * channels;
                out[filled * channels..filled * channels + n]
                    .copy_from_slice(&state.output[state.out_pos..state.out_pos + n]);
                state.out_pos += n;
                filled += take;
                continue;
            }

            let mut got = 0usize;
            match state.tail {
                Tail::Done => break,
                Tail::Flush(_) => {}
                Tail::Reading => {
                    while got < state.chunk_frames {
                        let n = self.stream.read(&mut state.input[got * channels..])?;
                        if n == 0 {
                            break;
                        }
                        got += n;
                    }
                    if got < state.chunk_frames {
                        state.tail = Tail::Flush(state.resampler.output_delay().max(1));
                    }
                }
            }
            state.indexing.partial_len = (got < state.chunk_frames).then_some(got);
            state.indexing.input_offset = 0;
            state.indexing.output_offset = 0;

            let input_adapter =
                InterleavedSlice::new(&state.input, channels, state.chunk_frames)
                    .map_err(|e| PlayerError::Resample(e.to_string()))?;
            let out_capacity_frames = state.output.len() / channels;
            let mut output_adapter =
                InterleavedSlice::new_mut(&mut state.output, channels, out_capacity_frames)
                    .map_err(|e| PlayerError::Resample(e.to_string()))?;

            let (_nbr_in, nbr_out) = state
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&state.indexing))
                .map_err(|e| PlayerError::Resample(e.to_string()))?;

            state.out_pos = 0;
            state.out_len = nbr_out * channels;

            // Silence-only chunks push out what the filter still holds.
            if let (0, Tail::Flush(left)) = (got, state.tail) {
                let left = left.saturating_sub(nbr_out.max(1));
                state.tail = if left == 0 { Tail::Done } else { Tail::Flush(left) };
            }
        }
        Ok(filled)
    }
}
