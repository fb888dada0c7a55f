//! Signal chain for one contiguous segment of a track.
//!
//! A chain owns Decoder stream -> Resampler -> GainStage plus a small local block
//! that the output callback drains frame by frame. It is built on the control
//! thread and handed to the callback whole; a seek builds a new chain rather than
//! touching one the callback may be reading.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use crate::config::EngineConfig;
use crate::decode::{Format, Stream};
use crate::error::Result;
use crate::gain::{GainStage, VolumeLevel};
use crate::output::DeviceClock;
use crate::resample::Resampler;

/// Why a chain stopped producing audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Eof,
    Error,
    Stopped,
}

impl EndReason {
    fn to_u8(self) -> u8 {
        match self {
            Self::Eof => 1,
            Self::Error => 2,
            Self::Stopped => 3,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Eof),
            2 => Some(Self::Error),
            3 => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Progress published by a chain and read by the controller without locking.
#[derive(Debug)]
pub struct SegmentState {
    cursor: AtomicU64,
    end: AtomicU8,
}

impl SegmentState {
    fn new(start_frame: u64) -> Self {
        Self {
            cursor: AtomicU64::new(start_frame),
            end: AtomicU8::new(0),
        }
    }

    /// Native-rate frame index of the next frame the decoder will hand out.
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        EndReason::from_u8(self.end.load(Ordering::Acquire))
    }

    pub(crate) fn mark_end(&self, reason: EndReason) {
        let _ = self
            .end
            .compare_exchange(0, reason.to_u8(), Ordering::AcqRel, Ordering::Relaxed);
    }
}

pub struct Chain {
    resampler: Resampler,
    gain: GainStage,
    channels: usize,
    block: Vec<f32>,
    pos: usize,
    len: usize,
    /// Highest frame index the cursor may report (`length - 1`), when known.
    last_frame: Option<u64>,
    state: Arc<SegmentState>,
}

impl Chain {
    /// Build a chain over `stream`, positioned at `start_frame`.
    ///
    /// `start_frame` must already be clamped to `[0, length - 1]`.
    pub fn build(
        mut stream: Box<dyn Stream>,
        format: &Format,
        start_frame: u64,
        clock: &DeviceClock,
        cfg: &EngineConfig,
        volume: Arc<VolumeLevel>,
    ) -> Result<Box<Self>> {
        if stream.position() != start_frame {
            stream.seek(start_frame)?;
        }
        let last_frame = (format.frames > 0).then(|| format.frames - 1);
        let resampler = Resampler::new(stream, format.sample_rate, clock.rate, cfg.chunk_frames)?;
        let channels = resampler.channels();
        let refill_frames = cfg.refill_max_frames.max(1);
        Ok(Box::new(Self {
            resampler,
            gain: GainStage::new(volume),
            channels,
            block: vec![0.0; refill_frames * channels],
            pos: 0,
            len: 0,
            last_frame,
            state: Arc::new(SegmentState::new(start_frame)),
        }))
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_resampling(&self) -> bool {
        !self.resampler.is_passthrough()
    }

    pub fn state(&self) -> Arc<SegmentState> {
        self.state.clone()
    }

    /// Next interleaved frame at the device rate, or `None` once the chain is exhausted.
    pub fn next_frame(&mut self) -> Option<&[f32]> {
        if self.pos >= self.len && !self.refill() {
            return None;
        }
        let start = self.pos;
        self.pos += self.channels;
        Some(&self.block[start..start + self.channels])
    }

    fn refill(&mut self) -> bool {
        if self.state.end_reason().is_some() {
            return false;
        }
        self.pos = 0;
        self.len = 0;
        match self.resampler.pull(&mut self.block) {
            Ok(0) => {
                self.publish_cursor();
                self.state.mark_end(EndReason::Eof);
                false
            }
            Ok(frames) => {
                self.len = frames * self.channels;
                self.gain.apply(&mut self.block[..self.len]);
                self.publish_cursor();
                true
            }
            Err(_) => {
                self.state.mark_end(EndReason::Error);
                false
            }
        }
    }

    fn publish_cursor(&self) {
        let pos = self.resampler.stream().position();
        let pos = match self.last_frame {
            Some(last) => pos.min(last),
            None => pos,
        };
        self.state.cursor.store(pos, Ordering::Relaxed);
    }
}
