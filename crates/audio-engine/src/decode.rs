//! Seekable decode stage.
//!
//! Uses Symphonia to:
//! - probe the input container/codec, selected by file extension
//! - decode packets into interleaved `f32` frames on demand
//! - seek accurately to a frame index, discarding pre-roll up to the target

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

use crate::error::{PlayerError, Result};

/// Containers the engine accepts, keyed by file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Mp3,
    Wav,
    Flac,
    Ogg,
}

impl CodecKind {
    /// Select the codec from the path extension (case-insensitive).
    ///
    /// Nothing is opened; unknown or missing extensions fail immediately.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        Self::from_extension(&ext).ok_or(PlayerError::UnsupportedFormat { extension: ext })
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "flac" => Some(Self::Flac),
            "ogg" => Some(Self::Ogg),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
        }
    }
}

/// Format metadata captured while opening a track.
#[derive(Clone, Debug)]
pub struct Format {
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Total frames; 0 when the container does not report a length.
    pub frames: u64,
    pub channels: usize,
    pub codec: CodecKind,
    /// Codec label from the stream parameters (best-effort).
    pub codec_name: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
}

/// A seekable source of interleaved `f32` frames at the native rate.
///
/// Dropping the stream closes the underlying file.
pub trait Stream: Send {
    fn channels(&self) -> usize;

    /// Fill `out` with whole interleaved frames; returns frames written.
    ///
    /// Returns fewer frames than requested only at end of stream.
    fn read(&mut self, out: &mut [f32]) -> Result<usize>;

    /// Jump to `frame`. Callers clamp the target to `[0, length() - 1]`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Total frames, or 0 when unknown.
    fn length(&self) -> u64;

    /// Index of the next frame `read` will return.
    fn position(&self) -> u64;
}

/// Opens tracks for the transport controller.
pub trait TrackOpener: Send {
    fn open(&self, path: &Path, codec: CodecKind) -> Result<(Box<dyn Stream>, Format)>;
}

/// Opens local files through Symphonia.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileOpener;

impl TrackOpener for FileOpener {
    fn open(&self, path: &Path, codec: CodecKind) -> Result<(Box<dyn Stream>, Format)> {
        let (stream, format) = SymphoniaStream::open(path, codec)?;
        Ok((Box::new(stream), format))
    }
}

/// Open `path`, checking the extension before touching the filesystem.
pub fn open(path: &Path) -> Result<(Box<dyn Stream>, Format)> {
    let codec = CodecKind::from_path(path)?;
    FileOpener.open(path, codec)
}

/// Symphonia-backed [`Stream`].
pub struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    time_base: Option<TimeBase>,
    channels: usize,
    frames: u64,
    position: u64,
    /// Frames still to drop after an accurate seek landed before the target.
    skip_frames: u64,
    sample_buf: Option<SampleBuffer<f32>>,
    buf_pos: usize,
    buf_len: usize,
    ended: bool,
}

impl SymphoniaStream {
    pub fn open(path: &Path, codec: CodecKind) -> Result<(Self, Format)> {
        let file = File::open(path).map_err(|source| PlayerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension(codec.extension());

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| PlayerError::Decode("no audio track".to_string()))?;
        let track_id = track.id;
        let codec_params: CodecParameters = track.codec_params.clone();

        let channels = codec_params
            .channels
            .ok_or_else(|| PlayerError::Decode("unknown channels".to_string()))?
            .count();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| PlayerError::Decode("unknown sample rate".to_string()))?;
        let frames = codec_params.n_frames.unwrap_or(0);

        let decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let info = Format {
            sample_rate,
            frames,
            channels,
            codec,
            codec_name: codec_name_from_params(&codec_params),
            bit_depth: codec_params
                .bits_per_sample
                .or(codec_params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
        };

        let stream = Self {
            format,
            decoder,
            track_id,
            sample_rate,
            time_base: codec_params.time_base,
            channels,
            frames,
            position: 0,
            skip_frames: 0,
            sample_buf: None,
            buf_pos: 0,
            buf_len: 0,
            ended: false,
        };
        Ok((stream, info))
    }

    /// Decode the next packet of this track into `sample_buf`.
    ///
    /// Returns `false` at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // Corrupt packet; skip it.
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(SymphoniaError::IoError(_)) => return Ok(false),
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            if spec.channels.count() != self.channels {
                return Err(PlayerError::Decode(format!(
                    "channel count changed mid-stream: {} -> {}",
                    self.channels,
                    spec.channels.count()
                )));
            }
            let needed = decoded.capacity() as u64;
            let reuse = self
                .sample_buf
                .as_ref()
                .is_some_and(|b| b.capacity() as u64 >= needed * self.channels as u64);
            if !reuse {
                self.sample_buf = Some(SampleBuffer::<f32>::new(needed, spec));
            }
            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);
            self.buf_len = buf.samples().len();
            self.buf_pos = 0;

            if self.skip_frames > 0 {
                let have = (self.buf_len / self.channels) as u64;
                let drop = self.skip_frames.min(have);
                self.skip_frames -= drop;
                self.buf_pos = drop as usize * self.channels;
                if self.buf_pos >= self.buf_len {
                    continue;
                }
            }
            return Ok(true);
        }
    }
}

impl Stream for SymphoniaStream {
    fn channels(&self) -> usize {
        self.channels
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let want = out.len() / self.channels;
        let mut filled = 0usize;
        while filled < want && !self.ended {
            if self.buf_pos >= self.buf_len {
                if !self.decode_next()? {
                    self.ended = true;
                    break;
                }
                continue;
            }
            let Some(buf) = self.sample_buf.as_ref() else {
                break;
            };
            let avail = (self.buf_len - self.buf_pos) / self.channels;
            let take = avail.min(want - filled);
            let src = &buf.samples()[self.buf_pos..self.buf_pos + take * self.channels];
            out[filled * self.channels..(filled + take) * self.channels].copy_from_slice(src);
            self.buf_pos += take * self.channels;
            filled += take;
        }
        self.position += filled as u64;
        Ok(filled)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        let ts = frame_to_ts(frame, self.sample_rate, self.time_base);
        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();

        let actual = ts_to_frame(seeked.actual_ts, self.sample_rate, self.time_base);
        let required = ts_to_frame(seeked.required_ts, self.sample_rate, self.time_base);
        self.skip_frames = required.saturating_sub(actual);
        self.position = frame;
        self.buf_pos = 0;
        self.buf_len = 0;
        self.ended = false;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.frames
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Convert a frame index at `rate` into a track timestamp.
///
/// Audio tracks normally use `1/rate` as their time base, in which case this is the identity.
fn frame_to_ts(frame: u64, rate: u32, time_base: Option<TimeBase>) -> u64 {
    match time_base {
        Some(tb) if rate > 0 && !(tb.numer == 1 && tb.denom == rate) && tb.numer > 0 => {
            let ts = u128::from(frame) * u128::from(tb.denom)
                / (u128::from(rate) * u128::from(tb.numer));
            u64::try_from(ts).unwrap_or(u64::MAX)
        }
        _ => frame,
    }
}

fn ts_to_frame(ts: u64, rate: u32, time_base: Option<TimeBase>) -> u64 {
    match time_base {
        Some(tb) if rate > 0 && !(tb.numer == 1 && tb.denom == rate) && tb.denom > 0 => {
            let frame = u128::from(ts) * u128::from(tb.numer) * u128::from(rate)
                / u128::from(tb.denom);
            u64::try_from(frame).unwrap_or(u64::MAX)
        }
        _ => ts,
    }
}

/// Best-effort codec label used for status payloads.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        CODEC_TYPE_PCM_U8 => "PCM_U8",
        _ => return None,
    };
    Some(name.to_string())
}
