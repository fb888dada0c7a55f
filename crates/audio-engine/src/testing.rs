//! Test fixtures: in-memory streams and generated WAV files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::decode::{CodecKind, Format, Stream, TrackOpener};
use crate::error::{PlayerError, Result};

/// Constant-valued stream: every sample is `0.5`, so gain is easy to check
/// before and after resampling.
pub(crate) struct ToneStream {
    channels: usize,
    frames: u64,
    position: u64,
    /// Count of streams alive; decremented on drop.
    live: Option<Arc<AtomicUsize>>,
}

impl ToneStream {
    pub(crate) fn new(channels: usize, frames: u64) -> Self {
        Self {
            channels,
            frames,
            position: 0,
            live: None,
        }
    }

    pub(crate) fn tracked(channels: usize, frames: u64, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            channels,
            frames,
            position: 0,
            live: Some(live),
        }
    }
}

impl Drop for ToneStream {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Stream for ToneStream {
    fn channels(&self) -> usize {
        self.channels
    }

    fn read(&mut self, out: &mut [f32]) -> Result<usize> {
        let want = (out.len() / self.channels) as u64;
        let left = self.frames.saturating_sub(self.position);
        let take = want.min(left) as usize;
        out[..take * self.channels].fill(0.5);
        self.position += take as u64;
        Ok(take)
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        assert!(
            self.frames == 0 || frame < self.frames,
            "seek target {frame} must be clamped below {}",
            self.frames
        );
        self.position = frame;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.frames
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Opener that hands out [`ToneStream`]s and records every open.
#[derive(Clone)]
pub(crate) struct ToneOpener {
    pub(crate) sample_rate: u32,
    pub(crate) frames: u64,
    pub(crate) channels: usize,
    pub(crate) opens: Arc<AtomicUsize>,
    pub(crate) opened_paths: Arc<Mutex<Vec<PathBuf>>>,
    /// Streams handed out and not yet dropped.
    pub(crate) live: Arc<AtomicUsize>,
    /// `live` as seen at the start of each successful open.
    pub(crate) live_at_open: Arc<Mutex<Vec<usize>>>,
}

impl ToneOpener {
    pub(crate) fn new(sample_rate: u32, frames: u64) -> Self {
        Self {
            sample_rate,
            frames,
            channels: 2,
            opens: Arc::new(AtomicUsize::new(0)),
            opened_paths: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicUsize::new(0)),
            live_at_open: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl TrackOpener for ToneOpener {
    fn open(&self, path: &Path, codec: CodecKind) -> Result<(Box<dyn Stream>, Format)> {
        if path.to_string_lossy().contains("missing") {
            return Err(PlayerError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.opened_paths.lock().unwrap().push(path.to_path_buf());
        self.live_at_open
            .lock()
            .unwrap()
            .push(self.live.load(Ordering::SeqCst));
        let format = Format {
            sample_rate: self.sample_rate,
            frames: self.frames,
            channels: self.channels,
            codec,
            codec_name: None,
            bit_depth: Some(16),
        };
        Ok((
            Box::new(ToneStream::tracked(
                self.channels,
                self.frames,
                self.live.clone(),
            )),
            format,
        ))
    }
}

/// Write a 16-bit PCM WAV file with a quiet ramp.
pub(crate) fn write_wav_i16(path: &Path, rate: u32, channels: u16, frames: u32) {
    let block_align = channels * 2;
    let data_len = frames * u32::from(block_align);
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames {
        let v = ((i % 256) as i16 - 128) * 8;
        for _ in 0..channels {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(&bytes).unwrap();
}
