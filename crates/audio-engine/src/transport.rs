//! Transport controller: the single owner of playback state.
//!
//! State machine:
//! - `Empty`: nothing loaded; play/pause/stop are silent no-ops
//! - `Loaded`: chain built but not attached to the sink (implicitly paused)
//! - `Playing` / `Paused`: chain attached, callback pause flag off / on
//!
//! Every discontinuity (seek, stop) reopens the track and builds a fresh chain
//! positioned at the target; the running chain is never patched.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::chain::{Chain, EndReason, SegmentState};
use crate::clock::PositionClock;
use crate::config::EngineConfig;
use crate::decode::{CodecKind, FileOpener, Format, Stream, TrackOpener};
use crate::error::{PlayerError, Result};
use crate::gain::VolumeLevel;
use crate::output::SinkControl;
use crate::status::PlaybackStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Empty,
    Loaded,
    Playing,
    Paused,
}

/// Live state for the loaded track.
struct PlaybackSession {
    path: PathBuf,
    format: Format,
    clock: PositionClock,
    /// Progress of the newest chain (attached or pending).
    segment: Arc<SegmentState>,
    resampling: bool,
    /// Chain built while not yet attached to the sink.
    pending: Option<Box<Chain>>,
    /// Whether the current chain has been handed to the sink.
    started: bool,
    stopped: bool,
}

pub struct TransportController<O: TrackOpener = FileOpener> {
    opener: O,
    sink: SinkControl,
    config: EngineConfig,
    volume: Arc<VolumeLevel>,
    session: Option<PlaybackSession>,
}

impl TransportController<FileOpener> {
    pub fn new(sink: SinkControl, config: EngineConfig) -> Self {
        Self::with_opener(FileOpener, sink, config)
    }
}

impl<O: TrackOpener> TransportController<O> {
    pub fn with_opener(opener: O, sink: SinkControl, config: EngineConfig) -> Self {
        sink.set_paused(true);
        Self {
            opener,
            volume: VolumeLevel::shared(config.volume),
            sink,
            config,
            session: None,
        }
    }

    /// Replace the current track with `path`.
    ///
    /// The previous session is paused, detached and closed before anything new
    /// is opened. On error the controller is left `Empty`.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.teardown();

        let codec = CodecKind::from_path(path)?;
        let (stream, format) = self.opener.open(path, codec)?;
        let clock = PositionClock::new(format.sample_rate, stream.length());
        let chain = Chain::build(
            stream,
            &format,
            0,
            self.sink.clock(),
            &self.config,
            self.volume.clone(),
        )?;

        tracing::info!(
            path = %path.display(),
            codec = codec.extension(),
            rate = format.sample_rate,
            frames = clock.length,
            channels = format.channels,
            resampling = chain.is_resampling(),
            "track loaded"
        );
        self.session = Some(PlaybackSession {
            path: path.to_path_buf(),
            format,
            clock,
            segment: chain.state(),
            resampling: chain.is_resampling(),
            pending: Some(chain),
            started: false,
            stopped: false,
        });
        Ok(())
    }

    /// Start or resume playback. The chain is attached on the first call after
    /// a load or stop; later calls only unpause.
    pub fn play(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.started {
            if let Some(chain) = session.pending.take() {
                self.sink.install(chain);
            }
            session.started = true;
            tracing::debug!(path = %session.path.display(), "chain attached");
        }
        session.stopped = false;
        self.sink.set_paused(false);
    }

    pub fn pause(&mut self) {
        if self.session.is_some() {
            self.sink.set_paused(true);
        }
    }

    /// Pause, detach and rewind to frame 0, leaving the track `Loaded`.
    pub fn stop(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        self.sink.set_paused(true);
        if session.started {
            if !self.sink.release(release_timeout(&self.config)) {
                tracing::warn!(
                    path = %session.path.display(),
                    "output callback still holds the previous stream"
                );
            }
            session.started = false;
        }
        session.segment.mark_end(EndReason::Stopped);
        session.stopped = true;
        if let Err(err) = self.rebuild(0) {
            tracing::warn!(error = %err, "rewind failed; unloading track");
            self.teardown();
        }
    }

    /// Seek to `ratio` of the track (clamped to [0, 1]).
    pub fn seek_ratio(&mut self, ratio: f64) -> Result<()> {
        let session = self.session.as_ref().ok_or(PlayerError::NoActiveStream)?;
        let target = session.clock.ratio_frame(ratio)?;
        self.rebuild(target)
    }

    /// Seek relative to the current position by `delta_ms` milliseconds.
    pub fn seek_by(&mut self, delta_ms: i64) -> Result<()> {
        let session = self.session.as_ref().ok_or(PlayerError::NoActiveStream)?;
        let target = session
            .clock
            .offset_frame(session.segment.cursor(), delta_ms);
        self.rebuild(target)
    }

    /// Seek to an absolute time from the start of the track.
    pub fn seek_to(&mut self, at: Duration) -> Result<()> {
        let session = self.session.as_ref().ok_or(PlayerError::NoActiveStream)?;
        let target = session.clock.absolute_frame(at);
        self.rebuild(target)
    }

    pub fn current_file(&self) -> Result<&Path> {
        self.session
            .as_ref()
            .map(|s| s.path.as_path())
            .ok_or(PlayerError::NoActiveStream)
    }

    pub fn is_playing(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.started && !self.sink.is_paused())
    }

    pub fn state(&self) -> TransportState {
        match &self.session {
            None => TransportState::Empty,
            Some(s) if !s.started => TransportState::Loaded,
            Some(_) if self.sink.is_paused() => TransportState::Paused,
            Some(_) => TransportState::Playing,
        }
    }

    pub fn duration(&self) -> Result<Duration> {
        self.session()?.clock.duration()
    }

    pub fn position(&self) -> Result<Duration> {
        let session = self.session()?;
        session.clock.position(session.segment.cursor())
    }

    /// Current frame index at the native rate.
    pub fn position_frame(&self) -> Result<u64> {
        Ok(self.session()?.segment.cursor())
    }

    /// Format of the loaded track.
    pub fn track(&self) -> Result<&Format> {
        Ok(&self.session()?.format)
    }

    /// Takes effect on the next block the sink pulls; persists across loads.
    pub fn set_volume(&mut self, normalized: f32) {
        self.volume.set(normalized);
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Whether the attached chain has run out of frames.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.end_reason(),
            Some(EndReason::Eof) | Some(EndReason::Error)
        )
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        let session = self.session.as_ref()?;
        if session.stopped {
            return Some(EndReason::Stopped);
        }
        session.segment.end_reason()
    }

    pub fn status(&self) -> PlaybackStatus {
        let clock = self.sink.clock();
        let counters = self.sink.counters();
        let session = self.session.as_ref();
        PlaybackStatus {
            state: self.state(),
            now_playing: session.map(|s| s.path.display().to_string()),
            paused: self.sink.is_paused(),
            elapsed_ms: self.position().ok().map(|d| d.as_millis() as u64),
            duration_ms: self.duration().ok().map(|d| d.as_millis() as u64),
            volume: self.volume(),
            container: session.map(|s| s.format.codec.extension().to_string()),
            source_codec: session.and_then(|s| s.format.codec_name.clone()),
            source_bit_depth: session.and_then(|s| s.format.bit_depth),
            resampling: session.map(|s| s.resampling),
            resample_from_hz: session.map(|s| s.format.sample_rate),
            resample_to_hz: session.map(|_| clock.rate),
            sample_rate: clock.rate,
            channels: clock.channels,
            attaches: counters.attaches,
            played_frames: counters.played_frames,
            end_reason: self.end_reason(),
        }
    }

    fn session(&self) -> Result<&PlaybackSession> {
        self.session.as_ref().ok_or(PlayerError::NoActiveStream)
    }

    /// Build a new chain at `target` and make it current.
    ///
    /// If the session is attached the chain is published to the sink; otherwise
    /// it replaces the pending chain. Pause state and volume are untouched.
    fn rebuild(&mut self, target: u64) -> Result<()> {
        let session = self.session.as_mut().ok_or(PlayerError::NoActiveStream)?;
        let (stream, format) = self.opener.open(&session.path, session.format.codec)?;
        let chain = Chain::build(
            stream,
            &format,
            target,
            self.sink.clock(),
            &self.config,
            self.volume.clone(),
        )?;
        tracing::debug!(
            path = %session.path.display(),
            frame = target,
            attached = session.started,
            "segment rebuilt"
        );
        session.segment = chain.state();
        if session.started {
            session.stopped = false;
            session.pending = None;
            self.sink.install(chain);
        } else {
            session.pending = Some(chain);
        }
        Ok(())
    }

    /// Drop the session and wait for the callback to give back its chain, so
    /// the old stream is closed before anything else is opened.
    fn teardown(&mut self) {
        self.sink.set_paused(true);
        if let Some(session) = self.session.take() {
            let held = self.sink.outstanding() > 0;
            if held && !self.sink.release(release_timeout(&self.config)) {
                tracing::warn!(
                    path = %session.path.display(),
                    "output callback still holds the previous stream"
                );
            }
            tracing::info!(path = %session.path.display(), "track unloaded");
        }
        self.sink.collect_retired();
    }

    /// Drop chains the callback has already given back.
    fn reap(&self) {
        self.sink.collect_retired();
    }
}

/// Two device buffers: the callback swaps chains at the start of each one.
fn release_timeout(config: &EngineConfig) -> Duration {
    Duration::from_millis(2 * u64::from(config.buffer_ms.max(10)))
}

/// Thread-safe facade: every operation runs under one controller mutex.
pub struct Engine<O: TrackOpener = FileOpener> {
    inner: Mutex<TransportController<O>>,
}

impl Engine<FileOpener> {
    pub fn new(sink: SinkControl, config: EngineConfig) -> Self {
        Self::from_controller(TransportController::new(sink, config))
    }
}

impl<O: TrackOpener> Engine<O> {
    pub fn from_controller(controller: TransportController<O>) -> Self {
        Self {
            inner: Mutex::new(controller),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransportController<O>> {
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.reap();
        guard
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        self.lock().load(path.as_ref())
    }

    pub fn play(&self) {
        self.lock().play();
    }

    pub fn pause(&self) {
        self.lock().pause();
    }

    pub fn stop(&self) {
        self.lock().stop();
    }

    pub fn seek_ratio(&self, ratio: f64) -> Result<()> {
        self.lock().seek_ratio(ratio)
    }

    pub fn seek_by(&self, delta_ms: i64) -> Result<()> {
        self.lock().seek_by(delta_ms)
    }

    pub fn seek_to(&self, at: Duration) -> Result<()> {
        self.lock().seek_to(at)
    }

    pub fn current_file(&self) -> Result<PathBuf> {
        self.lock().current_file().map(Path::to_path_buf)
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_playing()
    }

    pub fn state(&self) -> TransportState {
        self.lock().state()
    }

    pub fn duration(&self) -> Result<Duration> {
        self.lock().duration()
    }

    pub fn position(&self) -> Result<Duration> {
        self.lock().position()
    }

    pub fn set_volume(&self, normalized: f32) {
        self.lock().set_volume(normalized);
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume()
    }

    pub fn is_finished(&self) -> bool {
        self.lock().is_finished()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.lock().end_reason()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.lock().status()
    }
}
