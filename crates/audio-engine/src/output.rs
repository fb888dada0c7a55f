//! Output sink, split into a control half and a real-time half.
//!
//! [`SinkControl`] lives on the control thread and publishes whole chains.
//! [`Renderer`] lives inside the device callback and pulls frames from the chain
//! it currently holds. The two halves only share lock-free channels and atomics:
//! - new chains travel control -> renderer, swapped in between blocks
//! - superseded chains travel renderer -> control and are dropped there
//! - pause and the counters are plain atomics

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::chain::Chain;

/// Fixed output rate and channel count of the opened device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceClock {
    pub rate: u32,
    pub channels: usize,
}

enum SinkMessage {
    Install(Box<Chain>),
    Detach,
}

/// Flags and counters shared by both halves of the sink.
#[derive(Debug, Default)]
pub struct SinkShared {
    paused: AtomicBool,
    attaches: AtomicU64,
    played_frames: AtomicU64,
}

/// Snapshot of [`SinkShared`] counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct SinkCounters {
    pub attaches: u64,
    pub played_frames: u64,
}

/// Create the two halves of an output sink for `clock`.
pub fn sink_pair(clock: DeviceClock) -> (SinkControl, Renderer) {
    let (msg_tx, msg_rx) = crossbeam_channel::unbounded();
    // Unbounded so the callback never has to free a chain itself.
    let (retired_tx, retired_rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(SinkShared {
        paused: AtomicBool::new(true),
        ..SinkShared::default()
    });
    (
        SinkControl {
            clock,
            tx: msg_tx,
            retired: retired_rx,
            shared: shared.clone(),
            outstanding: AtomicUsize::new(0),
        },
        Renderer {
            channels_out: clock.channels.max(1),
            rx: msg_rx,
            retired: retired_tx,
            shared,
            current: None,
        },
    )
}

/// Control-thread half of the sink.
pub struct SinkControl {
    clock: DeviceClock,
    tx: Sender<SinkMessage>,
    retired: Receiver<Box<Chain>>,
    shared: Arc<SinkShared>,
    /// Chains handed to the renderer and not yet given back.
    outstanding: AtomicUsize,
}

impl SinkControl {
    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    /// Hand `chain` to the renderer; it replaces the current one at the next block.
    pub fn install(&self, chain: Box<Chain>) {
        self.shared.attaches.fetch_add(1, Ordering::Relaxed);
        match self.tx.send(SinkMessage::Install(chain)) {
            Ok(()) => {
                self.outstanding.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => tracing::warn!("renderer gone; dropping chain"),
        }
        self.collect_retired();
    }

    /// Ask the renderer to release its chain and go silent.
    pub fn detach(&self) {
        let _ = self.tx.send(SinkMessage::Detach);
        self.collect_retired();
    }

    /// Detach, then wait up to `timeout` for the renderer to give back every
    /// chain it holds and drop them here.
    ///
    /// Returns `false` on timeout; the chains are then dropped by a later
    /// [`collect_retired`](Self::collect_retired).
    pub fn release(&self, timeout: Duration) -> bool {
        self.detach();
        let deadline = Instant::now() + timeout;
        while self.outstanding() > 0 {
            match self.retired.recv_deadline(deadline) {
                Ok(chain) => {
                    drop(chain);
                    self.outstanding.fetch_sub(1, Ordering::Relaxed);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                // Renderer dropped along with whatever it held.
                Err(RecvTimeoutError::Disconnected) => {
                    self.outstanding.store(0, Ordering::Relaxed);
                }
            }
        }
        true
    }

    /// Chains sent to the renderer that have not come back yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// Drop chains the renderer has given back.
    pub fn collect_retired(&self) -> usize {
        let n = self.retired.try_iter().count();
        if n > 0 {
            self.outstanding.fetch_sub(n, Ordering::Relaxed);
        }
        n
    }

    pub fn counters(&self) -> SinkCounters {
        SinkCounters {
            attaches: self.shared.attaches.load(Ordering::Relaxed),
            played_frames: self.shared.played_frames.load(Ordering::Relaxed),
        }
    }
}

/// Real-time half of the sink.
///
/// Never blocks: messages are drained with `try_recv` and superseded chains are
/// sent back on an unbounded channel.
pub struct Renderer {
    channels_out: usize,
    rx: Receiver<SinkMessage>,
    retired: Sender<Box<Chain>>,
    shared: Arc<SinkShared>,
    current: Option<Box<Chain>>,
}

impl Renderer {
    /// Fill interleaved `f32` device frames.
    pub fn render(&mut self, data: &mut [f32]) {
        self.render_with(data, |s| s);
    }

    /// Fill interleaved device frames, converting each `f32` with `to_sample`.
    pub fn render_with<T: Copy>(&mut self, data: &mut [T], to_sample: impl Fn(f32) -> T) {
        self.poll_messages();
        let silence = to_sample(0.0);

        if self.shared.paused.load(Ordering::Relaxed) {
            data.fill(silence);
            return;
        }
        let Some(chain) = self.current.as_mut() else {
            data.fill(silence);
            return;
        };

        let channels_out = self.channels_out;
        let frames = data.len() / channels_out;
        let mut filled_frames = 0usize;
        for frame in 0..frames {
            let out = &mut data[frame * channels_out..(frame + 1) * channels_out];
            match chain.next_frame() {
                Some(src) => {
                    for (ch, slot) in out.iter_mut().enumerate() {
                        *slot = to_sample(map_channel(src, channels_out, ch));
                    }
                    filled_frames += 1;
                }
                None => {
                    // Chain ended; it stays attached and renders silence.
                    data[frame * channels_out..].fill(silence);
                    break;
                }
            }
        }
        data[frames * channels_out..].fill(silence);

        if filled_frames > 0 {
            self.shared
                .played_frames
                .fetch_add(filled_frames as u64, Ordering::Relaxed);
        }
    }

    fn poll_messages(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            let old = match msg {
                SinkMessage::Install(chain) => self.current.replace(chain),
                SinkMessage::Detach => self.current.take(),
            };
            if let Some(old) = old {
                self.retire(old);
            }
        }
    }

    fn retire(&self, chain: Box<Chain>) {
        // Fails only once the control side is gone; the chain is dropped here then.
        let _ = self.retired.send(chain);
    }
}

/// Map one source frame onto destination channel `dst_ch`.
///
/// - mono -> any: duplicate channel 0
/// - stereo -> mono: average L/R
/// - otherwise: clamp to the last available source channel
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (0, _) => 0.0,
        (1, _) => src[0],
        (2, 1) => 0.5 * (src[0] + src[1]),
        (n, _) => src[dst_ch.min(n - 1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::EndReason;
    use crate::config::EngineConfig;
    use crate::decode::{CodecKind, Format, Stream};
    use crate::gain::VolumeLevel;
    use crate::testing::ToneStream;

    const CLOCK: DeviceClock = DeviceClock {
        rate: 44_100,
        channels: 2,
    };

    fn chain(frames: u64, start: u64, volume: Arc<VolumeLevel>) -> Box<Chain> {
        build(Box::new(ToneStream::new(2, frames)), frames, start, volume)
    }

    fn tracked_chain(live: &Arc<AtomicUsize>) -> Box<Chain> {
        let stream = ToneStream::tracked(2, 10_000, live.clone());
        build(Box::new(stream), 10_000, 0, VolumeLevel::shared(1.0))
    }

    fn build(
        stream: Box<dyn Stream>,
        frames: u64,
        start: u64,
        volume: Arc<VolumeLevel>,
    ) -> Box<Chain> {
        let format = Format {
            sample_rate: 44_100,
            frames,
            channels: 2,
            codec: CodecKind::Wav,
            codec_name: None,
            bit_depth: None,
        };
        Chain::build(
            stream,
            &format,
            start,
            &CLOCK,
            &EngineConfig::default(),
            volume,
        )
        .unwrap()
    }

    #[test]
    fn silent_without_chain() {
        let (control, mut renderer) = sink_pair(CLOCK);
        control.set_paused(false);
        let mut data = [1.0f32; 64];
        renderer.render(&mut data);
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(control.counters().played_frames, 0);
    }

    #[test]
    fn paused_renders_silence_and_holds_position() {
        let (control, mut renderer) = sink_pair(CLOCK);
        let c = chain(10_000, 0, VolumeLevel::shared(1.0));
        let state = c.state();
        control.install(c);

        let mut data = [1.0f32; 256];
        renderer.render(&mut data);
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(state.cursor(), 0);

        control.set_paused(false);
        renderer.render(&mut data);
        assert!(data.iter().all(|s| *s == 0.5));
        let advanced = state.cursor();
        assert!(advanced > 0);

        control.set_paused(true);
        renderer.render(&mut data);
        renderer.render(&mut data);
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(state.cursor(), advanced);
    }

    #[test]
    fn volume_change_lands_on_next_block() {
        let volume = VolumeLevel::shared(1.0);
        let (control, mut renderer) = sink_pair(CLOCK);
        control.install(chain(50_000, 0, volume.clone()));
        control.set_paused(false);

        // One render consumes exactly one refill block.
        let refill = EngineConfig::default().refill_max_frames;
        let mut data = vec![0.0f32; refill * 2];
        renderer.render(&mut data);
        assert!(data.iter().all(|s| *s == 0.5));

        volume.set(0.5);
        renderer.render(&mut data);
        assert!(data.iter().all(|s| (*s - 0.05).abs() < 1e-5));
    }

    #[test]
    fn new_chain_replaces_old_between_blocks() {
        let (control, mut renderer) = sink_pair(CLOCK);
        control.set_paused(false);
        let first = chain(10_000, 0, VolumeLevel::shared(1.0));
        let first_state = first.state();
        control.install(first);

        let mut data = [0.0f32; 128];
        renderer.render(&mut data);
        let first_pos = first_state.cursor();

        let second = chain(10_000, 5_000, VolumeLevel::shared(1.0));
        let second_state = second.state();
        control.install(second);
        renderer.render(&mut data);

        assert_eq!(first_state.cursor(), first_pos);
        assert!(second_state.cursor() > 5_000);
        assert_eq!(control.collect_retired(), 1);
        assert_eq!(control.counters().attaches, 2);
    }

    #[test]
    fn detach_returns_chain_and_goes_silent() {
        let (control, mut renderer) = sink_pair(CLOCK);
        control.set_paused(false);
        control.install(chain(10_000, 0, VolumeLevel::shared(1.0)));
        let mut data = [0.0f32; 64];
        renderer.render(&mut data);

        control.detach();
        renderer.render(&mut data);
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(control.collect_retired(), 1);
    }

    #[test]
    fn retired_chains_are_freed_by_control_side_only() {
        let live = Arc::new(AtomicUsize::new(0));
        let (control, mut renderer) = sink_pair(CLOCK);
        control.set_paused(false);
        let mut data = [0.0f32; 64];
        for _ in 0..12 {
            // Bypass `install` so nothing is collected along the way.
            control
                .tx
                .send(SinkMessage::Install(tracked_chain(&live)))
                .unwrap();
            renderer.render(&mut data);
        }
        assert_eq!(live.load(Ordering::SeqCst), 12);
        assert_eq!(control.collect_retired(), 11);
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_waits_for_running_callback() {
        let live = Arc::new(AtomicUsize::new(0));
        let (control, mut renderer) = sink_pair(CLOCK);
        control.set_paused(false);
        control.install(tracked_chain(&live));

        let done = Arc::new(AtomicBool::new(false));
        let callback = {
            let done = done.clone();
            std::thread::spawn(move || {
                let mut data = [0.0f32; 64];
                while !done.load(Ordering::SeqCst) {
                    renderer.render(&mut data);
                    std::thread::sleep(Duration::from_millis(1));
                }
            })
        };

        assert!(control.release(Duration::from_secs(5)));
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert_eq!(control.outstanding(), 0);
        done.store(true, Ordering::SeqCst);
        callback.join().unwrap();
    }

    #[test]
    fn release_times_out_without_callback() {
        let live = Arc::new(AtomicUsize::new(0));
        let (control, mut renderer) = sink_pair(CLOCK);
        control.install(tracked_chain(&live));

        assert!(!control.release(Duration::from_millis(10)));
        assert_eq!(control.outstanding(), 1);
        assert_eq!(live.load(Ordering::SeqCst), 1);

        let mut data = [0.0f32; 64];
        renderer.render(&mut data);
        assert_eq!(control.collect_retired(), 1);
        assert_eq!(control.outstanding(), 0);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn release_returns_at_once_when_renderer_is_gone() {
        let live = Arc::new(AtomicUsize::new(0));
        let (control, renderer) = sink_pair(CLOCK);
        control.install(tracked_chain(&live));
        drop(renderer);

        assert!(control.release(Duration::from_secs(5)));
        assert_eq!(control.outstanding(), 0);
    }

    #[test]
    fn end_of_stream_reports_eof_and_last_frame() {
        let (control, mut renderer) = sink_pair(CLOCK);
        control.set_paused(false);
        let c = chain(1_000, 0, VolumeLevel::shared(1.0));
        let state = c.state();
        control.install(c);

        let mut data = vec![1.0f32; 3_000 * 2];
        renderer.render(&mut data);
        assert!(data[..2_000].iter().all(|s| *s == 0.5));
        assert!(data[2_000..].iter().all(|s| *s == 0.0));
        assert_eq!(state.end_reason(), Some(EndReason::Eof));
        assert_eq!(state.cursor(), 999);

        assert_eq!(control.counters().played_frames, 1_000);
    }

    #[test]
    fn channel_mapping_rules() {
        assert_eq!(map_channel(&[0.3], 2, 1), 0.3);
        assert_eq!(map_channel(&[0.2, 0.4], 1, 0), 0.5 * (0.2 + 0.4));
        assert_eq!(map_channel(&[0.1, 0.2], 2, 1), 0.2);
        assert_eq!(map_channel(&[0.1, 0.2], 6, 4), 0.2);
        assert_eq!(map_channel(&[], 2, 0), 0.0);
    }
}
