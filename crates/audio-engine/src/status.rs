use serde::Serialize;

use crate::chain::EndReason;
use crate::transport::TransportState;

/// Point-in-time view of the transport and sink, for logs and the CLI `status` command.
#[derive(Clone, Debug, Serialize)]
pub struct PlaybackStatus {
    pub state: TransportState,
    /// Path of the loaded track.
    pub now_playing: Option<String>,
    pub paused: bool,
    /// Current position in milliseconds when the length is known.
    pub elapsed_ms: Option<u64>,
    /// Total track duration in milliseconds when known.
    pub duration_ms: Option<u64>,
    /// Normalized volume in [0, 1].
    pub volume: f32,
    /// Extension-derived container kind (`mp3`, `flac`, ...).
    pub container: Option<String>,
    /// Codec label reported by the decoder.
    pub source_codec: Option<String>,
    pub source_bit_depth: Option<u16>,
    /// Whether the current chain converts between rates.
    pub resampling: Option<bool>,
    pub resample_from_hz: Option<u32>,
    pub resample_to_hz: Option<u32>,
    /// Output device rate and channel count.
    pub sample_rate: u32,
    pub channels: usize,
    /// Chains handed to the output sink since startup.
    pub attaches: u64,
    /// Device frames rendered from chains since startup.
    pub played_frames: u64,
    pub end_reason: Option<EndReason>,
}

impl PlaybackStatus {
    /// One-line summary for terminal output.
    pub fn summary(&self) -> String {
        let track = self.now_playing.as_deref().unwrap_or("-");
        let elapsed = self.elapsed_ms.map(format_ms).unwrap_or_else(|| "--:--".into());
        let total = self.duration_ms.map(format_ms).unwrap_or_else(|| "--:--".into());
        format!(
            "[{:?}] {track} {elapsed}/{total} vol {:.0}%",
            self.state,
            self.volume * 100.0
        )
    }
}

/// Format milliseconds as `m:ss`.
pub fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
