//! Frame/time conversions at the track's native rate.
//!
//! The device rate never enters these computations.

use std::time::Duration;

use crate::error::{PlayerError, Result};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Duration and position for one track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionClock {
    pub sample_rate: u32,
    /// Total frames; 0 when unknown.
    pub length: u64,
}

impl PositionClock {
    pub fn new(sample_rate: u32, length: u64) -> Self {
        Self {
            sample_rate,
            length,
        }
    }

    pub fn is_known(&self) -> bool {
        self.length > 0 && self.sample_rate > 0
    }

    pub fn duration(&self) -> Result<Duration> {
        self.ensure_known()?;
        Ok(frames_to_duration(self.length, self.sample_rate))
    }

    pub fn position(&self, frame: u64) -> Result<Duration> {
        self.ensure_known()?;
        Ok(frames_to_duration(frame.min(self.length - 1), self.sample_rate))
    }

    /// Clamp a signed frame target into `[0, length - 1]`.
    ///
    /// With an unknown length only the lower bound applies.
    pub fn clamp(&self, target: i128) -> u64 {
        let upper = if self.length > 0 {
            i128::from(self.length - 1)
        } else {
            i128::from(u64::MAX)
        };
        target.clamp(0, upper) as u64
    }

    /// Frame for a ratio of the track; `ratio` is clamped to [0, 1] (NaN is 0).
    pub fn ratio_frame(&self, ratio: f64) -> Result<u64> {
        if self.length == 0 {
            return Err(PlayerError::LengthUnknown);
        }
        let ratio = if ratio.is_nan() {
            0.0
        } else {
            ratio.clamp(0.0, 1.0)
        };
        let target = ((self.length - 1) as f64 * ratio).round();
        Ok(self.clamp(target as i128))
    }

    /// Frame reached by moving `delta_ms` from `from`.
    pub fn offset_frame(&self, from: u64, delta_ms: i64) -> u64 {
        let delta = i128::from(delta_ms) * i128::from(self.sample_rate) / 1000;
        self.clamp(i128::from(from) + delta)
    }

    /// Frame at absolute time `at` (rounded down).
    pub fn absolute_frame(&self, at: Duration) -> u64 {
        self.clamp(duration_to_frames(at, self.sample_rate) as i128)
    }

    fn ensure_known(&self) -> Result<()> {
        if self.is_known() {
            Ok(())
        } else {
            Err(PlayerError::LengthUnknown)
        }
    }
}

/// `frames / rate` seconds, exact to the nanosecond (rounded down).
pub fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let rate = u64::from(rate);
    let secs = frames / rate;
    let nanos = u128::from(frames % rate) * NANOS_PER_SEC / u128::from(rate);
    Duration::new(secs, nanos as u32)
}

/// Frames covered by `d` at `rate`, rounded down and saturating.
pub fn duration_to_frames(d: Duration, rate: u32) -> u64 {
    let frames = d.as_nanos() * u128::from(rate) / NANOS_PER_SEC;
    u64::try_from(frames).unwrap_or(u64::MAX)
}
