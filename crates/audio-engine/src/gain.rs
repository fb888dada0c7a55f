//! Volume mapping and the gain stage.
//!
//! Normalized volume `n` in [0, 1] maps to a linear decibel ramp from -40 dB to unity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

pub const MIN_DB: f32 = -40.0;

/// Clamp a user volume into [0, 1]; NaN counts as silence.
pub fn clamp_volume(normalized: f32) -> f32 {
    if normalized.is_nan() {
        0.0
    } else {
        normalized.clamp(0.0, 1.0)
    }
}

/// Attenuation in decibels for a normalized volume.
pub fn volume_db(normalized: f32) -> f32 {
    MIN_DB - MIN_DB * clamp_volume(normalized)
}

/// Linear amplitude factor for a normalized volume.
pub fn volume_gain(normalized: f32) -> f32 {
    10f32.powf(volume_db(normalized) / 20.0)
}

/// Shared volume cell written by the control thread and read by every gain stage.
#[derive(Debug)]
pub struct VolumeLevel {
    normalized: AtomicU32,
}

impl VolumeLevel {
    pub fn new(normalized: f32) -> Self {
        Self {
            normalized: AtomicU32::new(clamp_volume(normalized).to_bits()),
        }
    }

    pub fn shared(normalized: f32) -> Arc<Self> {
        Arc::new(Self::new(normalized))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.normalized.load(Ordering::Relaxed))
    }

    pub fn set(&self, normalized: f32) {
        self.normalized
            .store(clamp_volume(normalized).to_bits(), Ordering::Relaxed);
    }
}

/// Applies the current volume to resampled blocks.
///
/// Holds no per-stream state, so volume changes never require a rebuild.
pub struct GainStage {
    level: Arc<VolumeLevel>,
    cached_normalized: f32,
    cached_gain: f32,
}

impl GainStage {
    pub fn new(level: Arc<VolumeLevel>) -> Self {
        let normalized = level.get();
        Self {
            level,
            cached_normalized: normalized,
            cached_gain: volume_gain(normalized),
        }
    }

    /// Scale `samples` in place by the volume in effect right now.
    pub fn apply(&mut self, samples: &mut [f32]) {
        let normalized = self.level.get();
        if normalized != self.cached_normalized {
            self.cached_normalized = normalized;
            self.cached_gain = volume_gain(normalized);
        }
        if self.cached_gain == 1.0 {
            return;
        }
        for s in samples.iter_mut() {
            *s *= self.cached_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_boundaries_are_exact() {
        assert_eq!(volume_db(0.0), -40.0);
        assert_eq!(volume_db(1.0), 0.0);
        assert_eq!(volume_db(0.5), -20.0);
    }

    #[test]
    fn db_mapping_is_monotonic() {
        let mut prev = volume_db(0.0);
        for i in 1..=1000 {
            let db = volume_db(i as f32 / 1000.0);
            assert!(db >= prev, "dB dropped at step {i}");
            prev = db;
        }
    }

    #[test]
    fn out_of_range_volume_is_clamped() {
        assert_eq!(volume_db(-3.0), -40.0);
        assert_eq!(volume_db(7.0), 0.0);
        assert_eq!(volume_db(f32::NAN), -40.0);
    }

    #[test]
    fn gain_is_unity_at_full_volume_and_hundredth_at_zero() {
        assert_eq!(volume_gain(1.0), 1.0);
        assert!((volume_gain(0.0) - 0.01).abs() < 1e-6);
    }

    #[test]
    fn stage_follows_level_changes_without_rebuild() {
        let level = VolumeLevel::shared(1.0);
        let mut stage = GainStage::new(level.clone());

        let mut block = [0.5f32; 4];
        stage.apply(&mut block);
        assert_eq!(block, [0.5; 4]);

        level.set(0.5);
        let mut block = [1.0f32; 4];
        stage.apply(&mut block);
        assert!(block.iter().all(|s| (*s - 0.1).abs() < 1e-5));
    }

    #[test]
    fn level_stores_clamped_value() {
        let level = VolumeLevel::new(2.0);
        assert_eq!(level.get(), 1.0);
        level.set(-1.0);
        assert_eq!(level.get(), 0.0);
    }
}
