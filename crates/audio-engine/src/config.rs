//! Engine tuning parameters and TOML loading.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Playback tuning parameters shared by device/resample/render stages.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output device sample rate requested at startup, in Hz.
    pub device_rate: u32,
    /// Output callback buffer target in milliseconds.
    pub buffer_ms: u32,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled from the chain per refill inside the callback.
    pub refill_max_frames: usize,
    /// Initial normalized volume in [0, 1].
    pub volume: f32,
    /// Output device substring match; host default when unset.
    pub device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_rate: 44_100,
            buffer_ms: 100,
            chunk_frames: 1024,
            refill_max_frames: 4096,
            volume: 1.0,
            device: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from disk. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    fn parse(raw: &str) -> Result<Self> {
        let mut cfg = toml::from_str::<EngineConfig>(raw)?;
        cfg.device = normalize_device_name(cfg.device.take());
        Ok(cfg)
    }

    /// Device buffer size in frames for the configured rate.
    pub fn buffer_frames(&self) -> u32 {
        let frames = u64::from(self.device_rate) * u64::from(self.buffer_ms) / 1000;
        u32::try_from(frames).unwrap_or(u32::MAX).max(1)
    }
}

/// Trim a device name and drop it when empty.
pub fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_speaker_setup() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.device_rate, 44_100);
        assert_eq!(cfg.buffer_frames(), 4_410);
        assert_eq!(cfg.volume, 1.0);
    }

    #[test]
    fn parse_fills_missing_keys_with_defaults() {
        let cfg = EngineConfig::parse("device_rate = 48000\ndevice = \"  USB DAC \"\n").unwrap();
        assert_eq!(cfg.device_rate, 48_000);
        assert_eq!(cfg.chunk_frames, 1024);
        assert_eq!(cfg.device.as_deref(), Some("USB DAC"));
    }

    #[test]
    fn parse_drops_blank_device() {
        let cfg = EngineConfig::parse("device = \"   \"").unwrap();
        assert!(cfg.device.is_none());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("read config"));
    }

    #[test]
    fn normalize_device_name_preserves_inner_spaces() {
        assert_eq!(
            normalize_device_name(Some("USB  DAC".to_string())),
            Some("USB  DAC".to_string())
        );
        assert_eq!(normalize_device_name(None), None);
    }
}
