use std::path::PathBuf;

use anyhow::Result;
use audio_engine::EngineConfig;
use audio_engine::config::normalize_device_name;
use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "player-cli", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// TOML file with engine settings; flags override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output device sample rate in Hz
    #[arg(long)]
    pub device_rate: Option<u32>,

    /// Output device buffer in milliseconds
    #[arg(long)]
    pub buffer_ms: Option<u32>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Output callback refill cap (frames)
    #[arg(long)]
    pub refill_max_frames: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file with interactive transport commands on stdin
    Play {
        /// Path to an mp3/wav/flac/ogg file
        path: PathBuf,

        /// Initial volume in [0, 1]
        #[arg(long)]
        volume: Option<f32>,
    },

    /// List playable files under a directory
    Scan {
        dir: PathBuf,

        /// Print a JSON array instead of one path per line
        #[arg(long)]
        json: bool,
    },

    /// Print format and tag metadata for a file
    Info {
        path: PathBuf,

        /// Fill gaps from the iTunes Search API
        #[arg(long)]
        online: bool,
    },
}

impl Args {
    /// Engine settings: defaults, then `--config`, then individual flags.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut cfg = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(device) = normalize_device_name(self.device.clone()) {
            cfg.device = Some(device);
        }
        if let Some(rate) = self.device_rate {
            cfg.device_rate = rate;
        }
        if let Some(ms) = self.buffer_ms {
            cfg.buffer_ms = ms;
        }
        if let Some(frames) = self.chunk_frames {
            cfg.chunk_frames = frames;
        }
        if let Some(frames) = self.refill_max_frames {
            cfg.refill_max_frames = frames;
        }
        if let Some(Command::Play {
            volume: Some(volume),
            ..
        }) = &self.cmd
        {
            cfg.volume = *volume;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "player-cli",
            "--device",
            " USB ",
            "--device-rate",
            "48000",
            "play",
            "song.flac",
            "--volume",
            "0.25",
        ]);
        let cfg = args.engine_config().unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB"));
        assert_eq!(cfg.device_rate, 48_000);
        assert_eq!(cfg.buffer_ms, 100);
        assert_eq!(cfg.volume, 0.25);
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::parse_from(["player-cli", "--list-devices"]);
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }

    #[test]
    fn info_accepts_online_flag() {
        let args = Args::parse_from(["player-cli", "info", "a.mp3", "--online"]);
        assert!(matches!(args.cmd, Some(Command::Info { online: true, .. })));
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args = Args::parse_from(["player-cli", "--config", "/no/such/player.toml"]);
        assert!(args.engine_config().is_err());
    }
}
