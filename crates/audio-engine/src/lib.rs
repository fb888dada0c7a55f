//! Single-track playback engine.
//!
//! Decoder -> Resampler -> GainStage chains rendered by a real-time output sink,
//! driven by a [`TransportController`] behind the [`Engine`] facade.

pub mod chain;
pub mod clock;
pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod gain;
pub mod library;
pub mod meta;
pub mod output;
pub mod resample;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

pub use chain::EndReason;
pub use config::EngineConfig;
pub use device::DeviceHandle;
pub use error::{PlayerError, Result};
pub use status::PlaybackStatus;
pub use transport::{Engine, TransportController, TransportState};
