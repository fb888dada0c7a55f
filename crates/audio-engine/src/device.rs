//! Output device discovery, selection and the device handle.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - opening the single output stream that drives a [`Renderer`]

use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::config::EngineConfig;
use crate::error::{PlayerError, Result};
use crate::output::{DeviceClock, Renderer, SinkControl, sink_pair};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> anyhow::Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config closest to `target_rate`.
///
/// Prefers the highest supported rate that is `<= target_rate`, then the lowest
/// rate above it; ties go to the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> anyhow::Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(bool, u32, u8, cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let below = rate <= target_rate;
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_below, b_rate, b_rank, _)) => {
                is_better_candidate(below, rate, format_rank, *b_below, *b_rate, *b_rank)
            }
        };
        if replace {
            best = Some((below, rate, format_rank, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, _, _, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed buffer of `want_frames`, clamped to what the device advertises.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    want_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(want_frames.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn is_better_candidate(
    below: bool,
    rate: u32,
    format_rank: u8,
    best_below: bool,
    best_rate: u32,
    best_rank: u8,
) -> bool {
    if below != best_below {
        below && !best_below
    } else if rate != best_rate {
        if below { rate > best_rate } else { rate < best_rate }
    } else {
        format_rank < best_rank
    }
}

/// Print available output devices to stdout (`--list-devices`).
pub fn list_devices(host: &cpal::Host) -> anyhow::Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// The one open output stream of the process.
///
/// Constructed once by the application. Owns the CPAL stream (which must stay on
/// the thread that created it); the matching [`SinkControl`] is handed back to the
/// caller for the transport controller.
pub struct DeviceHandle {
    _stream: cpal::Stream,
    clock: DeviceClock,
    name: String,
    sample_format: cpal::SampleFormat,
}

impl DeviceHandle {
    /// Open the configured device, start its stream and return the sink's control half.
    pub fn open(cfg: &EngineConfig) -> Result<(Self, SinkControl)> {
        Self::open_inner(cfg).map_err(|e| PlayerError::Device(format!("{e:#}")))
    }

    fn open_inner(cfg: &EngineConfig) -> anyhow::Result<(Self, SinkControl)> {
        let host = cpal::default_host();
        let device = pick_device(&host, cfg.device.as_deref())?;
        let name = device
            .description()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());

        let supported = pick_output_config(&device, cfg.device_rate)?;
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.config();
        let clock = DeviceClock {
            rate: config.sample_rate,
            channels: usize::from(config.channels).max(1),
        };
        let want_frames = EngineConfig {
            device_rate: clock.rate,
            ..cfg.clone()
        }
        .buffer_frames();
        if let Some(size) = pick_buffer_size(&supported, want_frames) {
            config.buffer_size = size;
        }
        if clock.rate != cfg.device_rate {
            tracing::warn!(
                requested = cfg.device_rate,
                actual = clock.rate,
                "device does not support requested rate"
            );
        }

        let (control, renderer) = sink_pair(clock);
        let stream = build_output_stream(&device, &config, sample_format, renderer)?;
        stream.play().context("start output stream")?;

        tracing::info!(
            device = %name,
            rate = clock.rate,
            channels = clock.channels,
            format = ?sample_format,
            buffer = ?config.buffer_size,
            "output device opened"
        );
        Ok((
            Self {
                _stream: stream,
                clock,
                name,
                sample_format,
            },
            control,
        ))
    }

    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_format(&self) -> cpal::SampleFormat {
        self.sample_format
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    renderer: Renderer,
) -> anyhow::Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, renderer),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, renderer),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, renderer),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, renderer),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: Renderer,
) -> anyhow::Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let err_fn = |err| tracing::warn!("stream error: {err}");
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            renderer.render_with(data, |s| <T as cpal::Sample>::from_sample::<f32>(s));
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
