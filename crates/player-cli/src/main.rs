//! player-cli: play one local track at a time through the default (or chosen)
//! output device.
//!
//! The engine decodes, resamples to the device rate and applies volume on the
//! device's callback thread. This binary only owns the device handle and turns
//! stdin lines into transport calls.

mod cli;
mod repl;

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use audio_engine::meta::{ItunesClient, read_tags};
use audio_engine::{DeviceHandle, Engine, EngineConfig, EndReason};
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_engine=info")
        }))
        .init();

    if args.list_devices {
        audio_engine::device::list_devices(&cpal::default_host())?;
        return Ok(());
    }

    let Some(cmd) = &args.cmd else {
        anyhow::bail!("no command given (try --help)");
    };
    match cmd {
        cli::Command::Play { path, .. } => {
            let cfg = args.engine_config()?;
            play_interactive(path, cfg)?;
        }
        cli::Command::Scan { dir, json } => {
            let tracks = audio_engine::library::scan_media(dir)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&tracks)?);
            } else {
                for track in tracks {
                    println!("{}", track.display());
                }
            }
        }
        cli::Command::Info { path, online } => print_info(path, *online)?,
    }
    Ok(())
}

fn play_interactive(path: &Path, cfg: EngineConfig) -> Result<()> {
    let (device, sink) = DeviceHandle::open(&cfg).context("open output device")?;
    tracing::info!(
        device = %device.name(),
        rate = device.clock().rate,
        channels = device.clock().channels,
        "output ready"
    );
    let engine = Engine::new(sink, cfg);
    engine
        .load(path)
        .with_context(|| format!("load {:?}", path))?;
    engine.play();
    println!("{}", engine.status().summary());
    println!("type `help` for commands");

    let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    })
    .context("install ctrl-c handler")?;
    let lines = spawn_stdin_reader();

    let mut reported_end = false;
    let mut running = true;
    while running {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => match repl::parse(&line) {
                    Ok(Some(cmd)) => match repl::execute(&engine, cmd) {
                        Ok(keep_going) => {
                            running = keep_going;
                            reported_end = false;
                        }
                        Err(err) => eprintln!("error: {err:#}"),
                    },
                    Ok(None) => {}
                    Err(err) => eprintln!("{err:#}"),
                },
                // stdin closed
                Err(_) => running = false,
            },
            recv(quit_rx) -> _ => running = false,
            default(POLL_INTERVAL) => {
                let message = match engine.end_reason() {
                    Some(EndReason::Eof) => Some("end of track"),
                    Some(EndReason::Error) => Some("playback stopped on a decode error"),
                    _ => None,
                };
                if let (false, Some(message)) = (reported_end, message) {
                    println!("{message}");
                    reported_end = true;
                }
            }
        }
    }

    engine.stop();
    drop(device);
    tracing::info!("bye");
    Ok(())
}

/// Forward stdin lines to a channel so the main loop can also watch ctrl-c and end of track.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .ok();
    rx
}

fn print_info(path: &Path, online: bool) -> Result<()> {
    let (_stream, format) =
        audio_engine::decode::open(path).with_context(|| format!("open {:?}", path))?;
    let mut info = read_tags(path);
    if online {
        if let Some(term) = info.search_term() {
            match ItunesClient::new().lookup(&term) {
                Ok(remote) => info.merge(remote),
                Err(err) => tracing::warn!(term = %term, error = %err, "online lookup failed"),
            }
        }
    }

    let clock = audio_engine::clock::PositionClock::new(format.sample_rate, format.frames);
    let out = serde_json::json!({
        "path": path.display().to_string(),
        "codec": format.codec,
        "codec_name": format.codec_name,
        "sample_rate": format.sample_rate,
        "channels": format.channels,
        "bit_depth": format.bit_depth,
        "frames": format.frames,
        "duration_ms": clock.duration().ok().map(|d| d.as_millis() as u64),
        "title": info.title,
        "artist": info.artist,
        "album": info.album,
        "artwork_url": info.artwork_url,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
