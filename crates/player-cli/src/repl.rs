//! Line commands for interactive playback.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use audio_engine::Engine;
use audio_engine::status::format_ms;

pub const HELP: &str = "\
commands:
  play | pause | stop
  seek <0..1>      jump to a fraction of the track
  ff <sec>         skip forward
  rw <sec>         skip back
  goto <sec>       jump to an absolute time
  vol <0..1>       set volume
  load <path>      replace the current track
  status           print transport status
  quit";

#[derive(Debug, PartialEq)]
pub enum ReplCommand {
    Play,
    Pause,
    Stop,
    Seek(f64),
    Forward(f64),
    Rewind(f64),
    Goto(f64),
    Volume(f32),
    Load(PathBuf),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let cmd = match word.to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "play" | "p" => ReplCommand::Play,
        "pause" => ReplCommand::Pause,
        "stop" => ReplCommand::Stop,
        "seek" => ReplCommand::Seek(number(word, rest)?),
        "ff" => ReplCommand::Forward(seconds(word, rest)?),
        "rw" => ReplCommand::Rewind(seconds(word, rest)?),
        "goto" => ReplCommand::Goto(seconds(word, rest)?),
        "vol" | "volume" => ReplCommand::Volume(number(word, rest)? as f32),
        "load" => {
            if rest.is_empty() {
                bail!("load needs a path");
            }
            ReplCommand::Load(PathBuf::from(rest))
        }
        "status" | "s" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => bail!("unknown command {other:?} (try `help`)"),
    };
    Ok(Some(cmd))
}

fn number(word: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw
        .parse()
        .with_context(|| format!("{word} needs a number, got {raw:?}"))?;
    if !value.is_finite() {
        return Err(anyhow!("{word} needs a finite number"));
    }
    Ok(value)
}

fn seconds(word: &str, raw: &str) -> Result<f64> {
    let value = number(word, raw)?;
    if value < 0.0 {
        bail!("{word} takes a non-negative number of seconds");
    }
    Ok(value)
}

/// Absolute seek target; values past `Duration::MAX` saturate and the engine
/// clamps them to the last frame.
fn goto_target(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Run `cmd` against `engine`. Returns `false` when the session should end.
pub fn execute(engine: &Engine, cmd: ReplCommand) -> Result<bool> {
    match cmd {
        ReplCommand::Play => engine.play(),
        ReplCommand::Pause => engine.pause(),
        ReplCommand::Stop => engine.stop(),
        ReplCommand::Seek(ratio) => engine.seek_ratio(ratio)?,
        ReplCommand::Forward(secs) => engine.seek_by((secs * 1000.0) as i64)?,
        ReplCommand::Rewind(secs) => engine.seek_by(-(secs * 1000.0) as i64)?,
        ReplCommand::Goto(secs) => engine.seek_to(goto_target(secs))?,
        ReplCommand::Volume(v) => engine.set_volume(v),
        ReplCommand::Load(path) => {
            engine.load(&path)?;
            engine.play();
        }
        ReplCommand::Status => {
            println!("{}", engine.status().summary());
            return Ok(true);
        }
        ReplCommand::Help => {
            println!("{HELP}");
            return Ok(true);
        }
        ReplCommand::Quit => return Ok(false),
    }
    print_position(engine);
    Ok(true)
}

fn print_position(engine: &Engine) {
    let elapsed = engine.position().map(|d| format_ms(d.as_millis() as u64));
    let total = engine.duration().map(|d| format_ms(d.as_millis() as u64));
    match (elapsed, total) {
        (Ok(elapsed), Ok(total)) => println!("{:?} {elapsed}/{total}", engine.state()),
        _ => println!("{:?}", engine.state()),
    }
}
