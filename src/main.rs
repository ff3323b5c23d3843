// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    path::PathBuf,
    str::FromStr,
    thread,
    time::{Duration, Instant},
};

use clap::{crate_version, Parser, Subcommand};
use moodtrack::{
    config::parse_duration, ConfigError, DriverError, EngineConfig, EngineDriver, GameEvent,
    ManualClock, MemoryDiagnostics, MoodOverrides, MusicEngine, NullSink, StingerOptions,
    SystemClock, TracingDiagnostics,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "An adaptive music engine for games."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the moods, their instruments and the allowed transitions.
    Moods {
        /// The engine configuration. Uses the built-in score if omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validates an engine configuration file.
    Validate {
        /// The engine configuration to check.
        config: PathBuf,
    },
    /// Runs a script against a simulated clock and prints what happened.
    Simulate {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Cues of the form `forest@2s`, `event:boss_appeared@10s` or
        /// `stinger:level_up@4s`.
        #[arg(short, long)]
        script: Vec<String>,
        /// How long to simulate.
        #[arg(long, default_value = "60s")]
        length: String,
        /// Print the diagnostic records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Runs a script in real time on the engine thread, with no audio output.
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        script: Vec<String>,
        #[arg(long, default_value = "30s")]
        length: String,
        /// How often the engine thread ticks.
        #[arg(long, default_value = "10ms")]
        tick: String,
    },
}

/// Something a script does at a point in time.
#[derive(Debug, Clone, PartialEq)]
enum Action {
    Mood(String),
    Event(GameEvent),
    Stinger(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Cue {
    at: Duration,
    action: Action,
}

impl FromStr for Cue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, at) = s
            .rsplit_once('@')
            .ok_or_else(|| format!("cue {} is missing a time, e.g. forest@2s", s))?;
        let at = parse_duration(at).map_err(|e| e.to_string())?;
        let action = match action.split_once(':') {
            Some(("event", event)) => Action::Event(event.parse()?),
            Some(("stinger", name)) => Action::Stinger(name.to_string()),
            Some((kind, _)) => return Err(format!("unknown cue kind: {}", kind)),
            None => Action::Mood(action.to_string()),
        };
        Ok(Cue { at, action })
    }
}

fn parse_script(script: &[String]) -> Result<Vec<Cue>, String> {
    let mut cues = script
        .iter()
        .map(|cue| cue.parse())
        .collect::<Result<Vec<Cue>, String>>()?;
    cues.sort_by_key(|cue| cue.at);
    Ok(cues)
}

fn load(config: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    match config {
        Some(path) => EngineConfig::load(&path),
        None => EngineConfig::builtin(),
    }
}

fn apply(engine: &mut MusicEngine, action: &Action) {
    match action {
        Action::Mood(mood) => {
            engine.transition_to(mood, &MoodOverrides::default());
        }
        Action::Event(event) => {
            engine.handle_event(*event);
        }
        Action::Stinger(name) => {
            if let Err(e) = engine.play_stinger(name, &StingerOptions::default()) {
                warn!(name, err = %e, "Unable to play stinger");
            }
        }
    }
}

fn send(driver: &EngineDriver, action: &Action) -> Result<(), DriverError> {
    match action {
        Action::Mood(mood) => {
            driver.transition_to(mood, MoodOverrides::default())?;
        }
        Action::Event(event) => driver.game_event(*event)?,
        Action::Stinger(name) => {
            driver.play_stinger(name, StingerOptions::default())?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Moods { config } => {
            let config = load(config)?;
            println!("Moods (count: {}):", config.moods().len());
            for mood in config.moods() {
                let initial = if mood.id() == config.initial_mood() {
                    " (initial)"
                } else {
                    ""
                };
                println!(
                    "- {}{}: tempo {}, intensity {}, volume {}",
                    mood.id(),
                    initial,
                    mood.tempo(),
                    mood.intensity(),
                    mood.volume()
                );
                if !mood.instruments().is_empty() {
                    println!("    instruments: {}", mood.instruments().join(", "));
                }
                let targets = config.transitions_from(mood.id());
                if !targets.is_empty() {
                    println!("    transitions: {}", targets.join(", "));
                }
            }
            println!("\nStingers (count: {}):", config.stingers().len());
            for stinger in config.stingers() {
                println!("- {} (priority {})", stinger.name(), stinger.priority());
            }
        }
        Commands::Validate { config } => {
            let loaded = EngineConfig::load(&config)?;
            println!(
                "{} is valid: {} moods, {} instruments, {} stingers.",
                config.display(),
                loaded.moods().len(),
                loaded.instruments().len(),
                loaded.stingers().len()
            );
        }
        Commands::Simulate {
            config,
            script,
            length,
            json,
        } => {
            let config = load(config)?;
            let cues = parse_script(&script)?;
            let length = parse_duration(&length)?;
            let clock = ManualClock::new();
            let diagnostics = MemoryDiagnostics::new();
            let mut engine = MusicEngine::new(
                config,
                Box::new(clock.clone()),
                Box::new(NullSink),
                Box::new(diagnostics.clone()),
            )?;

            let step = Duration::from_millis(10);
            let mut cues = cues.into_iter().peekable();
            while engine.now() < length {
                while let Some(cue) = cues.next_if(|cue| cue.at <= engine.now()) {
                    apply(&mut engine, &cue.action);
                }
                clock.advance(step);
                engine.tick();
            }

            if json {
                println!("{}", diagnostics.to_json()?);
            } else {
                println!("{}", serde_json::to_string_pretty(&engine.status())?);
            }
            engine.shutdown();
        }
        Commands::Run {
            config,
            script,
            length,
            tick,
        } => {
            let config = load(config)?;
            let cues = parse_script(&script)?;
            let length = parse_duration(&length)?;
            let engine = MusicEngine::new(
                config,
                Box::new(SystemClock::new()),
                Box::new(NullSink),
                Box::new(TracingDiagnostics),
            )?;
            let driver = EngineDriver::spawn(engine, parse_duration(&tick)?);

            let start = Instant::now();
            for cue in cues.iter().filter(|cue| cue.at < length) {
                thread::sleep(cue.at.saturating_sub(start.elapsed()));
                send(&driver, &cue.action)?;
            }
            thread::sleep(length.saturating_sub(start.elapsed()));

            let status = driver.status()?;
            info!(mood = status.mood.current, stats = ?status.stats, "Run finished");
            driver.shutdown();
        }
    }

    Ok(())
}
