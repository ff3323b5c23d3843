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
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
    config::{GameEvent, MoodOverrides, StingerOptions},
    engine::{EngineStatus, MusicEngine},
    error::AudioError,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DriverError {
    #[error("the engine thread has stopped")]
    Stopped,

    #[error(transparent)]
    Audio(#[from] AudioError),
}

enum Command {
    TransitionTo {
        mood: String,
        overrides: MoodOverrides,
        reply: Sender<bool>,
    },
    PlayStinger {
        name: String,
        options: StingerOptions,
        reply: Sender<Result<u64, AudioError>>,
    },
    StopStinger(String),
    Crossfade {
        from: String,
        to: String,
        duration: Duration,
        reply: Sender<Result<(), AudioError>>,
    },
    Event(GameEvent),
    SetContextReady(bool),
    Status(Sender<EngineStatus>),
    Shutdown,
}

/// Owns a [`MusicEngine`] on its own thread and ticks it at a fixed period.
/// All access goes through messages, so the handle can be shared freely.
pub struct EngineDriver {
    commands: Sender<Command>,
    join: Option<JoinHandle<()>>,
}

impl EngineDriver {
    pub fn spawn(engine: MusicEngine, period: Duration) -> EngineDriver {
        let (commands, rx) = unbounded();
        let join = thread::spawn(move || {
            let mut engine = engine;
            info!(period = ?period, "Engine driver started");
            loop {
                match rx.recv_timeout(period) {
                    Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Ok(command) => {
                        engine.tick();
                        EngineDriver::handle(&mut engine, command);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                }
                engine.tick();
            }
            engine.shutdown();
            info!("Engine driver stopped");
        });
        EngineDriver {
            commands,
            join: Some(join),
        }
    }

    fn handle(engine: &mut MusicEngine, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::TransitionTo {
                mood,
                overrides,
                reply,
            } => {
                let _ = reply.send(engine.transition_to(&mood, &overrides));
            }
            Command::PlayStinger {
                name,
                options,
                reply,
            } => {
                let _ = reply.send(engine.play_stinger(&name, &options));
            }
            Command::StopStinger(name) => {
                engine.stop_stinger(&name);
            }
            Command::Crossfade {
                from,
                to,
                duration,
                reply,
            } => {
                let _ = reply.send(engine.crossfade(&from, &to, duration));
            }
            Command::Event(event) => {
                engine.handle_event(event);
            }
            Command::SetContextReady(ready) => engine.set_context_ready(ready),
            Command::Status(reply) => {
                let _ = reply.send(engine.status());
            }
            Command::Shutdown => {}
        }
    }

    fn send(&self, command: Command) -> Result<(), DriverError> {
        self.commands.send(command).map_err(|_| DriverError::Stopped)
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> Command) -> Result<T, DriverError> {
        let (reply, rx) = bounded(1);
        self.send(command(reply))?;
        rx.recv().map_err(|_| DriverError::Stopped)
    }

    pub fn transition_to(&self, mood: &str, overrides: MoodOverrides) -> Result<bool, DriverError> {
        self.request(|reply| Command::TransitionTo {
            mood: mood.to_string(),
            overrides,
            reply,
        })
    }

    pub fn play_stinger(&self, name: &str, options: StingerOptions) -> Result<u64, DriverError> {
        let instance = self.request(|reply| Command::PlayStinger {
            name: name.to_string(),
            options,
            reply,
        })??;
        Ok(instance)
    }

    pub fn stop_stinger(&self, name: &str) -> Result<(), DriverError> {
        self.send(Command::StopStinger(name.to_string()))
    }

    pub fn crossfade(&self, from: &str, to: &str, duration: Duration) -> Result<(), DriverError> {
        self.request(|reply| Command::Crossfade {
            from: from.to_string(),
            to: to.to_string(),
            duration,
            reply,
        })??;
        Ok(())
    }

    /// Feeds a game event to the engine without waiting for it.
    pub fn game_event(&self, event: GameEvent) -> Result<(), DriverError> {
        debug!(event = %event, "Queueing game event");
        self.send(Command::Event(event))
    }

    pub fn set_context_ready(&self, ready: bool) -> Result<(), DriverError> {
        self.send(Command::SetContextReady(ready))
    }

    pub fn status(&self) -> Result<EngineStatus, DriverError> {
        self.request(Command::Status)
    }

    /// Stops the engine thread after freeing every voice.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Engine thread panicked");
            }
        }
    }
}

impl Drop for EngineDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
