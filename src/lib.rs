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
//! An adaptive music engine for games.
//!
//! Moods select a set of procedural instruments and the parameters they play
//! with. Transitions between moods follow a configured table, game events
//! drive intensity and short musical cues (stingers), and a voice pool keeps
//! the number of sounding voices within a resource budget. Actual synthesis
//! is left to a [`Sink`] implementation.

pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod instruments;
pub mod moods;
pub mod music;
pub mod pool;
pub mod scheduler;
pub mod sink;
pub mod stingers;
#[cfg(test)]
mod testutil;
pub mod voice;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::config::{ConfigError, EngineConfig, GameEvent, MoodOverrides, StingerOptions};
pub use self::diagnostics::{
    DiagnosticRecord, DiagnosticsSink, MemoryDiagnostics, TracingDiagnostics,
};
pub use self::driver::{DriverError, EngineDriver};
pub use self::engine::{EngineStatus, MusicEngine};
pub use self::error::AudioError;
pub use self::pool::VoicePool;
pub use self::sink::{NullSink, Sink};
