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
use std::time::Duration;

use crate::{
    clock::ManualClock,
    config::EngineConfig,
    diagnostics::{DiagnosticRecord, MemoryDiagnostics, RecordKind},
    engine::MusicEngine,
    sink::mock,
};

pub mod polling;

pub use self::polling::eventually;

/// Tick granularity used when a test advances time.
const STEP: Duration = Duration::from_millis(10);

pub fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// An engine on a manual clock, with the mock sink and in-memory
/// diagnostics kept aside so tests can look at them.
pub struct Harness {
    pub engine: MusicEngine,
    pub clock: ManualClock,
    pub sink: mock::Sink,
    pub diagnostics: MemoryDiagnostics,
}

impl Harness {
    /// A harness over the built-in score.
    pub fn builtin() -> Harness {
        Harness::new(EngineConfig::builtin().expect("built-in config"))
    }

    pub fn new(config: EngineConfig) -> Harness {
        let clock = ManualClock::new();
        let sink = mock::Sink::new();
        let diagnostics = MemoryDiagnostics::new();
        let engine = MusicEngine::new(
            config,
            Box::new(clock.clone()),
            Box::new(sink.clone()),
            Box::new(diagnostics.clone()),
        )
        .expect("engine");
        Harness {
            engine,
            clock,
            sink,
            diagnostics,
        }
    }

    /// Moves time forward in small steps, ticking the engine after each.
    pub fn advance(&mut self, by: Duration) {
        let until = self.engine.now() + by;
        while self.engine.now() < until {
            let step = STEP.min(until - self.engine.now());
            self.clock.advance(step);
            self.engine.tick();
        }
    }

    pub fn records(&self, kind: RecordKind) -> Vec<DiagnosticRecord> {
        self.diagnostics.of_kind(kind)
    }
}
