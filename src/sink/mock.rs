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
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    envelope::GainPoint,
    error::AudioError,
    voice::{VoiceConfig, VoiceId},
};

/// A command received by the mock sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    Create { id: VoiceId, role: String },
    Configure { id: VoiceId, config: VoiceConfig },
    Schedule { id: VoiceId, at: Duration, peak: f64 },
    Ramp { id: VoiceId, target: f64, at: Duration, over: Duration },
    Stop { id: VoiceId, at: Duration },
    Reset { id: VoiceId },
    Dispose { id: VoiceId },
}

/// A mock sink. Doesn't play anything, but remembers everything it was told.
/// Clones share state, so a test can keep one and hand another to the engine.
#[derive(Clone)]
pub struct Sink {
    commands: Arc<Mutex<Vec<SinkCommand>>>,
    allocated: Arc<Mutex<HashSet<VoiceId>>>,
    ready: Arc<AtomicBool>,
}

impl Default for Sink {
    fn default() -> Self {
        Sink::new()
    }
}

impl Sink {
    pub fn new() -> Sink {
        Sink {
            commands: Arc::new(Mutex::new(Vec::new())),
            allocated: Arc::new(Mutex::new(HashSet::new())),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulates the audio context going away or coming back.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// A copy of every command received so far.
    pub fn commands(&self) -> Vec<SinkCommand> {
        self.commands.lock().clone()
    }

    /// Forgets the recorded commands.
    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    /// The number of voices created and not yet disposed.
    pub fn allocated(&self) -> usize {
        self.allocated.lock().len()
    }

    /// The number of notes scheduled so far.
    pub fn scheduled(&self) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|command| matches!(command, SinkCommand::Schedule { .. }))
            .count()
    }

    fn check_ready(&self) -> Result<(), AudioError> {
        if self.ready.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(AudioError::ContextUnavailable)
        }
    }

    fn record(&self, command: SinkCommand) {
        debug!(command = ?command, "Mock sink command");
        self.commands.lock().push(command);
    }
}

impl crate::sink::Sink for Sink {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    fn create_voice(&self, id: VoiceId, role: &str, _: &VoiceConfig) -> Result<(), AudioError> {
        self.check_ready()?;
        self.allocated.lock().insert(id);
        self.record(SinkCommand::Create {
            id,
            role: role.to_string(),
        });
        Ok(())
    }

    fn configure(&self, id: VoiceId, config: &VoiceConfig) -> Result<(), AudioError> {
        self.check_ready()?;
        self.record(SinkCommand::Configure {
            id,
            config: config.clone(),
        });
        Ok(())
    }

    fn schedule(&self, id: VoiceId, at: Duration, points: &[GainPoint]) -> Result<(), AudioError> {
        self.check_ready()?;
        let peak = points.iter().map(|point| point.gain).fold(0.0, f64::max);
        self.record(SinkCommand::Schedule { id, at, peak });
        Ok(())
    }

    fn ramp(&self, id: VoiceId, target: f64, at: Duration, over: Duration) {
        self.record(SinkCommand::Ramp {
            id,
            target,
            at,
            over,
        });
    }

    fn stop(&self, id: VoiceId, at: Duration) {
        self.record(SinkCommand::Stop { id, at });
    }

    fn reset(&self, id: VoiceId) {
        self.record(SinkCommand::Reset { id });
    }

    fn dispose(&self, id: VoiceId) {
        self.allocated.lock().remove(&id);
        self.record(SinkCommand::Dispose { id });
    }
}
