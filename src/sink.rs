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
    envelope::GainPoint,
    error::AudioError,
    voice::{VoiceConfig, VoiceId},
};

pub mod mock;

/// The host-provided output. The engine never renders audio itself; it
/// creates opaque voices on the sink and schedules gain automation on them.
///
/// Times passed to the sink are engine clock times. Calls that can fail with
/// [`AudioError::ContextUnavailable`] put the voice pool into degraded mode.
pub trait Sink: Send + Sync {
    /// Whether the underlying audio context can currently make sound.
    fn is_ready(&self) -> bool;

    /// Allocates a voice for the given role.
    fn create_voice(&self, id: VoiceId, role: &str, config: &VoiceConfig)
        -> Result<(), AudioError>;

    /// Applies a new configuration to an existing voice.
    fn configure(&self, id: VoiceId, config: &VoiceConfig) -> Result<(), AudioError>;

    /// Schedules a note's gain automation, relative to `at`.
    fn schedule(&self, id: VoiceId, at: Duration, points: &[GainPoint]) -> Result<(), AudioError>;

    /// Ramps the voice's gain to `target`, starting at `at`.
    fn ramp(&self, id: VoiceId, target: f64, at: Duration, over: Duration);

    /// Silences the voice at the given time.
    fn stop(&self, id: VoiceId, at: Duration);

    /// Clears all automation so the voice can be pooled.
    fn reset(&self, id: VoiceId);

    /// Frees the voice.
    fn dispose(&self, id: VoiceId);
}

/// A sink that accepts everything and plays nothing.
#[derive(Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn is_ready(&self) -> bool {
        true
    }

    fn create_voice(&self, _: VoiceId, _: &str, _: &VoiceConfig) -> Result<(), AudioError> {
        Ok(())
    }

    fn configure(&self, _: VoiceId, _: &VoiceConfig) -> Result<(), AudioError> {
        Ok(())
    }

    fn schedule(&self, _: VoiceId, _: Duration, _: &[GainPoint]) -> Result<(), AudioError> {
        Ok(())
    }

    fn ramp(&self, _: VoiceId, _: f64, _: Duration, _: Duration) {}

    fn stop(&self, _: VoiceId, _: Duration) {}

    fn reset(&self, _: VoiceId) {}

    fn dispose(&self, _: VoiceId) {}
}
