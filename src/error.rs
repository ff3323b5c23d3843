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
use thiserror::Error;

/// Errors surfaced by the music engine.
///
/// Only [`AudioError::InvalidConfig`] is ever returned out of engine
/// construction. The remaining variants are raised inside the engine and are
/// mostly handled where they occur: rejected transitions become a `false`
/// return, exhausted resources skip a note, and an unavailable output sink
/// puts the voice pool into silent, degraded mode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    #[error("voice budget exhausted for role {role}: {reason}")]
    ResourceExhausted { role: String, reason: String },

    #[error("transition from {from} to {to} is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("audio context is unavailable")]
    ContextUnavailable,

    #[error("unknown mood: {0}")]
    UnknownMood(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("unknown stinger: {0}")]
    UnknownStinger(String),

    #[error("unknown mood sequence: {0}")]
    UnknownSequence(String),

    #[error("a transition from {from} to {to} is already in flight")]
    TransitionInFlight { from: String, to: String },
}

impl AudioError {
    /// Shorthand for a resource exhaustion error.
    pub fn exhausted(role: &str, reason: impl Into<String>) -> AudioError {
        AudioError::ResourceExhausted {
            role: role.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::AudioError;

    #[test]
    fn test_display() {
        assert_eq!(
            "voice budget exhausted for role bass: hard cap of 4 reached",
            AudioError::exhausted("bass", "hard cap of 4 reached").to_string()
        );
        assert_eq!(
            "transition from silence to combat is not allowed",
            AudioError::InvalidTransition {
                from: "silence".into(),
                to: "combat".into()
            }
            .to_string()
        );
    }
}
