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
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::{envelope::Envelope, error::AudioError};

new_key_type! {
    /// Identifies a voice owned by the voice pool.
    pub struct VoiceId;
}

/// Oscillator shapes a voice can be configured with.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
    /// Filtered noise, used for snares, hi-hats and cymbals.
    Noise,
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Square => "square",
            Waveform::Noise => "noise",
        };
        write!(f, "{}", name)
    }
}

/// Whether a voice plays one pitch or several.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolyphonyClass {
    #[default]
    Monophonic,
    Polyphonic,
}

/// A processing stage applied to a voice's output, in chain order.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Distortion { amount: f64 },
    Tremolo { rate: f64, depth: f64 },
    Filter { frequency: f64, q: f64 },
    Reverb,
}

impl Effect {
    pub fn validate(&self) -> Result<(), AudioError> {
        let ok = match self {
            Effect::Distortion { amount } => amount.is_finite() && *amount >= 0.0,
            Effect::Tremolo { rate, depth } => {
                rate.is_finite() && *rate > 0.0 && (0.0..=1.0).contains(depth)
            }
            Effect::Filter { frequency, q } => {
                frequency.is_finite() && *frequency > 0.0 && q.is_finite() && *q > 0.0
            }
            Effect::Reverb => true,
        };
        if ok {
            Ok(())
        } else {
            Err(AudioError::InvalidConfig(format!(
                "invalid effect parameters: {:?}",
                self
            )))
        }
    }
}

/// Everything the output sink needs to know to make a voice sound.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    pub waveform: Waveform,
    /// Base pitch in Hz.
    pub frequency: f64,
    /// Peak gain in [0, 1].
    pub amplitude: f64,
    pub envelope: Envelope,
    pub polyphony: PolyphonyClass,
    pub detune_cents: f64,
    pub effects: Vec<Effect>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        VoiceConfig {
            waveform: Waveform::Sine,
            frequency: 440.0,
            amplitude: 0.5,
            envelope: Envelope::default(),
            polyphony: PolyphonyClass::Monophonic,
            detune_cents: 0.0,
            effects: Vec::new(),
        }
    }
}

impl VoiceConfig {
    /// Rejects configurations the sink could never render.
    pub fn validate(&self) -> Result<(), AudioError> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            return Err(AudioError::InvalidConfig(format!(
                "voice frequency must be positive, got {}",
                self.frequency
            )));
        }
        if !self.amplitude.is_finite() || !(0.0..=1.0).contains(&self.amplitude) {
            return Err(AudioError::InvalidConfig(format!(
                "voice amplitude must be within [0, 1], got {}",
                self.amplitude
            )));
        }
        if !self.detune_cents.is_finite() {
            return Err(AudioError::InvalidConfig("voice detune must be finite".into()));
        }
        self.envelope.validate()?;
        self.effects.iter().try_for_each(Effect::validate)
    }

    /// Two configurations are compatible for reuse when their envelope shape
    /// and polyphony class match. Pitch and effects are reconfigured on reuse.
    pub fn is_compatible(&self, other: &VoiceConfig) -> bool {
        self.envelope == other.envelope && self.polyphony == other.polyphony
    }
}

/// Where a voice is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Active,
    Pooled,
    Disposed,
}

/// A caller's reference to a pooled voice.
///
/// Silent handles are returned while the output sink is unavailable; they can
/// be scheduled and released like any other, but nothing will sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceHandle {
    id: Option<VoiceId>,
    /// Bumped every time the underlying voice is handed out, so a stale handle
    /// can never touch a voice that has since been reused.
    lease: u32,
    priority: u8,
    created_at: Duration,
}

impl VoiceHandle {
    pub(crate) fn live(id: VoiceId, lease: u32, priority: u8, created_at: Duration) -> VoiceHandle {
        VoiceHandle {
            id: Some(id),
            lease,
            priority,
            created_at,
        }
    }

    pub(crate) fn silent(priority: u8, created_at: Duration) -> VoiceHandle {
        VoiceHandle {
            id: None,
            lease: 0,
            priority,
            created_at,
        }
    }

    pub(crate) fn lease(&self) -> u32 {
        self.lease
    }

    /// The pool id, or `None` for a silent handle.
    pub fn id(&self) -> Option<VoiceId> {
        self.id
    }

    pub fn is_silent(&self) -> bool {
        self.id.is_none()
    }

    /// The role priority the voice was acquired with.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    /// When this lease of the voice began.
    pub fn created_at(&self) -> Duration {
        self.created_at
    }
}

#[cfg(test)]
mod test {
    use crate::envelope::Envelope;

    use super::{Effect, PolyphonyClass, VoiceConfig};

    #[test]
    fn test_validate() {
        assert!(VoiceConfig::default().validate().is_ok());

        let bad_frequency = VoiceConfig {
            frequency: 0.0,
            ..Default::default()
        };
        assert!(bad_frequency.validate().is_err());

        let bad_amplitude = VoiceConfig {
            amplitude: 1.5,
            ..Default::default()
        };
        assert!(bad_amplitude.validate().is_err());

        let bad_effect = VoiceConfig {
            effects: vec![Effect::Tremolo {
                rate: 8.0,
                depth: 2.0,
            }],
            ..Default::default()
        };
        assert!(bad_effect.validate().is_err());
    }

    #[test]
    fn test_compatibility() {
        let base = VoiceConfig::default();
        let other_pitch = VoiceConfig {
            frequency: 110.0,
            effects: vec![Effect::Reverb],
            ..Default::default()
        };
        assert!(base.is_compatible(&other_pitch));

        let other_envelope = VoiceConfig {
            envelope: Envelope::percussive(0.1),
            ..Default::default()
        };
        assert!(!base.is_compatible(&other_envelope));

        let poly = VoiceConfig {
            polyphony: PolyphonyClass::Polyphonic,
            ..Default::default()
        };
        assert!(!base.is_compatible(&poly));
    }
}
