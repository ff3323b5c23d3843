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

use serde::{Deserialize, Serialize};

use super::error::{parse_duration, ConfigError};
use crate::music::MusicalKey;

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 300.0;

/// A named musical state.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MoodState {
    /// The mood identifier, e.g. `forest`.
    id: String,

    /// The instrument roles to play, in fade-in order.
    #[serde(default)]
    instruments: Vec<String>,

    /// Beats per minute.
    #[serde(default)]
    tempo: f64,

    /// Target intensity in [0, 1].
    #[serde(default)]
    intensity: f64,

    /// Target amplitude in [0, 1].
    #[serde(default)]
    volume: f64,

    /// The key to play in. Instruments fall back to their own default when unset.
    key: Option<MusicalKey>,
}

impl MoodState {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn key(&self) -> Option<MusicalKey> {
        self.key
    }

    /// The mood's parameters with the given overrides applied. An override
    /// always wins over the mood default; the result is clamped to the
    /// playable range.
    pub fn merged(&self, overrides: &MoodOverrides) -> MoodParams {
        MoodParams {
            tempo: overrides.tempo.unwrap_or(self.tempo),
            intensity: overrides.intensity.unwrap_or(self.intensity),
            volume: overrides.volume.unwrap_or(self.volume),
            key: overrides.key.or(self.key),
        }
        .clamped()
    }
}

#[cfg(test)]
impl MoodState {
    pub fn new(
        id: &str,
        instruments: &[&str],
        tempo: f64,
        intensity: f64,
        volume: f64,
        key: Option<MusicalKey>,
    ) -> MoodState {
        MoodState {
            id: id.to_string(),
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            tempo,
            intensity,
            volume,
            key,
        }
    }
}

/// Optional per-transition replacements for a mood's defaults.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct MoodOverrides {
    pub tempo: Option<f64>,
    pub intensity: Option<f64>,
    pub volume: Option<f64>,
    pub key: Option<MusicalKey>,
}

impl MoodOverrides {
    pub fn tempo(tempo: f64) -> MoodOverrides {
        MoodOverrides {
            tempo: Some(tempo),
            ..Default::default()
        }
    }
}

/// The effective parameters of the playing mood.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct MoodParams {
    pub tempo: f64,
    pub intensity: f64,
    pub volume: f64,
    pub key: Option<MusicalKey>,
}

impl MoodParams {
    /// Clamps tempo to [20, 300] (zero stays zero, meaning silence) and the
    /// levels to [0, 1].
    pub fn clamped(self) -> MoodParams {
        let tempo = if self.tempo <= 0.0 {
            0.0
        } else {
            self.tempo.clamp(MIN_TEMPO, MAX_TEMPO)
        };
        MoodParams {
            tempo,
            intensity: self.intensity.clamp(0.0, 1.0),
            volume: self.volume.clamp(0.0, 1.0),
            key: self.key,
        }
    }
}

impl Default for MoodParams {
    fn default() -> Self {
        MoodParams {
            tempo: 0.0,
            intensity: 0.0,
            volume: 0.0,
            key: None,
        }
    }
}

/// One timed step of a mood sequence.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SequencePhase {
    mood: String,
    duration: String,
    #[serde(default)]
    overrides: MoodOverrides,
}

impl SequencePhase {
    pub fn mood(&self) -> &str {
        &self.mood
    }

    pub fn duration(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.duration)
    }

    pub fn overrides(&self) -> &MoodOverrides {
        &self.overrides
    }
}

/// A named, timed series of moods, such as the evolution of a stage.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MoodSequence {
    name: String,
    #[serde(default)]
    looping: bool,
    phases: Vec<SequencePhase>,
}

impl MoodSequence {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn phases(&self) -> &[SequencePhase] {
        &self.phases
    }
}

#[cfg(test)]
mod test {
    use super::{MoodOverrides, MoodState};
    use crate::music::MusicalKey;

    #[test]
    fn test_merge_precedence() {
        let mood = MoodState::new("combat", &["drums"], 180.0, 0.9, 0.8, Some(MusicalKey::Dm));

        let params = mood.merged(&MoodOverrides::default());
        assert_eq!(180.0, params.tempo);
        assert_eq!(0.9, params.intensity);
        assert_eq!(Some(MusicalKey::Dm), params.key);

        let params = mood.merged(&MoodOverrides {
            tempo: Some(150.0),
            key: Some(MusicalKey::G),
            ..Default::default()
        });
        assert_eq!(150.0, params.tempo);
        assert_eq!(0.8, params.volume);
        assert_eq!(Some(MusicalKey::G), params.key);
    }

    #[test]
    fn test_merge_clamps() {
        let mood = MoodState::new("forest", &["pad"], 30.0, 0.2, 0.4, None);
        let params = mood.merged(&MoodOverrides {
            tempo: Some(500.0),
            intensity: Some(-1.0),
            volume: Some(3.0),
            key: None,
        });
        assert_eq!(300.0, params.tempo);
        assert_eq!(0.0, params.intensity);
        assert_eq!(1.0, params.volume);

        let params = mood.merged(&MoodOverrides::tempo(5.0));
        assert_eq!(20.0, params.tempo);
    }
}
