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
use crate::voice::{Effect, Waveform};

const DEFAULT_STINGER_PRIORITY: u32 = 1000;

fn default_priority() -> u32 {
    DEFAULT_STINGER_PRIORITY
}

fn default_volume() -> f64 {
    0.5
}

/// One pitched event of a stinger.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct StingerNote {
    frequency: f64,
    /// Onset relative to the stinger start.
    at: String,
    length: String,
}

impl StingerNote {
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn at(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.at)
    }

    pub fn length(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.length)
    }
}

/// A YAML representation of a stinger cue.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct StingerDefinition {
    name: String,
    duration: String,
    #[serde(default = "default_priority")]
    priority: u32,
    #[serde(default = "default_volume")]
    volume: f64,
    #[serde(default)]
    waveform: Waveform,
    notes: Vec<StingerNote>,
    /// Decorations applied in order between the voices and the output.
    #[serde(default)]
    effects: Vec<Effect>,
}

impl StingerDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.duration)
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn notes(&self) -> &[StingerNote] {
        &self.notes
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Resolves the stinger against per-call options. Options win over the
    /// definition's defaults.
    pub fn merged(&self, options: &StingerOptions) -> StingerParams {
        StingerParams {
            priority: options.priority.unwrap_or(self.priority),
            volume: options.volume.unwrap_or(self.volume).clamp(0.0, 1.0),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let duration = self.duration()?;
        if duration.is_zero() {
            return Err(ConfigError::Invalid(format!(
                "stinger {}: duration must be longer than zero",
                self.name
            )));
        }
        if self.notes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "stinger {}: at least one note is required",
                self.name
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(ConfigError::Invalid(format!(
                "stinger {}: volume must be within [0, 1]",
                self.name
            )));
        }
        for note in &self.notes {
            note.at()?;
            let frequency = note.frequency;
            if note.length()?.is_zero() || !frequency.is_finite() || frequency <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "stinger {}: notes need a positive frequency and length",
                    self.name
                )));
            }
        }
        for effect in &self.effects {
            effect.validate().map_err(|e| {
                ConfigError::Invalid(format!("stinger {}: {}", self.name, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl StingerDefinition {
    /// Creates a single-note stinger (test only).
    pub fn simple(name: &str, duration: &str, priority: u32) -> StingerDefinition {
        StingerDefinition {
            name: name.to_string(),
            duration: duration.to_string(),
            priority,
            volume: default_volume(),
            waveform: Waveform::Sine,
            notes: vec![StingerNote {
                frequency: 440.0,
                at: "0ms".into(),
                length: duration.to_string(),
            }],
            effects: Vec::new(),
        }
    }
}

/// Per-call replacements for a stinger's defaults.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct StingerOptions {
    pub priority: Option<u32>,
    pub volume: Option<f64>,
}

impl StingerOptions {
    pub fn priority(priority: u32) -> StingerOptions {
        StingerOptions {
            priority: Some(priority),
            volume: None,
        }
    }
}

/// The effective parameters of a playing stinger.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StingerParams {
    pub priority: u32,
    pub volume: f64,
}
