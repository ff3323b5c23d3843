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
    collections::{HashMap, HashSet},
    path::Path,
};

use config::{Config, File, FileFormat};
use serde::Deserialize;
use tracing::warn;

mod error;
mod events;
mod instruments;
mod moods;
mod pool;
mod stingers;
mod timing;

pub use self::error::{parse_duration, ConfigError};
pub use self::events::{EventRule, GameEvent, IntensityRule};
pub use self::instruments::{
    InstrumentDefinition, Layer, Partial, PatternKind, PercussiveSound, Section, Voicing,
};
pub use self::moods::{MoodOverrides, MoodParams, MoodSequence, MoodState, SequencePhase};
pub use self::pool::{Adjustment, MetricWeights, PoolConfig, RoleBudget, ScoreWeights, Thresholds};
pub use self::stingers::{StingerDefinition, StingerNote, StingerOptions, StingerParams};
pub use self::timing::{Timing, TimingConfig};

/// The built-in score, used when no configuration file is given.
const DEFAULT_CONFIG: &str = include_str!("config/default.yaml");

fn default_initial_mood() -> String {
    "silence".to_string()
}

/// The complete engine configuration. Static once loaded.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// The bootstrap mood. It may transition anywhere and plays nothing.
    #[serde(default = "default_initial_mood")]
    initial_mood: String,

    moods: Vec<MoodState>,

    /// Directly reachable moods, keyed by mood id.
    #[serde(default)]
    transitions: HashMap<String, Vec<String>>,

    #[serde(default)]
    instruments: Vec<InstrumentDefinition>,

    #[serde(default)]
    stingers: Vec<StingerDefinition>,

    #[serde(default)]
    pool: PoolConfig,

    #[serde(default)]
    events: Vec<EventRule>,

    #[serde(default)]
    intensity_rules: Vec<IntensityRule>,

    #[serde(default)]
    sequences: Vec<MoodSequence>,

    #[serde(default)]
    timing: TimingConfig,
}

impl EngineConfig {
    /// Loads and validates a configuration file. Any format supported by the
    /// config crate is accepted, YAML being the usual one.
    pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in score.
    pub fn builtin() -> Result<EngineConfig, ConfigError> {
        EngineConfig::from_yaml(DEFAULT_CONFIG)
    }

    pub fn initial_mood(&self) -> &str {
        &self.initial_mood
    }

    pub fn moods(&self) -> &[MoodState] {
        &self.moods
    }

    pub fn mood(&self, id: &str) -> Option<&MoodState> {
        self.moods.iter().find(|mood| mood.id() == id)
    }

    /// The moods directly reachable from `id`.
    pub fn transitions_from(&self, id: &str) -> &[String] {
        self.transitions.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn instruments(&self) -> &[InstrumentDefinition] {
        &self.instruments
    }

    pub fn instrument(&self, role: &str) -> Option<&InstrumentDefinition> {
        self.instruments.iter().find(|i| i.role() == role)
    }

    pub fn stingers(&self) -> &[StingerDefinition] {
        &self.stingers
    }

    pub fn stinger(&self, name: &str) -> Option<&StingerDefinition> {
        self.stingers.iter().find(|s| s.name() == name)
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// The rules that fire for a game event.
    pub fn events_for(&self, event: GameEvent) -> impl Iterator<Item = &EventRule> {
        self.events.iter().filter(move |rule| rule.event == event)
    }

    pub fn intensity_rules(&self) -> &[IntensityRule] {
        &self.intensity_rules
    }

    pub fn sequences(&self) -> &[MoodSequence] {
        &self.sequences
    }

    pub fn sequence(&self, name: &str) -> Option<&MoodSequence> {
        self.sequences.iter().find(|s| s.name() == name)
    }

    pub fn timing(&self) -> Result<Timing, ConfigError> {
        self.timing.resolve()
    }

    /// Checks cross references and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.resolve()?;
        self.pool.validate()?;

        unique("mood", self.moods.iter().map(MoodState::id))?;
        unique("instrument", self.instruments.iter().map(InstrumentDefinition::role))?;
        unique("stinger", self.stingers.iter().map(StingerDefinition::name))?;

        let initial = self.mood(&self.initial_mood).ok_or_else(|| {
            ConfigError::Invalid(format!("initial mood {} is not defined", self.initial_mood))
        })?;
        if !initial.instruments().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "initial mood {} must not declare instruments",
                self.initial_mood
            )));
        }

        for mood in self.moods.iter().filter(|m| m.id() != self.initial_mood) {
            if mood.instruments().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "mood {} must declare at least one instrument role",
                    mood.id()
                )));
            }
            if mood.tempo() <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "mood {} needs a positive tempo",
                    mood.id()
                )));
            }
            for role in mood.instruments() {
                if self.instrument(role).is_none() {
                    warn!(
                        mood = mood.id(),
                        role,
                        "Mood references an undefined instrument, it will be silent"
                    );
                }
            }
        }

        for (from, targets) in self.transitions.iter() {
            self.known_mood(from)?;
            for to in targets {
                self.known_mood(to)?;
            }
        }

        for instrument in self.instruments.iter() {
            instrument.validate()?;
        }
        for stinger in self.stingers.iter() {
            stinger.validate()?;
        }

        for rule in self.events.iter() {
            if let Some(stinger) = &rule.stinger {
                if self.stinger(stinger).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "event {} references unknown stinger {}",
                        rule.event, stinger
                    )));
                }
            }
            if let Some(mood) = &rule.transition {
                self.known_mood(mood)?;
            }
        }
        for rule in self.intensity_rules.iter() {
            self.known_mood(&rule.transition)?;
            if let Some(mood) = &rule.when_in {
                self.known_mood(mood)?;
            }
        }
        for sequence in self.sequences.iter() {
            if sequence.phases().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "sequence {} has no phases",
                    sequence.name()
                )));
            }
            for phase in sequence.phases() {
                self.known_mood(phase.mood())?;
                if phase.duration()?.is_zero() {
                    return Err(ConfigError::Invalid(format!(
                        "sequence {} has a zero length phase",
                        sequence.name()
                    )));
                }
            }
        }

        Ok(())
    }

    fn known_mood(&self, id: &str) -> Result<(), ConfigError> {
        match self.mood(id) {
            Some(_) => Ok(()),
            None => Err(ConfigError::Invalid(format!("unknown mood {}", id))),
        }
    }
}

fn unique<'a>(what: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ConfigError::Invalid(format!("duplicate {} {}", what, id)));
        }
    }
    Ok(())
}
