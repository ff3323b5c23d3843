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
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Discrete game happenings the music reacts to.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameEvent {
    EnemySpawned,
    EnemyDefeated,
    PlayerDamaged,
    LevelUp,
    StageCompleted,
    WaveCompleted,
    BossAppeared,
    PlayerLowHealth,
    GameOver,
}

impl GameEvent {
    pub const ALL: [GameEvent; 9] = [
        GameEvent::EnemySpawned,
        GameEvent::EnemyDefeated,
        GameEvent::PlayerDamaged,
        GameEvent::LevelUp,
        GameEvent::StageCompleted,
        GameEvent::WaveCompleted,
        GameEvent::BossAppeared,
        GameEvent::PlayerLowHealth,
        GameEvent::GameOver,
    ];

    fn name(&self) -> &'static str {
        match self {
            GameEvent::EnemySpawned => "enemy_spawned",
            GameEvent::EnemyDefeated => "enemy_defeated",
            GameEvent::PlayerDamaged => "player_damaged",
            GameEvent::LevelUp => "level_up",
            GameEvent::StageCompleted => "stage_completed",
            GameEvent::WaveCompleted => "wave_completed",
            GameEvent::BossAppeared => "boss_appeared",
            GameEvent::PlayerLowHealth => "player_low_health",
            GameEvent::GameOver => "game_over",
        }
    }
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for GameEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameEvent::ALL
            .into_iter()
            .find(|event| event.name() == s)
            .ok_or_else(|| format!("unknown game event: {}", s))
    }
}

/// What the engine does when a game event arrives. Every field is optional and
/// the actions that are set are applied in the order: stop, intensity,
/// stinger, transition.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct EventRule {
    pub event: GameEvent,
    /// Added to the current intensity.
    pub intensity: Option<f64>,
    pub stinger: Option<String>,
    pub priority: Option<u32>,
    pub transition: Option<String>,
    /// Play the stinger at maximal priority and switch moods without the
    /// usual fade sequence.
    #[serde(default)]
    pub emergency: bool,
    /// Stop all music and stingers and return to the initial mood.
    #[serde(default)]
    pub stop: bool,
}

/// A mood change triggered by the intensity level.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct IntensityRule {
    /// Fires when intensity rises above this value.
    pub above: Option<f64>,
    /// Fires when intensity falls below this value.
    pub below: Option<f64>,
    /// Only applies while in this mood.
    pub when_in: Option<String>,
    pub transition: String,
}

impl IntensityRule {
    /// Whether the rule fires for the given intensity and mood.
    pub fn matches(&self, intensity: f64, mood: &str) -> bool {
        if let Some(when_in) = &self.when_in {
            if when_in != mood {
                return false;
            }
        }
        let above = self.above.map_or(true, |above| intensity > above);
        let below = self.below.map_or(true, |below| intensity < below);
        (self.above.is_some() || self.below.is_some()) && above && below
    }
}
