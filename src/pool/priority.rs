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
use std::{collections::HashMap, time::Duration};

use crate::config::{ConfigError, PoolConfig, ScoreWeights};

const MAX_SCORE: f64 = 100.0;
/// Recency score for roles that have never been used.
const UNSEEN_RECENCY: f64 = 50.0;
/// Amplifies a role's share of allocations before capping at the max score.
const FREQUENCY_GAIN: f64 = 10.0;

/// Per-role importance and usage history, ranked into a priority score.
pub struct PriorityTable {
    priorities: HashMap<String, u8>,
    max_pooled: HashMap<String, usize>,
    default_priority: u8,
    default_max_pooled: usize,
    weights: ScoreWeights,
    recency_window: Duration,
    created: HashMap<String, u64>,
    total_created: u64,
    last_used: HashMap<String, Duration>,
}

impl PriorityTable {
    pub fn new(config: &PoolConfig) -> Result<PriorityTable, ConfigError> {
        let mut priorities = HashMap::new();
        let mut max_pooled = HashMap::new();
        for role in config.roles() {
            priorities.insert(role.role.clone(), role.priority);
            if let Some(max) = role.max_pooled {
                max_pooled.insert(role.role.clone(), max);
            }
        }
        Ok(PriorityTable {
            priorities,
            max_pooled,
            default_priority: config.default_priority(),
            default_max_pooled: config.default_max_pooled(),
            weights: config.score_weights(),
            recency_window: config.recency_window()?,
            created: HashMap::new(),
            total_created: 0,
            last_used: HashMap::new(),
        })
    }

    /// The static importance of a role, 1 to 10.
    pub fn priority(&self, role: &str) -> u8 {
        self.priorities
            .get(role)
            .copied()
            .unwrap_or(self.default_priority)
    }

    /// How many released voices of a role may be kept.
    pub fn max_pooled(&self, role: &str) -> usize {
        self.max_pooled
            .get(role)
            .copied()
            .unwrap_or(self.default_max_pooled)
    }

    /// Notes that a voice was created for the role.
    pub fn record_created(&mut self, role: &str, now: Duration) {
        *self.created.entry(role.to_string()).or_default() += 1;
        self.total_created += 1;
        self.record_used(role, now);
    }

    /// Notes that the role used a voice.
    pub fn record_used(&mut self, role: &str, now: Duration) {
        self.last_used.insert(role.to_string(), now);
    }

    fn frequency(&self, role: &str) -> f64 {
        if self.total_created == 0 {
            return 0.0;
        }
        let created = self.created.get(role).copied().unwrap_or(0) as f64;
        (created / self.total_created as f64 * MAX_SCORE * FREQUENCY_GAIN).min(MAX_SCORE)
    }

    fn recency(&self, role: &str, now: Duration) -> f64 {
        match self.last_used.get(role) {
            Some(last) => {
                let since = now.saturating_sub(*last).as_secs_f64();
                let window = self.recency_window.as_secs_f64().max(f64::EPSILON);
                (MAX_SCORE - since / window * MAX_SCORE).max(0.0)
            }
            None => UNSEEN_RECENCY,
        }
    }

    /// Scores a role from 0 to 100. Importance dominates; recent and frequent
    /// use nudge the score up.
    pub fn score(&self, role: &str, now: Duration) -> f64 {
        let importance = self.priority(role) as f64 * 10.0;
        let score = importance * self.weights.importance
            + self.frequency(role) * self.weights.frequency
            + self.recency(role, now) * self.weights.recency;
        score.clamp(0.0, MAX_SCORE)
    }
}
