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

/// Usage ratios at which the pool escalates its warning level.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            warning: 0.7,
            critical: 0.85,
            emergency: 0.95,
        }
    }
}

/// How much each usage metric counts towards the warning level.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct MetricWeights {
    pub voices: f64,
    pub memory: f64,
    pub cpu: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        MetricWeights {
            voices: 1.0,
            memory: 1.0,
            cpu: 1.0,
        }
    }
}

/// Blend of the terms making up a role's priority score.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct ScoreWeights {
    pub importance: f64,
    pub frequency: f64,
    pub recency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            importance: 0.8,
            frequency: 0.1,
            recency: 0.1,
        }
    }
}

/// Adaptive limit adjustment.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct Adjustment {
    /// Memory or CPU ratio above which limits are lowered.
    pub threshold: f64,
    /// Upper bound on any single reduction, in percent.
    pub max_percent: f64,
    pub synths_step_percent: f64,
    pub concurrent_step_percent: f64,
    /// Upper bound on a single reduction of the concurrent note limit.
    pub concurrent_step_max: usize,
    pub min_synths: usize,
    pub min_concurrent: usize,
    /// Voice ratio above which maintenance runs more often.
    pub busy_ratio: f64,
    pub interval_factor: f64,
}

impl Default for Adjustment {
    fn default() -> Self {
        Adjustment {
            threshold: 0.8,
            max_percent: 50.0,
            synths_step_percent: 20.0,
            concurrent_step_percent: 30.0,
            concurrent_step_max: 2,
            min_synths: 5,
            min_concurrent: 2,
            busy_ratio: 0.9,
            interval_factor: 0.8,
        }
    }
}

/// Per-role pool policy.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RoleBudget {
    pub role: String,
    /// Importance from 1 to 10.
    pub priority: u8,
    /// How many released voices of this role may be kept for reuse.
    pub max_pooled: Option<usize>,
}

/// A YAML representation of the voice pool budget.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct PoolConfig {
    max_synths: usize,
    max_concurrent_sounds: usize,
    memory_budget_mb: f64,
    thresholds: Thresholds,
    weights: MetricWeights,
    score_weights: ScoreWeights,
    /// Window over which recency decays to zero.
    recency_window: String,
    /// Roles scoring below this may be reclaimed under pressure.
    low_priority_score: f64,
    max_evictions: usize,
    /// Free lists are shrunk to this fraction of their cap when optimizing.
    shrink_ratio: f64,
    cleanup_interval: String,
    min_cleanup_interval: String,
    max_idle_age: String,
    /// Voices younger than this are disposed rather than pooled on release.
    min_pool_lifetime: String,
    adjustment: Adjustment,
    roles: Vec<RoleBudget>,
    default_priority: u8,
    default_max_pooled: usize,
    unpooled_roles: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_synths: 128,
            max_concurrent_sounds: 32,
            memory_budget_mb: 128.0,
            thresholds: Thresholds::default(),
            weights: MetricWeights::default(),
            score_weights: ScoreWeights::default(),
            recency_window: "10m".into(),
            low_priority_score: 30.0,
            max_evictions: 3,
            shrink_ratio: 0.7,
            cleanup_interval: "5s".into(),
            min_cleanup_interval: "2s".into(),
            max_idle_age: "30s".into(),
            min_pool_lifetime: "100ms".into(),
            adjustment: Adjustment::default(),
            roles: Vec::new(),
            default_priority: 1,
            default_max_pooled: 2,
            unpooled_roles: vec!["ui".into()],
        }
    }
}

impl PoolConfig {
    pub fn max_synths(&self) -> usize {
        self.max_synths
    }

    pub fn max_concurrent_sounds(&self) -> usize {
        self.max_concurrent_sounds
    }

    pub fn memory_budget_mb(&self) -> f64 {
        self.memory_budget_mb
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn weights(&self) -> MetricWeights {
        self.weights
    }

    pub fn score_weights(&self) -> ScoreWeights {
        self.score_weights
    }

    pub fn recency_window(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.recency_window)
    }

    pub fn low_priority_score(&self) -> f64 {
        self.low_priority_score
    }

    pub fn max_evictions(&self) -> usize {
        self.max_evictions
    }

    pub fn shrink_ratio(&self) -> f64 {
        self.shrink_ratio
    }

    pub fn cleanup_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.cleanup_interval)
    }

    pub fn min_cleanup_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.min_cleanup_interval)
    }

    pub fn max_idle_age(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.max_idle_age)
    }

    pub fn min_pool_lifetime(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.min_pool_lifetime)
    }

    pub fn adjustment(&self) -> Adjustment {
        self.adjustment
    }

    pub fn roles(&self) -> &[RoleBudget] {
        &self.roles
    }

    pub fn default_priority(&self) -> u8 {
        self.default_priority
    }

    pub fn default_max_pooled(&self) -> usize {
        self.default_max_pooled
    }

    pub fn unpooled_roles(&self) -> &[String] {
        &self.unpooled_roles
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_synths == 0 || self.max_concurrent_sounds == 0 {
            return Err(ConfigError::Invalid(
                "pool limits must be at least 1".into(),
            ));
        }
        let thresholds = self.thresholds;
        if !(0.0 < thresholds.warning
            && thresholds.warning <= thresholds.critical
            && thresholds.critical <= thresholds.emergency)
        {
            return Err(ConfigError::Invalid(format!(
                "pool thresholds must be increasing: {:?}",
                thresholds
            )));
        }
        for role in self.roles.iter() {
            if !(1..=10).contains(&role.priority) {
                return Err(ConfigError::Invalid(format!(
                    "role {} priority must be within 1..=10, got {}",
                    role.role, role.priority
                )));
            }
        }
        if !(1..=10).contains(&self.default_priority) {
            return Err(ConfigError::Invalid(
                "default role priority must be within 1..=10".into(),
            ));
        }
        self.recency_window()?;
        self.cleanup_interval()?;
        self.min_cleanup_interval()?;
        self.max_idle_age()?;
        self.min_pool_lifetime()?;
        Ok(())
    }
}

#[cfg(test)]
impl PoolConfig {
    /// A default budget with a custom voice ceiling (test only).
    pub fn with_max_synths(max_synths: usize) -> PoolConfig {
        PoolConfig {
            max_synths,
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: &str, priority: u8, max_pooled: Option<usize>) -> PoolConfig {
        self.roles.push(RoleBudget {
            role: role.to_string(),
            priority,
            max_pooled,
        });
        self
    }

    pub fn with_max_concurrent_sounds(mut self, max: usize) -> PoolConfig {
        self.max_concurrent_sounds = max;
        self
    }

    pub fn with_memory_budget_mb(mut self, budget: f64) -> PoolConfig {
        self.memory_budget_mb = budget;
        self
    }
}

#[cfg(test)]
mod test {
    use super::PoolConfig;

    #[test]
    fn test_validate() {
        assert!(PoolConfig::default().validate().is_ok());
        assert!(PoolConfig::with_max_synths(0).validate().is_err());
        assert!(PoolConfig::default()
            .with_role("lead", 11, None)
            .validate()
            .is_err());
    }
}
