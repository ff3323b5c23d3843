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
use std::{collections::VecDeque, fmt, time::Duration};

use serde::Serialize;

use crate::config::{Adjustment, ConfigError, MetricWeights, PoolConfig, Thresholds};

/// Estimated memory per active voice, in MB.
const ACTIVE_VOICE_MB: f64 = 2.0 * 0.5;
/// Estimated memory per pooled voice, in MB.
const POOLED_VOICE_MB: f64 = 1.5 * 0.5;
/// Share of the CPU estimate driven by the live voice ratio.
const CPU_VOICE_SHARE: f64 = 60.0;
/// Share of the CPU estimate driven by allocation churn.
const CPU_ACTIVITY_SHARE: f64 = 20.0;
/// Number of recent samples the churn estimate looks at.
const ACTIVITY_WINDOW: usize = 5;
const MAX_HISTORY: usize = 100;

/// How close the pool is to its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl WarningLevel {
    /// The lowest role priority still allowed to acquire voices.
    pub fn min_priority(&self) -> u8 {
        match self {
            WarningLevel::Normal | WarningLevel::Warning => 0,
            WarningLevel::Critical => 5,
            WarningLevel::Emergency => 7,
        }
    }

    /// Advice logged when the level is reached.
    pub fn recommendations(&self) -> &'static [&'static str] {
        match self {
            WarningLevel::Normal => &[],
            WarningLevel::Warning => &[
                "reduce the number of simultaneous instruments",
                "shorten drone and pad note lengths",
            ],
            WarningLevel::Critical => &[
                "low priority roles are being rejected",
                "consider lowering max_synths or instrument polyphony",
            ],
            WarningLevel::Emergency => &[
                "only high priority roles may acquire voices",
                "stop background instruments until usage recovers",
            ],
        }
    }

    /// Ordinal used in numeric diagnostics.
    pub fn as_f64(&self) -> f64 {
        *self as u8 as f64
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WarningLevel::Normal => "normal",
            WarningLevel::Warning => "warning",
            WarningLevel::Critical => "critical",
            WarningLevel::Emergency => "emergency",
        };
        write!(f, "{}", name)
    }
}

/// A snapshot of estimated resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub active: usize,
    pub pooled: usize,
    pub voice_ratio: f64,
    pub memory_mb: f64,
    pub memory_ratio: f64,
    pub cpu_percent: f64,
    pub cpu_ratio: f64,
    pub level: WarningLevel,
}

/// Limits changed by an adaptive adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitChange {
    pub max_synths: usize,
    pub max_concurrent_sounds: usize,
    pub cleanup_interval: Duration,
}

/// The voice pool's limits and usage estimation.
pub struct ResourceBudget {
    max_synths: usize,
    max_concurrent_sounds: usize,
    memory_budget_mb: f64,
    thresholds: Thresholds,
    weights: MetricWeights,
    adjustment: Adjustment,
    cleanup_interval: Duration,
    min_cleanup_interval: Duration,
    /// Active voice counts sampled at each maintenance pass.
    history: VecDeque<usize>,
}

impl ResourceBudget {
    pub fn new(config: &PoolConfig) -> Result<ResourceBudget, ConfigError> {
        Ok(ResourceBudget {
            max_synths: config.max_synths(),
            max_concurrent_sounds: config.max_concurrent_sounds(),
            memory_budget_mb: config.memory_budget_mb(),
            thresholds: config.thresholds(),
            weights: config.weights(),
            adjustment: config.adjustment(),
            cleanup_interval: config.cleanup_interval()?,
            min_cleanup_interval: config.min_cleanup_interval()?,
            history: VecDeque::with_capacity(MAX_HISTORY),
        })
    }

    pub fn max_synths(&self) -> usize {
        self.max_synths
    }

    pub fn max_concurrent_sounds(&self) -> usize {
        self.max_concurrent_sounds
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Records an active voice count sample.
    pub fn record(&mut self, active: usize) {
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(active);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Allocation churn over the last few samples, in [0, 1].
    fn recent_activity(&self) -> f64 {
        let recent: Vec<usize> = self
            .history
            .iter()
            .rev()
            .take(ACTIVITY_WINDOW)
            .copied()
            .collect();
        if recent.len() < 2 {
            return 0.0;
        }
        let changes: usize = recent.windows(2).map(|w| w[0].abs_diff(w[1])).sum();
        (changes as f64 / (recent.len() * ACTIVITY_WINDOW) as f64).min(1.0)
    }

    /// Estimates usage for the given voice counts.
    pub fn usage(&self, active: usize, pooled: usize) -> ResourceUsage {
        let voice_ratio = active as f64 / self.max_synths.max(1) as f64;
        let memory_mb = active as f64 * ACTIVE_VOICE_MB + pooled as f64 * POOLED_VOICE_MB;
        let memory_ratio = if self.memory_budget_mb > 0.0 {
            memory_mb / self.memory_budget_mb
        } else {
            0.0
        };
        let cpu_percent = (active as f64 / self.max_synths.max(1) as f64) * CPU_VOICE_SHARE
            + self.recent_activity() * CPU_ACTIVITY_SHARE;
        let cpu_ratio = cpu_percent / 100.0;

        let pressure = (voice_ratio * self.weights.voices)
            .max(memory_ratio * self.weights.memory)
            .max(cpu_ratio * self.weights.cpu);
        let level = if pressure >= self.thresholds.emergency {
            WarningLevel::Emergency
        } else if pressure >= self.thresholds.critical {
            WarningLevel::Critical
        } else if pressure >= self.thresholds.warning {
            WarningLevel::Warning
        } else {
            WarningLevel::Normal
        };

        ResourceUsage {
            active,
            pooled,
            voice_ratio,
            memory_mb,
            memory_ratio,
            cpu_percent,
            cpu_ratio,
            level,
        }
    }

    /// Lowers limits when memory or CPU run hot. Limits only ever go down.
    pub fn adjust(&mut self, usage: &ResourceUsage) -> Option<LimitChange> {
        let adjustment = self.adjustment;
        let mut changed = false;

        if usage.memory_ratio > adjustment.threshold {
            let percent = adjustment.synths_step_percent.min(adjustment.max_percent);
            let step = ((self.max_synths as f64 * percent / 100.0).floor() as usize).max(1);
            let lowered = self
                .max_synths
                .saturating_sub(step)
                .max(adjustment.min_synths);
            if lowered < self.max_synths {
                self.max_synths = lowered;
                changed = true;
            }
        }

        if usage.cpu_ratio > adjustment.threshold {
            let percent = adjustment.concurrent_step_percent.min(adjustment.max_percent);
            let step = ((self.max_concurrent_sounds as f64 * percent / 100.0).ceil() as usize)
                .min(adjustment.concurrent_step_max)
                .max(1);
            let lowered = self
                .max_concurrent_sounds
                .saturating_sub(step)
                .max(adjustment.min_concurrent);
            if lowered < self.max_concurrent_sounds {
                self.max_concurrent_sounds = lowered;
                changed = true;
            }
        }

        if usage.voice_ratio > adjustment.busy_ratio && usage.level != WarningLevel::Emergency {
            let shortened = self
                .cleanup_interval
                .mul_f64(adjustment.interval_factor)
                .max(self.min_cleanup_interval);
            if shortened < self.cleanup_interval {
                self.cleanup_interval = shortened;
                changed = true;
            }
        }

        changed.then_some(LimitChange {
            max_synths: self.max_synths,
            max_concurrent_sounds: self.max_concurrent_sounds,
            cleanup_interval: self.cleanup_interval,
        })
    }
}
