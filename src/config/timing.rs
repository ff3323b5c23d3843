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

/// Resolved timing constants, see [`TimingConfig`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Timing {
    pub transition: Duration,
    pub fade_in: Duration,
    pub fade_out: Duration,
    pub stagger: Duration,
    pub grace: Duration,
    pub restart_fade: Duration,
    pub stop_all_fade: Duration,
    pub emergency_fade: Duration,
    pub stinger_grace: Duration,
    pub crossfade_grace: Duration,
    pub crossfade_head_start: f64,
    pub update_interval: Duration,
}

/// A YAML representation of the engine's fade and scheduling constants.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct TimingConfig {
    /// How long a mood transition reports progress for.
    transition: String,
    fade_in: String,
    fade_out: String,
    /// Delay between the fade-in of consecutive instruments.
    stagger: String,
    /// Extra time after a fade before remaining voices are force released.
    grace: String,
    restart_fade: String,
    stop_all_fade: String,
    emergency_fade: String,
    stinger_grace: String,
    crossfade_grace: String,
    /// Fraction of a crossfade after which the incoming side starts.
    crossfade_head_start: f64,
    update_interval: String,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            transition: "3s".into(),
            fade_in: "2s".into(),
            fade_out: "1s".into(),
            stagger: "300ms".into(),
            grace: "100ms".into(),
            restart_fade: "500ms".into(),
            stop_all_fade: "500ms".into(),
            emergency_fade: "100ms".into(),
            stinger_grace: "500ms".into(),
            crossfade_grace: "500ms".into(),
            crossfade_head_start: 0.2,
            update_interval: "100ms".into(),
        }
    }
}

impl TimingConfig {
    /// Parses every duration.
    pub fn resolve(&self) -> Result<Timing, ConfigError> {
        if !(0.0..=1.0).contains(&self.crossfade_head_start) {
            return Err(ConfigError::Invalid(format!(
                "crossfade_head_start must be within [0, 1], got {}",
                self.crossfade_head_start
            )));
        }
        let update_interval = parse_duration(&self.update_interval)?;
        if update_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "update_interval must be longer than zero".into(),
            ));
        }
        Ok(Timing {
            transition: parse_duration(&self.transition)?,
            fade_in: parse_duration(&self.fade_in)?,
            fade_out: parse_duration(&self.fade_out)?,
            stagger: parse_duration(&self.stagger)?,
            grace: parse_duration(&self.grace)?,
            restart_fade: parse_duration(&self.restart_fade)?,
            stop_all_fade: parse_duration(&self.stop_all_fade)?,
            emergency_fade: parse_duration(&self.emergency_fade)?,
            stinger_grace: parse_duration(&self.stinger_grace)?,
            crossfade_grace: parse_duration(&self.crossfade_grace)?,
            crossfade_head_start: self.crossfade_head_start,
            update_interval,
        })
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            transition: Duration::from_secs(3),
            fade_in: Duration::from_secs(2),
            fade_out: Duration::from_secs(1),
            stagger: Duration::from_millis(300),
            grace: Duration::from_millis(100),
            restart_fade: Duration::from_millis(500),
            stop_all_fade: Duration::from_millis(500),
            emergency_fade: Duration::from_millis(100),
            stinger_grace: Duration::from_millis(500),
            crossfade_grace: Duration::from_millis(500),
            crossfade_head_start: 0.2,
            update_interval: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Timing, TimingConfig};

    #[test]
    fn test_resolve_defaults() {
        assert_eq!(Timing::default(), TimingConfig::default().resolve().unwrap());
    }
}
