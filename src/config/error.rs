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
use crate::error::AudioError;

/// Typed error for config load/parse failures so callers can distinguish
/// e.g. file-not-found from parse errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for AudioError {
    fn from(e: ConfigError) -> Self {
        AudioError::InvalidConfig(e.to_string())
    }
}

/// Parses a human readable duration such as `300ms` or `2s`.
pub fn parse_duration(value: &str) -> Result<std::time::Duration, ConfigError> {
    duration_string::DurationString::from_string(value.to_string())
        .map(Into::into)
        .map_err(|e| ConfigError::Duration {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::parse_duration;

    #[test]
    fn test_parse_duration() {
        assert_eq!(Duration::from_millis(300), parse_duration("300ms").unwrap());
        assert_eq!(Duration::from_secs(30), parse_duration("30s").unwrap());
        assert_eq!(Duration::from_secs(600), parse_duration("10m").unwrap());
        assert!(parse_duration("soon").is_err());
    }
}
