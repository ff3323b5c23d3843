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

use crate::error::AudioError;

/// The attack time used for percussive hits.
const PERCUSSIVE_ATTACK: f64 = 0.001;

/// A gain automation breakpoint, relative to the start of a note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainPoint {
    pub at: Duration,
    pub gain: f64,
}

/// An ADSR envelope. All times are in seconds, sustain is a level in [0, 1].
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.3,
        }
    }
}

impl Envelope {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Envelope {
        Envelope {
            attack,
            decay,
            sustain,
            release,
        }
    }

    /// A near-instant attack followed by a decay to silence.
    pub fn percussive(decay: f64) -> Envelope {
        Envelope {
            attack: PERCUSSIVE_ATTACK,
            decay,
            sustain: 0.0,
            release: 0.0,
        }
    }

    /// Checks that the envelope describes something playable.
    pub fn validate(&self) -> Result<(), AudioError> {
        for (name, value) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AudioError::InvalidConfig(format!(
                    "envelope {} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if !self.sustain.is_finite() || !(0.0..=1.0).contains(&self.sustain) {
            return Err(AudioError::InvalidConfig(format!(
                "envelope sustain must be within [0, 1], got {}",
                self.sustain
            )));
        }
        Ok(())
    }

    /// Computes the gain breakpoints for a note of the given length peaking
    /// at `peak`. The release always completes at the end of the note; stages
    /// that do not fit are compressed so that breakpoints never go backwards.
    pub fn points(&self, length: Duration, peak: f64) -> Vec<GainPoint> {
        let length = length.as_secs_f64();
        let attack_end = self.attack.min(length);
        let decay_end = (self.attack + self.decay).min(length);
        let release_start = (length - self.release).max(decay_end);
        let sustain = peak * self.sustain;

        let mut points = vec![
            (0.0, 0.0),
            (attack_end, peak),
            (decay_end, sustain),
            (release_start, sustain),
            (length, 0.0),
        ];
        points.dedup_by(|b, a| a.0 == b.0 && a.1 == b.1);
        points
            .into_iter()
            .map(|(at, gain)| GainPoint {
                at: Duration::from_secs_f64(at),
                gain,
            })
            .collect()
    }
}
