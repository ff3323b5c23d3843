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
use std::fmt;

use serde::{Deserialize, Serialize};

/// Musical keys with built-in progressions.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MusicalKey {
    #[default]
    #[serde(alias = "Am", alias = "a_minor")]
    Am,
    #[serde(alias = "Fm", alias = "f_minor")]
    Fm,
    #[serde(alias = "Dm", alias = "d_minor")]
    Dm,
    #[serde(alias = "G", alias = "g_major")]
    G,
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MusicalKey::Am => "Am",
            MusicalKey::Fm => "Fm",
            MusicalKey::Dm => "Dm",
            MusicalKey::G => "G",
        };
        write!(f, "{}", name)
    }
}

type Chord = [f64; 3];

const AM_PROGRESSION: [Chord; 4] = [
    [110.0, 146.83, 174.61],
    [87.31, 116.54, 138.59],
    [130.81, 174.61, 207.65],
    [98.0, 130.81, 155.56],
];

const FM_PROGRESSION: [Chord; 4] = [
    [87.31, 116.54, 138.59],
    [82.41, 110.0, 130.81],
    [92.5, 123.47, 146.83],
    [98.0, 130.81, 155.56],
];

const DM_PROGRESSION: [Chord; 4] = [
    [146.83, 196.0, 233.08],
    [110.0, 146.83, 174.61],
    [103.83, 138.59, 164.81],
    [87.31, 116.54, 138.59],
];

const G_PROGRESSION: [Chord; 4] = [
    [196.0, 246.94, 293.66],
    [130.81, 174.61, 207.65],
    [146.83, 196.0, 233.08],
    [110.0, 146.83, 174.61],
];

/// The chord progression for a key, as pitches in Hz.
pub fn chord_progression(key: MusicalKey) -> &'static [Chord] {
    match key {
        MusicalKey::Am => &AM_PROGRESSION,
        MusicalKey::Fm => &FM_PROGRESSION,
        MusicalKey::Dm => &DM_PROGRESSION,
        MusicalKey::G => &G_PROGRESSION,
    }
}

/// The chord at a cyclic position in the key's progression.
pub fn chord_at(key: MusicalKey, index: usize) -> &'static Chord {
    let progression = chord_progression(key);
    &progression[index % progression.len()]
}

/// The bass line for a key.
pub fn bass_line(key: MusicalKey) -> &'static [f64] {
    match key {
        MusicalKey::Am => &[110.0, 87.31, 130.81, 98.0],
        MusicalKey::Fm => &[87.31, 82.41, 92.5, 98.0],
        MusicalKey::Dm => &[146.83, 110.0, 103.83, 87.31],
        MusicalKey::G => &[98.0, 65.41, 73.42, 55.0],
    }
}

/// A single hit in a percussion pattern: the sound to play and its velocity.
pub type Hit = (&'static str, f64);

const SLOW_PERCUSSION: [Option<Hit>; 8] = [
    Some(("cymbal", 0.8)),
    None,
    None,
    None,
    Some(("snare", 0.6)),
    None,
    None,
    None,
];

const MEDIUM_PERCUSSION: [Option<Hit>; 4] = [
    Some(("hihat", 0.4)),
    None,
    Some(("snare", 0.7)),
    Some(("hihat", 0.3)),
];

const FAST_PERCUSSION: [Option<Hit>; 4] = [
    Some(("hihat", 0.5)),
    Some(("hihat", 0.3)),
    Some(("snare", 0.8)),
    Some(("hihat", 0.4)),
];

/// The sixteenth-note percussion pattern for a tempo.
pub fn percussion_pattern(tempo: f64) -> &'static [Option<Hit>] {
    if tempo < 60.0 {
        &SLOW_PERCUSSION
    } else if tempo < 120.0 {
        &MEDIUM_PERCUSSION
    } else {
        &FAST_PERCUSSION
    }
}

const FAST_DRUMS: [&[&str]; 8] = [
    &["kick", "hihat"],
    &["hihat"],
    &["snare", "hihat"],
    &["hihat"],
    &["kick", "hihat"],
    &["hihat"],
    &["snare", "hihat", "crash"],
    &["hihat"],
];

const MEDIUM_DRUMS: [&[&str]; 8] = [
    &["kick"],
    &[],
    &["snare"],
    &[],
    &["kick"],
    &[],
    &["snare"],
    &["hihat"],
];

const SLOW_DRUMS: [&[&str]; 8] = [&["kick"], &[], &[], &[], &["snare"], &[], &[], &[]];

/// The sixteenth-note drum kit pattern for a tempo.
pub fn drum_pattern(tempo: f64) -> &'static [&'static [&'static str]] {
    if tempo >= 160.0 {
        &FAST_DRUMS
    } else if tempo >= 80.0 {
        &MEDIUM_DRUMS
    } else {
        &SLOW_DRUMS
    }
}

/// Shifts a frequency by a number of cents.
pub fn detune(frequency: f64, cents: f64) -> f64 {
    frequency * 2f64.powf(cents / 1200.0)
}

/// Seconds per beat at a tempo.
pub fn beat_length(tempo: f64) -> f64 {
    60.0 / tempo
}

#[cfg(test)]
mod test {
    use super::{bass_line, chord_at, detune, drum_pattern, percussion_pattern, MusicalKey};

    #[test]
    fn test_chords_cycle() {
        assert_eq!(&[110.0, 146.83, 174.61], chord_at(MusicalKey::Am, 0));
        assert_eq!(chord_at(MusicalKey::G, 1), chord_at(MusicalKey::G, 5));
        assert_eq!(&[87.31, 116.54, 138.59], chord_at(MusicalKey::Dm, 3));
    }

    #[test]
    fn test_bass_lines() {
        assert_eq!(146.83, bass_line(MusicalKey::Dm)[0]);
        assert_eq!(55.0, bass_line(MusicalKey::G)[3]);
    }

    #[test]
    fn test_patterns_by_tempo() {
        assert_eq!(8, percussion_pattern(30.0).len());
        assert_eq!(Some(("hihat", 0.4)), percussion_pattern(90.0)[0]);
        assert_eq!(Some(("hihat", 0.5)), percussion_pattern(180.0)[0]);

        assert_eq!(&["kick", "hihat"], drum_pattern(180.0)[0]);
        assert_eq!(&["snare"], drum_pattern(90.0)[2]);
        assert_eq!(&["snare"], drum_pattern(30.0)[4]);
    }

    #[test]
    fn test_detune() {
        assert!((detune(110.0, 1200.0) - 220.0).abs() < 1e-9);
        assert!((detune(110.0, -1200.0) - 55.0).abs() < 1e-9);
        assert_eq!(110.0, detune(110.0, 0.0));
    }
}
