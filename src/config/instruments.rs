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
use crate::{
    envelope::Envelope,
    music::MusicalKey,
    voice::{Effect, Waveform},
};

/// The generator that drives an instrument's note loop.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Plays the key's chord progression, one chord per step.
    HarmonicChord,
    /// Holds long, layered chords.
    PadDrone,
    /// Tempo-dependent noise percussion.
    PercussionLoop,
    /// A full kit pattern (kick, snare, hi-hat, crash).
    DrumKit,
    /// One bass note per step.
    BassLine,
    /// Chords split across string sections.
    OrchestralChord,
    /// Sustained brass chords.
    BrassChord,
}

impl PatternKind {
    /// Whether the kind plays pitched partials rather than a sound table.
    pub fn is_harmonic(&self) -> bool {
        !matches!(self, PatternKind::PercussionLoop | PatternKind::DrumKit)
    }

    /// Beats per loop step when not configured.
    pub fn default_beats_per_step(&self) -> f64 {
        match self {
            PatternKind::HarmonicChord => 4.0,
            PatternKind::BassLine => 1.0,
            PatternKind::PercussionLoop | PatternKind::DrumKit => 0.25,
            PatternKind::PadDrone | PatternKind::OrchestralChord | PatternKind::BrassChord => 8.0,
        }
    }
}

/// How chord tones are picked from the progression.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Voicing {
    /// All three chord tones.
    #[default]
    Triad,
    /// The chord root, its fifth and its octave.
    Power,
}

/// One harmonic of a pitched note.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct Partial {
    pub ratio: f64,
    pub amplitude: f64,
}

/// An entry in a percussive sound table.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct PercussiveSound {
    pub name: String,
    pub frequency: f64,
    pub decay: f64,
    pub volume: f64,
    #[serde(default)]
    pub noise: bool,
}

/// A detuned copy of every note, optionally entering late.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Layer {
    #[serde(default)]
    pub detune_cents: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    onset: Option<String>,
}

impl Layer {
    pub fn onset(&self) -> Result<Duration, ConfigError> {
        self.onset
            .as_deref()
            .map(parse_duration)
            .unwrap_or(Ok(Duration::ZERO))
    }
}

#[cfg(test)]
impl Layer {
    pub fn new(detune_cents: f64, amplitude: f64, onset: Option<&str>) -> Layer {
        Layer {
            detune_cents,
            amplitude,
            onset: onset.map(|s| s.to_string()),
        }
    }
}

/// An orchestral section playing each chord tone with its own partials.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Section {
    pub name: String,
    pub ratios: Vec<f64>,
    #[serde(default)]
    pub detune_cents: f64,
    /// Extra attack time in seconds, added on top of the envelope.
    #[serde(default)]
    pub attack_offset: f64,
}

/// Finite and above zero. NaN and infinities never pass.
fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn default_amplitude() -> f64 {
    1.0
}

fn default_polyphony() -> usize {
    4
}

fn default_gain() -> f64 {
    0.3
}

/// A YAML representation of an instrument.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct InstrumentDefinition {
    /// The instrument role, used by moods and the voice pool.
    role: String,

    /// The generator that drives this instrument.
    kind: PatternKind,

    /// Maximum simultaneous notes.
    #[serde(default = "default_polyphony")]
    polyphony: usize,

    /// The amplitude envelope of pitched notes.
    #[serde(default)]
    envelope: Envelope,

    #[serde(default)]
    waveform: Waveform,

    /// Overall level applied to every note.
    #[serde(default = "default_gain")]
    gain: f64,

    #[serde(default)]
    partials: Vec<Partial>,

    #[serde(default)]
    sounds: Vec<PercussiveSound>,

    #[serde(default)]
    layers: Vec<Layer>,

    #[serde(default)]
    sections: Vec<Section>,

    #[serde(default)]
    voicing: Voicing,

    /// Beats per loop step. Ignored when `hold` is set.
    beats_per_step: Option<f64>,

    /// Fixed note length for drones, independent of tempo.
    hold: Option<String>,

    /// Key to use when the mood does not set one.
    key: Option<MusicalKey>,

    #[serde(default)]
    effects: Vec<Effect>,
}

impl InstrumentDefinition {
    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// The partials of a pitched note; a lone fundamental when none are configured.
    pub fn partials(&self) -> Vec<Partial> {
        if self.partials.is_empty() {
            vec![Partial {
                ratio: 1.0,
                amplitude: 1.0,
            }]
        } else {
            self.partials.clone()
        }
    }

    pub fn sounds(&self) -> &[PercussiveSound] {
        &self.sounds
    }

    pub fn sound(&self, name: &str) -> Option<&PercussiveSound> {
        self.sounds.iter().find(|sound| sound.name == name)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn voicing(&self) -> Voicing {
        self.voicing
    }

    pub fn beats_per_step(&self) -> f64 {
        self.beats_per_step
            .unwrap_or_else(|| self.kind.default_beats_per_step())
    }

    pub fn hold(&self) -> Result<Option<Duration>, ConfigError> {
        self.hold.as_deref().map(parse_duration).transpose()
    }

    pub fn key(&self) -> MusicalKey {
        self.key.unwrap_or_default()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Checks the definition for values that could never be played.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| {
            Err(ConfigError::Invalid(format!(
                "instrument {}: {}",
                self.role, reason
            )))
        };

        if self.role.is_empty() {
            return invalid("role must not be empty".into());
        }
        if self.polyphony == 0 {
            return invalid("polyphony must be at least 1".into());
        }
        if let Err(e) = self.envelope.validate() {
            return invalid(e.to_string());
        }
        if !(0.0..=1.0).contains(&self.gain) {
            return invalid(format!("gain must be within [0, 1], got {}", self.gain));
        }
        if let Some(beats) = self.beats_per_step {
            if !beats.is_finite() || beats <= 0.0 {
                return invalid(format!("beats_per_step must be positive, got {}", beats));
            }
        }
        if let Some(hold) = self.hold()? {
            if hold.is_zero() {
                return invalid("hold must be longer than zero".into());
            }
        }
        for layer in &self.layers {
            layer.onset()?;
            if !layer.detune_cents.is_finite() || !(0.0..=1.0).contains(&layer.amplitude) {
                return invalid(format!("invalid layer {:?}", layer));
            }
        }
        for effect in &self.effects {
            if let Err(e) = effect.validate() {
                return invalid(e.to_string());
            }
        }

        if self.kind.is_harmonic() {
            if !self.sounds.is_empty() {
                return invalid("pitched instruments cannot declare sounds".into());
            }
            for partial in &self.partials {
                if !positive(partial.ratio) || !(0.0..=1.0).contains(&partial.amplitude) {
                    return invalid(format!("invalid partial {:?}", partial));
                }
            }
            if self.kind == PatternKind::OrchestralChord && self.sections.is_empty() {
                return invalid("orchestral instruments need at least one section".into());
            }
            for section in &self.sections {
                if section.ratios.is_empty()
                    || !section.ratios.iter().copied().all(positive)
                    || !section.detune_cents.is_finite()
                    || !section.attack_offset.is_finite()
                    || section.attack_offset < 0.0
                {
                    return invalid(format!("invalid section {}", section.name));
                }
            }
        } else {
            if self.sounds.is_empty() {
                return invalid("percussive instruments need a sound table".into());
            }
            for sound in &self.sounds {
                if !positive(sound.frequency)
                    || !positive(sound.decay)
                    || !(0.0..=1.0).contains(&sound.volume)
                {
                    return invalid(format!("invalid sound {}", sound.name));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl InstrumentDefinition {
    /// Creates a pitched instrument (test only).
    pub fn pitched(role: &str, kind: PatternKind, polyphony: usize, envelope: Envelope) -> Self {
        InstrumentDefinition {
            role: role.to_string(),
            kind,
            polyphony,
            envelope,
            waveform: Waveform::Sine,
            gain: default_gain(),
            partials: Vec::new(),
            sounds: Vec::new(),
            layers: Vec::new(),
            sections: Vec::new(),
            voicing: Voicing::Triad,
            beats_per_step: None,
            hold: None,
            key: None,
            effects: Vec::new(),
        }
    }

    /// Creates a percussive instrument (test only).
    pub fn percussive(role: &str, kind: PatternKind, sounds: Vec<PercussiveSound>) -> Self {
        InstrumentDefinition {
            sounds,
            ..Self::pitched(role, kind, 4, Envelope::default())
        }
    }

    pub fn with_partials(mut self, partials: Vec<Partial>) -> Self {
        self.partials = partials;
        self
    }

    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_sections(mut self, sections: Vec<Section>) -> Self {
        self.sections = sections;
        self
    }

    pub fn with_beats_per_step(mut self, beats: f64) -> Self {
        self.beats_per_step = Some(beats);
        self
    }

    pub fn with_hold(mut self, hold: &str) -> Self {
        self.hold = Some(hold.to_string());
        self
    }

    pub fn with_voicing(mut self, voicing: Voicing) -> Self {
        self.voicing = voicing;
        self
    }
}

#[cfg(test)]
mod test {
    use super::{InstrumentDefinition, Layer, Partial, PatternKind, PercussiveSound, Section};
    use crate::{envelope::Envelope, voice::Effect};

    fn pad() -> InstrumentDefinition {
        InstrumentDefinition::pitched("pad", PatternKind::PadDrone, 8, Envelope::default())
    }

    fn chords(polyphony: usize) -> InstrumentDefinition {
        InstrumentDefinition::pitched(
            "guitar",
            PatternKind::HarmonicChord,
            polyphony,
            Envelope::default(),
        )
    }

    fn kick() -> PercussiveSound {
        PercussiveSound {
            name: "kick".into(),
            frequency: 60.0,
            decay: 0.1,
            volume: 0.8,
            noise: false,
        }
    }

    #[test]
    fn test_validate() {
        let guitar = chords(4);
        assert!(guitar.validate().is_ok());
        assert_eq!(4.0, guitar.beats_per_step());
        assert_eq!(1, guitar.partials().len());

        assert!(chords(0).validate().is_err());

        let bad_envelope = InstrumentDefinition::pitched(
            "pad",
            PatternKind::PadDrone,
            8,
            Envelope::new(1.0, 1.0, 2.0, 1.0),
        );
        assert!(bad_envelope.validate().is_err());

        let drums = InstrumentDefinition::percussive("drums", PatternKind::DrumKit, vec![kick()]);
        assert!(drums.validate().is_ok());
        assert!(drums.sound("kick").is_some());
        assert!(drums.sound("cowbell").is_none());

        let no_sounds = InstrumentDefinition::percussive("drums", PatternKind::DrumKit, vec![]);
        assert!(no_sounds.validate().is_err());

        let orchestra = InstrumentDefinition::pitched(
            "strings",
            PatternKind::OrchestralChord,
            12,
            Envelope::default(),
        );
        assert!(orchestra.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_numbers() {
        for (frequency, decay, volume) in [
            (60.0, f64::INFINITY, 0.8),
            (60.0, f64::NAN, 0.8),
            (f64::INFINITY, 0.1, 0.8),
            (f64::NAN, 0.1, 0.8),
            (60.0, 0.1, f64::NAN),
        ] {
            let sound = PercussiveSound {
                frequency,
                decay,
                volume,
                ..kick()
            };
            let drums =
                InstrumentDefinition::percussive("drums", PatternKind::DrumKit, vec![sound]);
            assert!(drums.validate().is_err(), "{} {} {}", frequency, decay, volume);
        }

        for ratio in [f64::NAN, f64::INFINITY, 0.0] {
            let guitar = chords(4).with_partials(vec![Partial {
                ratio,
                amplitude: 1.0,
            }]);
            assert!(guitar.validate().is_err(), "ratio {}", ratio);
        }
    }

    #[test]
    fn test_validate_sections() {
        let section = |ratios: Vec<f64>, detune_cents: f64, attack_offset: f64| Section {
            name: "violin".into(),
            ratios,
            detune_cents,
            attack_offset,
        };
        let strings = |section: Section| {
            InstrumentDefinition::pitched(
                "strings",
                PatternKind::OrchestralChord,
                12,
                Envelope::default(),
            )
            .with_sections(vec![section])
        };

        assert!(strings(section(vec![1.0, 2.0], -3.0, 0.1)).validate().is_ok());
        assert!(strings(section(vec![1.0], 0.0, -1.0)).validate().is_err());
        assert!(strings(section(vec![1.0], 0.0, f64::NAN)).validate().is_err());
        assert!(strings(section(vec![], 0.0, 0.0)).validate().is_err());
        assert!(strings(section(vec![-1.0], 0.0, 0.0)).validate().is_err());
        assert!(strings(section(vec![f64::INFINITY], 0.0, 0.0)).validate().is_err());
        assert!(strings(section(vec![1.0], f64::NAN, 0.0)).validate().is_err());
    }

    #[test]
    fn test_validate_layers_and_effects() {
        let layered = |layer: Layer| pad().with_layers(vec![layer]);
        assert!(layered(Layer::new(12.0, 0.6, Some("2s"))).validate().is_ok());
        assert!(layered(Layer::new(f64::NAN, 0.6, None)).validate().is_err());
        assert!(layered(Layer::new(0.0, 1.5, None)).validate().is_err());
        assert!(layered(Layer::new(0.0, f64::NAN, None)).validate().is_err());

        let mut guitar = chords(4);
        guitar.effects.push(Effect::Distortion { amount: 70.0 });
        assert!(guitar.validate().is_ok());
        guitar.effects.push(Effect::Filter {
            frequency: -200.0,
            q: 1.0,
        });
        assert!(guitar.validate().is_err());
    }

    #[test]
    fn test_hold() {
        let pad = pad().with_hold("30s");
        assert_eq!(Some(std::time::Duration::from_secs(30)), pad.hold().unwrap());

        let bad = self::pad().with_hold("forever");
        assert!(bad.validate().is_err());
    }
}
