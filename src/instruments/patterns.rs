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

use crate::{
    config::{InstrumentDefinition, MoodParams, PatternKind, Voicing},
    envelope::Envelope,
    music::{self, MusicalKey},
    voice::{PolyphonyClass, VoiceConfig, Waveform},
};

/// Tempo assumed when the playing mood has none, e.g. while silent.
const FALLBACK_TEMPO: f64 = 60.0;

/// One note to trigger: a voice per partial, all sharing onset and length.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteSpec {
    pub voices: Vec<VoiceConfig>,
    /// Delay from the step's fire time.
    pub onset: Duration,
    pub length: Duration,
}

/// Everything one loop iteration produces.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub notes: Vec<NoteSpec>,
    /// Time until the next iteration.
    pub interval: Duration,
    /// Length of the pattern the step index cycles through.
    pub pattern_len: usize,
}

/// A definition with its durations resolved.
#[derive(Debug, Clone)]
pub struct Instrument {
    pub definition: InstrumentDefinition,
    pub hold: Option<Duration>,
    pub layer_onsets: Vec<Duration>,
}

impl Instrument {
    pub fn new(definition: InstrumentDefinition) -> Result<Instrument, crate::config::ConfigError> {
        definition.validate()?;
        let hold = definition.hold()?;
        let layer_onsets = definition
            .layers()
            .iter()
            .map(|layer| layer.onset())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Instrument {
            definition,
            hold,
            layer_onsets,
        })
    }

    fn key(&self, params: &MoodParams) -> MusicalKey {
        params.key.unwrap_or_else(|| self.definition.key())
    }

    fn voice(&self, frequency: f64, amplitude: f64, polyphony: PolyphonyClass) -> VoiceConfig {
        VoiceConfig {
            waveform: self.definition.waveform(),
            frequency,
            amplitude: amplitude.clamp(0.0, 1.0),
            envelope: *self.definition.envelope(),
            polyphony,
            detune_cents: 0.0,
            effects: self.definition.effects().to_vec(),
        }
    }

    /// A note voicing every partial of the instrument on one pitch.
    fn partial_note(
        &self,
        frequency: f64,
        level: f64,
        polyphony: PolyphonyClass,
        detune_cents: f64,
        onset: Duration,
        length: Duration,
    ) -> NoteSpec {
        let voices = self
            .definition
            .partials()
            .iter()
            .map(|partial| VoiceConfig {
                detune_cents,
                ..self.voice(frequency * partial.ratio, level * partial.amplitude, polyphony)
            })
            .collect();
        NoteSpec {
            voices,
            onset,
            length,
        }
    }

    /// Produces the notes for step `index` of the instrument's pattern.
    pub fn step(&self, index: usize, params: &MoodParams) -> Step {
        let tempo = if params.tempo > 0.0 {
            params.tempo
        } else {
            FALLBACK_TEMPO
        };
        let beat = music::beat_length(tempo);
        let beats = Duration::from_secs_f64(beat * self.definition.beats_per_step());
        let level = params.volume * self.definition.gain();
        let key = self.key(params);

        match self.definition.kind() {
            PatternKind::HarmonicChord => {
                let chord = music::chord_at(key, index);
                let tones = match self.definition.voicing() {
                    Voicing::Triad => chord.to_vec(),
                    Voicing::Power => vec![chord[0], chord[0] * 1.5, chord[0] * 2.0],
                };
                let notes = tones
                    .into_iter()
                    .map(|tone| {
                        self.partial_note(
                            tone,
                            level,
                            PolyphonyClass::Polyphonic,
                            0.0,
                            Duration::ZERO,
                            beats,
                        )
                    })
                    .collect();
                Step {
                    notes,
                    interval: beats,
                    pattern_len: music::chord_progression(key).len(),
                }
            }
            PatternKind::BassLine => {
                let line = music::bass_line(key);
                let note = self.partial_note(
                    line[index % line.len()],
                    level,
                    PolyphonyClass::Monophonic,
                    0.0,
                    Duration::ZERO,
                    beats,
                );
                Step {
                    notes: vec![note],
                    interval: beats,
                    pattern_len: line.len(),
                }
            }
            PatternKind::PadDrone | PatternKind::BrassChord => {
                let interval = self.hold.unwrap_or(beats);
                let chord = music::chord_at(key, index);
                let layers: Vec<(f64, f64, Duration)> = if self.definition.layers().is_empty() {
                    vec![(0.0, 1.0, Duration::ZERO)]
                } else {
                    self.definition
                        .layers()
                        .iter()
                        .zip(self.layer_onsets.iter())
                        .map(|(layer, onset)| (layer.detune_cents, layer.amplitude, *onset))
                        .filter(|(_, _, onset)| *onset < interval)
                        .collect()
                };
                let mut notes = Vec::with_capacity(chord.len() * layers.len());
                for (detune, amplitude, onset) in layers.iter() {
                    for tone in chord.iter() {
                        notes.push(self.partial_note(
                            *tone,
                            level * amplitude,
                            PolyphonyClass::Polyphonic,
                            *detune,
                            *onset,
                            interval - *onset,
                        ));
                    }
                }
                Step {
                    notes,
                    interval,
                    pattern_len: music::chord_progression(key).len(),
                }
            }
            PatternKind::OrchestralChord => {
                let interval = self.hold.unwrap_or(beats);
                let chord = music::chord_at(key, index);
                let base = *self.definition.envelope();
                let mut notes = Vec::new();
                for section in self.definition.sections() {
                    let envelope = Envelope {
                        attack: base.attack + section.attack_offset,
                        ..base
                    };
                    for tone in chord.iter() {
                        let voices = section
                            .ratios
                            .iter()
                            .enumerate()
                            .map(|(i, ratio)| VoiceConfig {
                                envelope,
                                detune_cents: section.detune_cents,
                                ..self.voice(
                                    tone * ratio,
                                    level / (i + 1) as f64,
                                    PolyphonyClass::Polyphonic,
                                )
                            })
                            .collect();
                        notes.push(NoteSpec {
                            voices,
                            onset: Duration::ZERO,
                            length: interval,
                        });
                    }
                }
                Step {
                    notes,
                    interval,
                    pattern_len: music::chord_progression(key).len(),
                }
            }
            PatternKind::PercussionLoop => {
                let pattern = music::percussion_pattern(tempo);
                let hits: Vec<(&str, f64)> = pattern[index % pattern.len()].into_iter().collect();
                Step {
                    notes: self.hits(&hits, level, params.intensity),
                    interval: beats,
                    pattern_len: pattern.len(),
                }
            }
            PatternKind::DrumKit => {
                let pattern = music::drum_pattern(tempo);
                let hits: Vec<(&str, f64)> = pattern[index % pattern.len()]
                    .iter()
                    .map(|name| (*name, 1.0))
                    .collect();
                Step {
                    notes: self.hits(&hits, level, params.intensity),
                    interval: beats,
                    pattern_len: pattern.len(),
                }
            }
        }
    }

    /// One single-voice note per percussive hit. Sounds missing from the
    /// instrument's table are skipped.
    fn hits(&self, hits: &[(&str, f64)], level: f64, intensity: f64) -> Vec<NoteSpec> {
        let drive = 0.5 + 0.5 * intensity.clamp(0.0, 1.0);
        hits.iter()
            .filter_map(|(name, velocity)| {
                let sound = self.definition.sound(name)?;
                let length = Duration::from_secs_f64(sound.decay);
                let voice = VoiceConfig {
                    waveform: if sound.noise {
                        Waveform::Noise
                    } else {
                        Waveform::Sine
                    },
                    envelope: Envelope::percussive(sound.decay),
                    ..self.voice(
                        sound.frequency,
                        level * sound.volume * velocity * drive,
                        PolyphonyClass::Monophonic,
                    )
                };
                Some(NoteSpec {
                    voices: vec![voice],
                    onset: Duration::ZERO,
                    length,
                })
            })
            .collect()
    }
}
