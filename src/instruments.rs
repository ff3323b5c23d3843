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
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, InstrumentDefinition, MoodParams, Timing},
    engine::{Context, Task},
    error::AudioError,
    pool::VoicePool,
    scheduler::TaskId,
    voice::VoiceHandle,
};

mod patterns;
#[cfg(test)]
mod tests;

pub use self::patterns::{Instrument, NoteSpec, Step};

/// Shortest loop interval, so that a degenerate tempo cannot spin the scheduler.
const MIN_STEP: Duration = Duration::from_millis(1);

/// Timed work owned by the instrument bank.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentTask {
    /// Runs one iteration of a role's loop.
    Step { role: String, generation: u64 },
    /// A note reached the end of its envelope.
    NoteEnd {
        role: String,
        generation: u64,
        note: u64,
    },
    /// Reclaims whatever a stopped performance still holds.
    ForceRelease { role: String, generation: u64 },
}

/// How an instrument should come in.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StartOptions {
    /// Wait before the first step.
    pub delay: Duration,
    /// Ramp notes in from silence over this long.
    pub fade_in: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FadeIn {
    start: Duration,
    length: Duration,
}

impl FadeIn {
    fn gain(&self, at: Duration) -> f64 {
        let elapsed = at.saturating_sub(self.start).as_secs_f64();
        (elapsed / self.length.as_secs_f64()).min(1.0)
    }
}

struct LiveNote {
    id: u64,
    voices: Vec<VoiceHandle>,
    end: Option<TaskId>,
}

/// One run of an instrument's loop. A restart creates a new performance
/// with a new generation, so that tasks left over from the old one are
/// recognised and dropped.
struct Performance {
    role: String,
    generation: u64,
    index: usize,
    /// The next step, or the delayed first step.
    pending: Option<TaskId>,
    /// Oldest first.
    notes: VecDeque<LiveNote>,
    fade_in: Option<FadeIn>,
}

/// Drives every instrument's self-rescheduling loop, turning pattern steps
/// into voices.
pub struct InstrumentBank {
    instruments: HashMap<String, Instrument>,
    playing: HashMap<String, Performance>,
    /// Stopped performances waiting for their force release, oldest first.
    fading: Vec<Performance>,
    params: MoodParams,
    timing: Timing,
    next_generation: u64,
    next_note: u64,
    skipped: u64,
}

impl InstrumentBank {
    pub fn new(
        definitions: &[InstrumentDefinition],
        timing: Timing,
    ) -> Result<InstrumentBank, ConfigError> {
        let instruments = definitions
            .iter()
            .map(|definition| {
                Ok((
                    definition.role().to_string(),
                    Instrument::new(definition.clone())?,
                ))
            })
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;

        Ok(InstrumentBank {
            instruments,
            playing: HashMap::new(),
            fading: Vec::new(),
            params: MoodParams::default(),
            timing,
            next_generation: 0,
            next_note: 0,
            skipped: 0,
        })
    }

    /// Sets the musical parameters that every following step reads.
    pub fn set_params(&mut self, params: MoodParams) {
        self.params = params.clamped();
    }

    pub fn set_intensity(&mut self, intensity: f64) {
        self.params.intensity = intensity.clamp(0.0, 1.0);
    }

    pub fn params(&self) -> MoodParams {
        self.params
    }

    pub fn knows(&self, role: &str) -> bool {
        self.instruments.contains_key(role)
    }

    /// Starts the role's loop. A role that is already playing is faded out
    /// first and replaced.
    pub fn start_instrument(
        &mut self,
        role: &str,
        options: StartOptions,
        cx: &mut Context,
    ) -> Result<(), AudioError> {
        if !self.instruments.contains_key(role) {
            return Err(AudioError::UnknownInstrument(role.to_string()));
        }
        if self.playing.contains_key(role) {
            debug!(role, "Restarting instrument");
            self.stop_instrument(role, self.timing.restart_fade, cx);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let start = cx.now + options.delay;
        let mut performance = Performance {
            role: role.to_string(),
            generation,
            index: 0,
            pending: None,
            notes: VecDeque::new(),
            fade_in: options
                .fade_in
                .filter(|length| !length.is_zero())
                .map(|length| FadeIn { start, length }),
        };

        debug!(role, generation, delay = ?options.delay, "Starting instrument");
        if options.delay.is_zero() {
            self.playing.insert(role.to_string(), performance);
            self.step(role, generation, cx.now, cx);
        } else {
            performance.pending = Some(cx.queue.schedule_at(
                start,
                Task::Instrument(InstrumentTask::Step {
                    role: role.to_string(),
                    generation,
                }),
            ));
            self.playing.insert(role.to_string(), performance);
        }
        Ok(())
    }

    /// Starts the roles one after another, each fading in from silence.
    /// Roles without a definition are skipped. Returns how many started.
    pub fn fade_in_instruments(&mut self, roles: &[String], cx: &mut Context) -> usize {
        self.start_group(roles, self.timing.stagger, Some(self.timing.fade_in), cx)
    }

    /// Starts the roles together at full level.
    pub fn start_instruments(&mut self, roles: &[String], cx: &mut Context) -> usize {
        self.start_group(roles, Duration::ZERO, None, cx)
    }

    fn start_group(
        &mut self,
        roles: &[String],
        stagger: Duration,
        fade_in: Option<Duration>,
        cx: &mut Context,
    ) -> usize {
        let mut started = 0;
        for (i, role) in roles.iter().enumerate() {
            let options = StartOptions {
                delay: stagger * i as u32,
                fade_in,
            };
            match self.start_instrument(role, options, cx) {
                Ok(()) => started += 1,
                Err(e) => warn!(role = role.as_str(), err = %e, "Instrument unavailable"),
            }
        }
        started
    }

    /// Stops the role's loop and fades its sounding notes out. Whatever is
    /// still held once the fade and a grace period have passed is reclaimed.
    pub fn stop_instrument(&mut self, role: &str, fade: Duration, cx: &mut Context) -> bool {
        let Some(mut performance) = self.playing.remove(role) else {
            return false;
        };
        if let Some(pending) = performance.pending.take() {
            cx.queue.cancel(pending);
        }
        for note in performance.notes.iter() {
            for voice in note.voices.iter() {
                cx.pool.ramp(voice, 0.0, cx.now, fade);
            }
        }
        cx.queue.schedule_at(
            cx.now + fade + self.timing.grace,
            Task::Instrument(InstrumentTask::ForceRelease {
                role: role.to_string(),
                generation: performance.generation,
            }),
        );
        debug!(role, generation = performance.generation, fade = ?fade, "Stopping instrument");
        self.fading.push(performance);
        true
    }

    /// Fades out every playing role.
    pub fn fade_out_all(&mut self, fade: Duration, cx: &mut Context) {
        let mut roles: Vec<String> = self.playing.keys().cloned().collect();
        roles.sort();
        for role in roles {
            self.stop_instrument(&role, fade, cx);
        }
    }

    pub fn stop_all(&mut self, cx: &mut Context) {
        self.fade_out_all(self.timing.stop_all_fade, cx);
    }

    /// Cuts every note immediately and forgets all performances.
    pub fn halt(&mut self, cx: &mut Context) {
        let performances = self
            .playing
            .drain()
            .map(|(_, performance)| performance)
            .chain(self.fading.drain(..))
            .collect::<Vec<_>>();
        for mut performance in performances {
            if let Some(pending) = performance.pending.take() {
                cx.queue.cancel(pending);
            }
            for note in performance.notes.drain(..) {
                Self::silence(note, cx);
            }
        }
        cx.queue
            .cancel_where(|task| matches!(task, Task::Instrument(_)));
        info!("Instruments halted");
    }

    pub fn on_task(&mut self, task: InstrumentTask, at: Duration, cx: &mut Context) {
        match task {
            InstrumentTask::Step { role, generation } => self.step(&role, generation, at, cx),
            InstrumentTask::NoteEnd {
                role,
                generation,
                note,
            } => self.end_note(&role, generation, note, cx),
            InstrumentTask::ForceRelease { role, generation } => {
                self.force_release(&role, generation, cx)
            }
        }
    }

    fn step(&mut self, role: &str, generation: u64, at: Duration, cx: &mut Context) {
        let index = match self.playing.get(role) {
            Some(performance) if performance.generation == generation => performance.index,
            _ => return,
        };
        let Some(instrument) = self.instruments.get(role) else {
            return;
        };
        let step = instrument.step(index, &self.params);
        let polyphony = instrument.definition.polyphony();

        let fade_in = match self.playing.get_mut(role) {
            Some(performance) => {
                performance.pending = None;
                performance.index = (index + 1) % step.pattern_len.max(1);
                performance.fade_in
            }
            None => return,
        };

        for note in step.notes {
            self.trigger(role, generation, note, at, fade_in, polyphony, cx);
        }

        if let Some(performance) = self.playing.get_mut(role) {
            performance.pending = Some(cx.queue.schedule_at(
                at + step.interval.max(MIN_STEP),
                Task::Instrument(InstrumentTask::Step {
                    role: role.to_string(),
                    generation,
                }),
            ));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn trigger(
        &mut self,
        role: &str,
        generation: u64,
        note: NoteSpec,
        at: Duration,
        fade_in: Option<FadeIn>,
        polyphony: usize,
        cx: &mut Context,
    ) {
        let mut voices = Vec::with_capacity(note.voices.len());
        for config in note.voices.iter() {
            match cx.pool.acquire(role, config, cx.now) {
                Ok(handle) => voices.push(handle),
                Err(e) => {
                    warn!(role, err = %e, "Skipping note");
                    for handle in voices.iter() {
                        cx.pool.release(handle, cx.now);
                    }
                    self.skipped += 1;
                    return;
                }
            }
        }

        // Only make room once the new note is certain to sound.
        while self.live_notes(role) >= polyphony {
            if !self.evict_oldest(role, cx) {
                break;
            }
        }

        let start = at + note.onset;
        for (handle, config) in voices.iter().zip(note.voices.iter()) {
            let mut points = config.envelope.points(note.length, config.amplitude);
            if let Some(fade_in) = fade_in {
                for point in points.iter_mut() {
                    point.gain *= fade_in.gain(start + point.at);
                }
            }
            if let Err(e) = cx.pool.schedule(handle, start, &points) {
                warn!(role, err = %e, "Unable to schedule note");
            }
        }

        let id = self.next_note;
        self.next_note += 1;
        let end = cx.queue.schedule_at(
            start + note.length,
            Task::Instrument(InstrumentTask::NoteEnd {
                role: role.to_string(),
                generation,
                note: id,
            }),
        );
        if let Some(performance) = self.playing.get_mut(role) {
            performance.notes.push_back(LiveNote {
                id,
                voices,
                end: Some(end),
            });
        }
    }

    fn performance_mut(&mut self, role: &str, generation: u64) -> Option<&mut Performance> {
        if let Some(performance) = self
            .playing
            .get_mut(role)
            .filter(|performance| performance.generation == generation)
        {
            return Some(performance);
        }
        self.fading
            .iter_mut()
            .find(|performance| performance.role == role && performance.generation == generation)
    }

    fn end_note(&mut self, role: &str, generation: u64, note: u64, cx: &mut Context) {
        let Some(performance) = self.performance_mut(role, generation) else {
            return;
        };
        let Some(position) = performance.notes.iter().position(|live| live.id == note) else {
            return;
        };
        if let Some(live) = performance.notes.remove(position) {
            for voice in live.voices.iter() {
                cx.pool.release(voice, cx.now);
            }
        }
    }

    fn force_release(&mut self, role: &str, generation: u64, cx: &mut Context) {
        let Some(position) = self
            .fading
            .iter()
            .position(|performance| {
                performance.role == role && performance.generation == generation
            })
        else {
            return;
        };
        let mut performance = self.fading.remove(position);
        let held = performance.notes.len();
        for note in performance.notes.drain(..) {
            if let Some(end) = note.end {
                cx.queue.cancel(end);
            }
            for voice in note.voices.iter() {
                cx.pool.release(voice, cx.now);
            }
        }
        if held > 0 {
            debug!(role, generation, held, "Force released notes");
        }
    }

    /// Cuts the role's oldest sounding note, looking at stopped performances
    /// before the playing one.
    fn evict_oldest(&mut self, role: &str, cx: &mut Context) -> bool {
        let oldest = self
            .fading
            .iter_mut()
            .filter(|performance| performance.role == role)
            .find_map(|performance| performance.notes.pop_front())
            .or_else(|| {
                self.playing
                    .get_mut(role)
                    .and_then(|performance| performance.notes.pop_front())
            });
        match oldest {
            Some(note) => {
                Self::silence(note, cx);
                true
            }
            None => false,
        }
    }

    fn silence(note: LiveNote, cx: &mut Context) {
        if let Some(end) = note.end {
            cx.queue.cancel(end);
        }
        for voice in note.voices.iter() {
            cx.pool.evict(voice, cx.now);
        }
    }

    /// Periodic housekeeping: forgets notes whose voices the pool has
    /// reclaimed and sheds notes from the least important roles while more
    /// are sounding than the pool allows. Returns how many notes were shed.
    pub fn update(&mut self, cx: &mut Context) -> usize {
        let Context { pool, queue, .. } = cx;
        for performance in self.playing.values_mut().chain(self.fading.iter_mut()) {
            performance.notes.retain(|note| {
                let live = note.voices.iter().any(|voice| pool.is_live(voice));
                if !live {
                    if let Some(end) = note.end {
                        queue.cancel(end);
                    }
                }
                live
            });
        }

        let cap = cx.pool.max_concurrent_sounds();
        let mut shed = 0;
        while self.total_notes() > cap {
            let Some(role) = self.least_important(cx.pool) else {
                break;
            };
            if !self.evict_oldest(&role, cx) {
                break;
            }
            shed += 1;
        }
        if shed > 0 {
            debug!(shed, cap, "Shed notes over the concurrency cap");
        }
        shed
    }

    /// The sounding role with the lowest pool priority, preferring the one
    /// with the most notes on ties.
    fn least_important(&self, pool: &VoicePool) -> Option<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for performance in self.playing.values().chain(self.fading.iter()) {
            if !performance.notes.is_empty() {
                *counts.entry(performance.role.as_str()).or_default() += performance.notes.len();
            }
        }
        counts
            .into_iter()
            .min_by(|(a, a_count), (b, b_count)| {
                pool.priority(a)
                    .cmp(&pool.priority(b))
                    .then(b_count.cmp(a_count))
                    .then(a.cmp(b))
            })
            .map(|(role, _)| role.to_string())
    }

    pub fn is_playing(&self, role: &str) -> bool {
        self.playing.contains_key(role)
    }

    /// Roles with a running loop, sorted.
    pub fn playing_roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.playing.keys().map(String::as_str).collect();
        roles.sort();
        roles
    }

    /// Sounding notes for the role, including notes still fading out.
    pub fn live_notes(&self, role: &str) -> usize {
        self.playing
            .get(role)
            .into_iter()
            .chain(self.fading.iter().filter(|performance| performance.role == role))
            .map(|performance| performance.notes.len())
            .sum()
    }

    /// Voices the role still holds from the pool.
    pub fn live_voices(&self, role: &str, pool: &VoicePool) -> usize {
        self.playing
            .get(role)
            .into_iter()
            .chain(self.fading.iter().filter(|performance| performance.role == role))
            .flat_map(|performance| performance.notes.iter())
            .flat_map(|note| note.voices.iter())
            .filter(|voice| pool.is_live(voice))
            .count()
    }

    pub fn total_notes(&self) -> usize {
        self.playing
            .values()
            .chain(self.fading.iter())
            .map(|performance| performance.notes.len())
            .sum()
    }

    /// Stopped performances that have not been force released yet.
    pub fn fading_count(&self) -> usize {
        self.fading.len()
    }

    /// Notes dropped because the pool refused a voice.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
