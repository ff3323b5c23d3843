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

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    config::{
        EngineConfig, GameEvent, MoodOverrides, MoodParams, SequencePhase, StingerOptions, Timing,
    },
    diagnostics::{DiagnosticRecord, DiagnosticsSink, RecordKind},
    error::AudioError,
    instruments::{InstrumentBank, InstrumentTask, StartOptions},
    moods::{MoodChange, MoodInfo, MoodStateMachine, TransitionRecord},
    pool::{MaintenanceReport, PoolStats, ResourceUsage, VoicePool},
    scheduler::{Scheduler, TaskId},
    sink::Sink,
    stingers::{StingerEngine, StingerInfo, StingerTask, EMERGENCY_PRIORITY},
};


/// Everything the engine schedules on its clock.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Instrument(InstrumentTask),
    Stinger(StingerTask),
    /// Moves a running mood sequence on to its next phase.
    SequencePhase { sequence: u64, phase: usize },
    PoolMaintenance,
    Update,
}

/// What a component needs to act at a point in time: the time itself, the
/// voice pool and the task queue.
pub struct Context<'a> {
    pub now: Duration,
    pub pool: &'a mut VoicePool,
    pub queue: &'a mut Scheduler<Task>,
}

/// How a mood change is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    /// Fade out, then bring instruments in one after another.
    Normal,
    /// Short fade out, everything in at once.
    Emergency,
}

struct RunningSequence {
    id: u64,
    name: String,
    phases: Vec<(String, Duration, MoodOverrides)>,
    looping: bool,
    pending: Option<TaskId>,
}

/// A snapshot of the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    /// Seconds on the engine clock.
    pub time: f64,
    pub mood: MoodInfo,
    pub instruments: Vec<String>,
    pub stingers: Vec<StingerInfo>,
    pub crossfades: Vec<TransitionRecord>,
    pub sequence: Option<String>,
    pub usage: ResourceUsage,
    pub stats: PoolStats,
    pub degraded: bool,
}

/// The adaptive music engine.
///
/// Nothing happens on its own: the host calls [`MusicEngine::tick`] from its
/// loop, and every task that has come due on the clock runs at its own fire
/// time.
pub struct MusicEngine {
    config: EngineConfig,
    timing: Timing,
    clock: Box<dyn Clock>,
    diagnostics: Box<dyn DiagnosticsSink>,
    pool: VoicePool,
    queue: Scheduler<Task>,
    bank: InstrumentBank,
    stingers: StingerEngine,
    moods: MoodStateMachine,
    sequence: Option<RunningSequence>,
    next_sequence: u64,
    degraded: bool,
    reported_skips: u64,
}

impl MusicEngine {
    pub fn new(
        config: EngineConfig,
        clock: Box<dyn Clock>,
        sink: Box<dyn Sink>,
        diagnostics: Box<dyn DiagnosticsSink>,
    ) -> Result<MusicEngine, AudioError> {
        config.validate()?;
        let timing = config.timing()?;
        let pool = VoicePool::new(config.pool(), sink)?;
        let mut bank = InstrumentBank::new(config.instruments(), timing)?;
        let stingers = StingerEngine::new(config.stingers(), timing)?;
        let moods = MoodStateMachine::new(&config, timing.transition);
        bank.set_params(moods.params());

        let now = clock.now();
        let mut queue = Scheduler::new();
        queue.schedule_at(now + timing.update_interval, Task::Update);
        queue.schedule_at(now + pool.cleanup_interval(), Task::PoolMaintenance);
        let degraded = pool.is_degraded();

        info!(
            moods = config.moods().len(),
            instruments = config.instruments().len(),
            stingers = config.stingers().len(),
            mood = moods.current(),
            "Music engine ready"
        );
        Ok(MusicEngine {
            config,
            timing,
            clock,
            diagnostics,
            pool,
            queue,
            bank,
            stingers,
            moods,
            sequence: None,
            next_sequence: 0,
            degraded,
            reported_skips: 0,
        })
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Runs every task that is due. Returns how many ran.
    pub fn tick(&mut self) -> usize {
        let now = self.clock.now();
        self.pool.poll_context();
        self.note_degraded(now);

        let mut ran = 0;
        while let Some((at, _, task)) = self.queue.pop_due(now) {
            let at = self.catch_up(&task, at, now);
            self.run(task, at);
            ran += 1;
        }
        self.note_degraded(now);
        ran
    }

    /// When the next task is due, so that a host can sleep until then.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.queue.next_fire_time()
    }

    /// Loops that fell more than an update interval behind resume from the
    /// present instead of replaying every iteration they missed.
    fn catch_up(&self, task: &Task, at: Duration, now: Duration) -> Duration {
        if at + self.timing.update_interval >= now {
            return at;
        }
        match task {
            Task::Instrument(InstrumentTask::Step { role, .. }) => {
                debug!(role, behind = ?(now - at), "Instrument loop fell behind, skipping ahead");
                now
            }
            Task::Update | Task::PoolMaintenance => now,
            _ => at,
        }
    }

    fn run(&mut self, task: Task, at: Duration) {
        match task {
            Task::Instrument(task) => {
                let mut cx = Context {
                    now: at,
                    pool: &mut self.pool,
                    queue: &mut self.queue,
                };
                self.bank.on_task(task, at, &mut cx);
            }
            Task::Stinger(task) => {
                let mut cx = Context {
                    now: at,
                    pool: &mut self.pool,
                    queue: &mut self.queue,
                };
                if let Some(record) = self.stingers.on_task(task, at, &mut self.bank, &mut cx) {
                    self.diagnostics.record(
                        DiagnosticRecord::new(at, RecordKind::Crossfade)
                            .label("from", record.from.as_str())
                            .label("to", record.to.as_str())
                            .value("progress", record.progress),
                    );
                }
            }
            Task::SequencePhase { sequence, phase } => self.advance_sequence(sequence, phase, at),
            Task::PoolMaintenance => {
                let report = self.pool.maintain(at);
                self.report_maintenance(&report, at);
                self.queue
                    .schedule_at(at + self.pool.cleanup_interval(), Task::PoolMaintenance);
            }
            Task::Update => {
                self.moods.update(at);
                let mut cx = Context {
                    now: at,
                    pool: &mut self.pool,
                    queue: &mut self.queue,
                };
                let shed = self.bank.update(&mut cx);
                if shed > 0 {
                    self.diagnostics.record(
                        DiagnosticRecord::new(at, RecordKind::NotesShed)
                            .value("notes", shed as f64),
                    );
                }
                let skipped = self.bank.skipped() + self.stingers.skipped();
                if skipped > self.reported_skips {
                    self.diagnostics.record(
                        DiagnosticRecord::new(at, RecordKind::NoteSkipped)
                            .value("notes", (skipped - self.reported_skips) as f64)
                            .value("total", skipped as f64),
                    );
                    self.reported_skips = skipped;
                }
                self.queue
                    .schedule_at(at + self.timing.update_interval, Task::Update);
            }
        }
    }

    fn report_maintenance(&self, report: &MaintenanceReport, at: Duration) {
        let stats = report.stats;
        self.diagnostics.record(
            DiagnosticRecord::new(at, RecordKind::PoolStats)
                .value("hit_rate", stats.hit_rate())
                .value("created", stats.created as f64)
                .value("reused", stats.reused as f64)
                .value("disposed", stats.disposed as f64)
                .value("evicted", stats.evicted as f64)
                .value("rejected", stats.rejected as f64)
                .value("expired", report.expired as f64),
        );
        let usage = report.usage;
        self.diagnostics.record(
            DiagnosticRecord::new(at, RecordKind::ResourceUsage)
                .label("level", usage.level.to_string())
                .value("active", usage.active as f64)
                .value("pooled", usage.pooled as f64)
                .value("voice_ratio", usage.voice_ratio)
                .value("memory_mb", usage.memory_mb)
                .value("cpu_percent", usage.cpu_percent)
                .value("level", usage.level.as_f64()),
        );
        if let Some(limits) = report.limits {
            self.diagnostics.record(
                DiagnosticRecord::new(at, RecordKind::LimitsAdjusted)
                    .value("max_synths", limits.max_synths as f64)
                    .value("max_concurrent_sounds", limits.max_concurrent_sounds as f64)
                    .value("cleanup_interval", limits.cleanup_interval.as_secs_f64())
                    .value("trimmed", report.trimmed as f64),
            );
        }
    }

    fn note_degraded(&mut self, now: Duration) {
        let degraded = self.pool.is_degraded();
        if degraded == self.degraded {
            return;
        }
        self.degraded = degraded;
        let kind = if degraded {
            RecordKind::Degraded
        } else {
            RecordKind::Recovered
        };
        self.diagnostics.record(DiagnosticRecord::new(now, kind));
    }

    /// Changes mood. Returns false, leaving everything as it was, when the
    /// mood is unknown or the change is not allowed from the current mood.
    pub fn transition_to(&mut self, target: &str, overrides: &MoodOverrides) -> bool {
        let now = self.clock.now();
        self.change_mood(target, overrides, Style::Normal, now)
    }

    fn change_mood(
        &mut self,
        target: &str,
        overrides: &MoodOverrides,
        style: Style,
        now: Duration,
    ) -> bool {
        match self.moods.transition_to(target, overrides, now) {
            Ok(change) => {
                self.apply(change, style, now);
                true
            }
            Err(e) => {
                self.diagnostics.record(
                    DiagnosticRecord::new(now, RecordKind::TransitionRejected)
                        .label("from", self.moods.current())
                        .label("to", target)
                        .label("reason", e.to_string()),
                );
                false
            }
        }
    }

    fn apply(&mut self, change: MoodChange, style: Style, now: Duration) {
        self.bank.set_params(change.params);
        if change.refresh {
            return;
        }

        let mut cx = Context {
            now,
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        if change.fade_out {
            let fade = match style {
                Style::Normal => self.timing.fade_out,
                Style::Emergency => self.timing.emergency_fade,
            };
            self.bank.fade_out_all(fade, &mut cx);
        }
        match style {
            Style::Normal => self.bank.fade_in_instruments(&change.fade_in, &mut cx),
            Style::Emergency => self.bank.start_instruments(&change.fade_in, &mut cx),
        };

        self.diagnostics.record(
            DiagnosticRecord::new(now, RecordKind::Transition)
                .label("from", change.from.as_str())
                .label("to", change.to.as_str())
                .value("tempo", change.params.tempo)
                .value("intensity", change.params.intensity)
                .value("volume", change.params.volume)
                .value("emergency", if style == Style::Emergency { 1.0 } else { 0.0 }),
        );
    }

    /// Plays a stinger at maximal priority and switches mood at once, with a
    /// short fade out and no stagger. The transition table still applies;
    /// returns whether the mood changed.
    pub fn emergency(&mut self, stinger: Option<&str>, target: Option<&str>) -> bool {
        let now = self.clock.now();
        if let Some(stinger) = stinger {
            let options = StingerOptions::priority(EMERGENCY_PRIORITY);
            if let Err(e) = self.play_stinger(stinger, &options) {
                warn!(stinger, err = %e, "Unable to play emergency stinger");
            }
        }
        match target {
            Some(target) => {
                self.change_mood(target, &MoodOverrides::default(), Style::Emergency, now)
            }
            None => false,
        }
    }

    /// Reacts to a game event according to the configured rules.
    /// Returns false when no rule mentions the event.
    pub fn handle_event(&mut self, event: GameEvent) -> bool {
        let rules: Vec<_> = self.config.events_for(event).cloned().collect();
        if rules.is_empty() {
            debug!(event = %event, "No rule for game event");
            return false;
        }
        debug!(event = %event, rules = rules.len(), "Game event");

        for rule in rules {
            if rule.stop {
                self.stop();
                continue;
            }
            if let Some(delta) = rule.intensity {
                self.adjust_intensity(delta);
            }
            if rule.emergency {
                self.emergency(rule.stinger.as_deref(), rule.transition.as_deref());
                continue;
            }
            if let Some(stinger) = rule.stinger.as_deref() {
                let options = StingerOptions {
                    priority: rule.priority,
                    volume: None,
                };
                if let Err(e) = self.play_stinger(stinger, &options) {
                    warn!(event = %event, stinger, err = %e, "Unable to play stinger");
                }
            }
            if let Some(target) = rule.transition.as_deref() {
                self.transition_to(target, &MoodOverrides::default());
            }
        }
        true
    }

    /// Shifts the intensity and applies any intensity rule that now matches.
    pub fn adjust_intensity(&mut self, delta: f64) -> f64 {
        let intensity = self.moods.params().intensity + delta;
        self.set_intensity(intensity)
    }

    pub fn set_intensity(&mut self, intensity: f64) -> f64 {
        let intensity = self.moods.set_intensity(intensity);
        self.bank.set_intensity(intensity);

        let current = self.moods.current().to_string();
        let target = self
            .config
            .intensity_rules()
            .iter()
            .find(|rule| rule.transition != current && rule.matches(intensity, &current))
            .map(|rule| rule.transition.clone());
        if let Some(target) = target {
            debug!(intensity, from = current, to = target, "Intensity rule matched");
            self.transition_to(&target, &MoodOverrides::default());
        }
        intensity
    }

    pub fn play_stinger(
        &mut self,
        name: &str,
        options: &StingerOptions,
    ) -> Result<u64, AudioError> {
        let now = self.clock.now();
        let mut cx = Context {
            now,
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        let instance = self.stingers.play_stinger(name, options, &mut cx)?;
        let priority = self
            .stingers
            .active_stingers()
            .iter()
            .find(|info| info.instance == instance)
            .map_or(0, |info| info.priority);
        self.diagnostics.record(
            DiagnosticRecord::new(now, RecordKind::StingerStarted)
                .label("name", name)
                .value("priority", priority as f64)
                .value("instance", instance as f64),
        );
        Ok(instance)
    }

    pub fn stop_stinger(&mut self, name: &str) -> bool {
        let now = self.clock.now();
        let mut cx = Context {
            now,
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        let stopped = self.stingers.stop_stinger(name, &mut cx);
        if stopped {
            self.diagnostics
                .record(DiagnosticRecord::new(now, RecordKind::StingerStopped).label("name", name));
        }
        stopped
    }

    pub fn stop_all_stingers(&mut self) -> usize {
        let now = self.clock.now();
        let mut cx = Context {
            now,
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        let stopped = self.stingers.stop_all_stingers(&mut cx);
        if stopped > 0 {
            self.diagnostics.record(
                DiagnosticRecord::new(now, RecordKind::StingerStopped)
                    .value("stingers", stopped as f64),
            );
        }
        stopped
    }

    /// Fades the `from` role out while bringing `to` in.
    pub fn crossfade(
        &mut self,
        from: &str,
        to: &str,
        duration: Duration,
    ) -> Result<(), AudioError> {
        let now = self.clock.now();
        let mut cx = Context {
            now,
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        self.stingers
            .crossfade(from, to, duration, &mut self.bank, &mut cx)?;
        self.diagnostics.record(
            DiagnosticRecord::new(now, RecordKind::Crossfade)
                .label("from", from)
                .label("to", to)
                .value("duration", duration.as_secs_f64())
                .value("progress", 0.0),
        );
        Ok(())
    }

    pub fn start_instrument(
        &mut self,
        role: &str,
        options: StartOptions,
    ) -> Result<(), AudioError> {
        let mut cx = Context {
            now: self.clock.now(),
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        self.bank.start_instrument(role, options, &mut cx)
    }

    pub fn stop_instrument(&mut self, role: &str, fade: Duration) -> bool {
        let mut cx = Context {
            now: self.clock.now(),
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        self.bank.stop_instrument(role, fade, &mut cx)
    }

    pub fn stop_all_instruments(&mut self) {
        let mut cx = Context {
            now: self.clock.now(),
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        self.bank.stop_all(&mut cx);
    }

    /// Plays a configured mood sequence, replacing any running one.
    pub fn play_sequence(&mut self, name: &str) -> Result<(), AudioError> {
        let sequence = self
            .config
            .sequence(name)
            .ok_or_else(|| AudioError::UnknownSequence(name.to_string()))?;
        let phases = sequence.phases().to_vec();
        let looping = sequence.looping();
        self.play_phases(name, &phases, looping)
    }

    /// Steps through the phases, each a mood held for its duration.
    pub fn play_phases(
        &mut self,
        name: &str,
        phases: &[SequencePhase],
        looping: bool,
    ) -> Result<(), AudioError> {
        let phases = phases
            .iter()
            .map(|phase| {
                if self.moods.mood(phase.mood()).is_none() {
                    return Err(AudioError::UnknownMood(phase.mood().to_string()));
                }
                Ok((phase.mood().to_string(), phase.duration()?, *phase.overrides()))
            })
            .collect::<Result<Vec<_>, AudioError>>()?;
        if phases.is_empty() {
            return Err(AudioError::InvalidConfig(format!(
                "sequence {} has no phases",
                name
            )));
        }

        self.stop_sequence();
        let id = self.next_sequence;
        self.next_sequence += 1;
        info!(sequence = name, phases = phases.len(), looping, "Playing mood sequence");
        self.sequence = Some(RunningSequence {
            id,
            name: name.to_string(),
            phases,
            looping,
            pending: None,
        });
        let now = self.clock.now();
        self.advance_sequence(id, 0, now);
        Ok(())
    }

    fn advance_sequence(&mut self, id: u64, phase: usize, at: Duration) {
        let Some(sequence) = self.sequence.as_ref().filter(|sequence| sequence.id == id) else {
            return;
        };
        let phase = if phase < sequence.phases.len() {
            phase
        } else if sequence.looping {
            0
        } else {
            debug!(sequence = sequence.name, "Mood sequence finished");
            self.sequence = None;
            return;
        };
        let (mood, duration, overrides) = sequence.phases[phase].clone();

        if !self.change_mood(&mood, &overrides, Style::Normal, at) {
            warn!(sequence = id, mood, "Mood sequence phase was rejected");
        }
        let pending = self.queue.schedule_at(
            at + duration,
            Task::SequencePhase {
                sequence: id,
                phase: phase + 1,
            },
        );
        if let Some(sequence) = self.sequence.as_mut() {
            sequence.pending = Some(pending);
        }
    }

    pub fn stop_sequence(&mut self) {
        if let Some(sequence) = self.sequence.take() {
            if let Some(pending) = sequence.pending {
                self.queue.cancel(pending);
            }
            debug!(sequence = sequence.name, "Mood sequence stopped");
        }
    }

    /// Stops the music: the sequence, every stinger and instrument, and
    /// returns to the initial mood.
    pub fn stop(&mut self) {
        let now = self.clock.now();
        self.stop_sequence();
        self.stop_all_stingers();
        self.stop_all_instruments();
        let change = self.moods.reset(now);
        self.bank.set_params(change.params);
        self.diagnostics.record(
            DiagnosticRecord::new(now, RecordKind::Transition)
                .label("from", change.from.as_str())
                .label("to", change.to.as_str())
                .value("tempo", change.params.tempo)
                .value("intensity", change.params.intensity)
                .value("volume", change.params.volume)
                .value("emergency", 0.0),
        );
        info!(from = change.from, "Music stopped");
    }

    /// Cuts every sound at once and frees all voices.
    pub fn shutdown(&mut self) {
        self.stop_sequence();
        let mut cx = Context {
            now: self.clock.now(),
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        self.stingers.halt(&mut cx);
        self.bank.halt(&mut cx);
        self.pool.dispose_all();
        self.queue.clear();
        info!(stats = ?self.pool.stats(), "Music engine shut down");
    }

    /// Tells the engine whether the audio context is usable.
    pub fn set_context_ready(&mut self, ready: bool) {
        self.pool.set_context_ready(ready);
        let now = self.clock.now();
        self.note_degraded(now);
    }

    /// Scales stingers started from now on.
    pub fn set_master_volume(&mut self, volume: f64) {
        self.stingers.set_master_volume(volume);
    }

    pub fn current_mood(&self) -> &str {
        self.moods.current()
    }

    pub fn mood_info(&self) -> MoodInfo {
        self.moods.info()
    }

    pub fn available_transitions(&self) -> Vec<String> {
        self.moods.available_transitions()
    }

    pub fn transition_history(&self) -> Vec<TransitionRecord> {
        self.moods.history().cloned().collect()
    }

    /// The parameters every instrument currently plays with.
    pub fn globals(&self) -> MoodParams {
        self.bank.params()
    }

    pub fn active_roles(&self) -> Vec<&str> {
        self.bank.playing_roles()
    }

    pub fn live_notes(&self, role: &str) -> usize {
        self.bank.live_notes(role)
    }

    pub fn live_voices(&self, role: &str) -> usize {
        self.bank.live_voices(role, &self.pool)
    }

    pub fn active_stingers(&self) -> Vec<StingerInfo> {
        self.stingers.active_stingers()
    }

    pub fn crossfades(&self) -> Vec<TransitionRecord> {
        self.stingers.crossfades(self.clock.now())
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn is_degraded(&self) -> bool {
        self.pool.is_degraded()
    }

    pub fn status(&self) -> EngineStatus {
        let now = self.clock.now();
        let mut mood = self.moods.info();
        if let Some(running) = self.moods.history().last().filter(|_| mood.transitioning) {
            let mut running = running.clone();
            running.advance(now);
            mood.progress = running.progress;
        }
        EngineStatus {
            time: now.as_secs_f64(),
            mood,
            instruments: self
                .bank
                .playing_roles()
                .into_iter()
                .map(String::from)
                .collect(),
            stingers: self.stingers.active_stingers(),
            crossfades: self.stingers.crossfades(now),
            sequence: self.sequence.as_ref().map(|sequence| sequence.name.clone()),
            usage: self.pool.usage(),
            stats: self.pool.stats(),
            degraded: self.pool.is_degraded(),
        }
    }
}
