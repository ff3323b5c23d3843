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
use std::{collections::HashMap, time::Duration};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, StingerDefinition, StingerOptions, StingerParams, Timing},
    engine::{Context, Task},
    envelope::Envelope,
    error::AudioError,
    instruments::{InstrumentBank, StartOptions},
    moods::TransitionRecord,
    scheduler::TaskId,
    voice::{PolyphonyClass, VoiceConfig, VoiceHandle},
};

/// The pool role every stinger voice is acquired under.
pub const STINGER_ROLE: &str = "stinger";

/// Priority used by emergency stingers.
pub const EMERGENCY_PRIORITY: u32 = u32::MAX;

const NOTE_ATTACK: f64 = 0.05;
const NOTE_RELEASE: f64 = 0.1;

/// Timed work owned by the stinger engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StingerTask {
    Note { instance: u64, index: usize },
    Cleanup { instance: u64 },
    CrossfadeIn { id: u64 },
    CrossfadeComplete { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
struct CueNote {
    frequency: f64,
    at: Duration,
    length: Duration,
}

/// A definition with its durations resolved.
struct Cue {
    definition: StingerDefinition,
    duration: Duration,
    notes: Vec<CueNote>,
}

impl Cue {
    fn new(definition: &StingerDefinition) -> Result<Cue, ConfigError> {
        definition.validate()?;
        let notes = definition
            .notes()
            .iter()
            .map(|note| {
                Ok(CueNote {
                    frequency: note.frequency(),
                    at: note.at()?,
                    length: note.length()?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Cue {
            duration: definition.duration()?,
            definition: definition.clone(),
            notes,
        })
    }
}

struct PlayingStinger {
    instance: u64,
    name: String,
    params: StingerParams,
    started: Duration,
    voices: Vec<VoiceHandle>,
    /// Pending note tasks.
    notes: Vec<TaskId>,
    cleanup: TaskId,
    stopping: bool,
}

/// A snapshot of a playing stinger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StingerInfo {
    pub instance: u64,
    pub name: String,
    pub priority: u32,
    /// Seconds on the engine clock.
    pub started: f64,
}

struct Crossfade {
    id: u64,
    from: String,
    to: String,
    fade_in: Duration,
    record: TransitionRecord,
}

/// Plays one-shot cues over the music and crossfades between instrument
/// roles.
pub struct StingerEngine {
    cues: HashMap<String, Cue>,
    /// In order of arrival.
    playing: Vec<PlayingStinger>,
    crossfades: Vec<Crossfade>,
    timing: Timing,
    master_volume: f64,
    next_instance: u64,
    next_crossfade: u64,
    skipped: u64,
}

impl StingerEngine {
    pub fn new(
        definitions: &[StingerDefinition],
        timing: Timing,
    ) -> Result<StingerEngine, ConfigError> {
        let cues = definitions
            .iter()
            .map(|definition| Ok((definition.name().to_string(), Cue::new(definition)?)))
            .collect::<Result<HashMap<_, _>, ConfigError>>()?;
        Ok(StingerEngine {
            cues,
            playing: Vec::new(),
            crossfades: Vec::new(),
            timing,
            master_volume: 1.0,
            next_instance: 0,
            next_crossfade: 0,
            skipped: 0,
        })
    }

    /// Scales the peak of every stinger note started from now on.
    pub fn set_master_volume(&mut self, volume: f64) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub fn knows(&self, name: &str) -> bool {
        self.cues.contains_key(name)
    }

    /// Starts a stinger. Playing stingers of strictly lower priority are cut
    /// immediately, as is an earlier instance of the same stinger; anything
    /// else keeps playing alongside. Returns the new instance id.
    pub fn play_stinger(
        &mut self,
        name: &str,
        options: &StingerOptions,
        cx: &mut Context,
    ) -> Result<u64, AudioError> {
        let Some(cue) = self.cues.get(name) else {
            return Err(AudioError::UnknownStinger(name.to_string()));
        };
        let params = cue.definition.merged(options);
        let duration = cue.duration;
        let onsets: Vec<Duration> = cue.notes.iter().map(|note| note.at).collect();

        let (cut, kept): (Vec<_>, Vec<_>) = self
            .playing
            .drain(..)
            .partition(|stinger| stinger.params.priority < params.priority || stinger.name == name);
        self.playing = kept;
        for stinger in cut {
            debug!(
                name = stinger.name,
                priority = stinger.params.priority,
                by = name,
                "Cutting stinger"
            );
            Self::cut(stinger, cx);
        }

        let instance = self.next_instance;
        self.next_instance += 1;
        let cleanup = cx.queue.schedule_at(
            cx.now + duration + self.timing.stinger_grace,
            Task::Stinger(StingerTask::Cleanup { instance }),
        );
        self.playing.push(PlayingStinger {
            instance,
            name: name.to_string(),
            params,
            started: cx.now,
            voices: Vec::new(),
            notes: Vec::new(),
            cleanup,
            stopping: false,
        });

        for (index, onset) in onsets.into_iter().enumerate() {
            if onset.is_zero() {
                self.trigger(instance, index, cx.now, cx);
            } else {
                let task = cx.queue.schedule_at(
                    cx.now + onset,
                    Task::Stinger(StingerTask::Note { instance, index }),
                );
                if let Some(stinger) = self.instance_mut(instance) {
                    stinger.notes.push(task);
                }
            }
        }

        info!(name, priority = params.priority, instance, "Playing stinger");
        Ok(instance)
    }

    fn instance_mut(&mut self, instance: u64) -> Option<&mut PlayingStinger> {
        self.playing
            .iter_mut()
            .find(|stinger| stinger.instance == instance)
    }

    fn trigger(&mut self, instance: u64, index: usize, at: Duration, cx: &mut Context) {
        let master_volume = self.master_volume;
        let Some(stinger) = self
            .playing
            .iter_mut()
            .find(|stinger| stinger.instance == instance && !stinger.stopping)
        else {
            return;
        };
        let Some(cue) = self.cues.get(&stinger.name) else {
            return;
        };
        let Some(note) = cue.notes.get(index) else {
            return;
        };

        let config = VoiceConfig {
            waveform: cue.definition.waveform(),
            frequency: note.frequency,
            amplitude: stinger.params.volume * master_volume,
            envelope: Envelope::new(NOTE_ATTACK, 0.0, 1.0, NOTE_RELEASE),
            polyphony: PolyphonyClass::Monophonic,
            detune_cents: 0.0,
            effects: cue.definition.effects().to_vec(),
        };
        match cx.pool.acquire(STINGER_ROLE, &config, cx.now) {
            Ok(voice) => {
                let points = config.envelope.points(note.length, config.amplitude);
                if let Err(e) = cx.pool.schedule(&voice, at, &points) {
                    warn!(name = stinger.name, err = %e, "Unable to schedule stinger note");
                }
                stinger.voices.push(voice);
            }
            Err(e) => {
                warn!(name = stinger.name, err = %e, "Skipping stinger note");
                self.skipped += 1;
            }
        }
    }

    /// Silences a stinger at once and reclaims its voices.
    fn cut(stinger: PlayingStinger, cx: &mut Context) {
        for task in stinger.notes.iter() {
            cx.queue.cancel(*task);
        }
        cx.queue.cancel(stinger.cleanup);
        for voice in stinger.voices.iter() {
            cx.pool.evict(voice, cx.now);
        }
    }

    /// Stops every instance of the stinger. Notes not yet started are
    /// dropped and sounding notes ramp out over the note release.
    pub fn stop_stinger(&mut self, name: &str, cx: &mut Context) -> bool {
        let instances: Vec<u64> = self
            .playing
            .iter()
            .filter(|stinger| stinger.name == name && !stinger.stopping)
            .map(|stinger| stinger.instance)
            .collect();
        for instance in instances.iter() {
            self.release(*instance, cx);
        }
        !instances.is_empty()
    }

    pub fn stop_all_stingers(&mut self, cx: &mut Context) -> usize {
        let instances: Vec<u64> = self
            .playing
            .iter()
            .filter(|stinger| !stinger.stopping)
            .map(|stinger| stinger.instance)
            .collect();
        for instance in instances.iter() {
            self.release(*instance, cx);
        }
        instances.len()
    }

    fn release(&mut self, instance: u64, cx: &mut Context) {
        let release = Duration::from_secs_f64(NOTE_RELEASE);
        let Some(stinger) = self.instance_mut(instance) else {
            return;
        };
        stinger.stopping = true;
        for task in stinger.notes.drain(..) {
            cx.queue.cancel(task);
        }
        for voice in stinger.voices.iter() {
            cx.pool.ramp(voice, 0.0, cx.now, release);
        }
        cx.queue.cancel(stinger.cleanup);
        stinger.cleanup = cx.queue.schedule_at(
            cx.now + release,
            Task::Stinger(StingerTask::Cleanup { instance }),
        );
        debug!(name = stinger.name, instance, "Stopping stinger");
    }

    /// Cuts every stinger and crossfade immediately.
    pub fn halt(&mut self, cx: &mut Context) {
        for stinger in self.playing.drain(..) {
            Self::cut(stinger, cx);
        }
        self.crossfades.clear();
        cx.queue
            .cancel_where(|task| matches!(task, Task::Stinger(_)));
    }

    /// Fades `from` out over `duration` and brings `to` in once a fixed share
    /// of the fade has passed, so the two overlap. Only one crossfade per
    /// pair may run at a time.
    pub fn crossfade(
        &mut self,
        from: &str,
        to: &str,
        duration: Duration,
        bank: &mut InstrumentBank,
        cx: &mut Context,
    ) -> Result<(), AudioError> {
        if self
            .crossfades
            .iter()
            .any(|crossfade| crossfade.from == from && crossfade.to == to)
        {
            return Err(AudioError::TransitionInFlight {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if !bank.knows(to) {
            return Err(AudioError::UnknownInstrument(to.to_string()));
        }

        let head_start = duration.mul_f64(self.timing.crossfade_head_start);
        let id = self.next_crossfade;
        self.next_crossfade += 1;

        bank.stop_instrument(from, duration, cx);
        cx.queue.schedule_at(
            cx.now + head_start,
            Task::Stinger(StingerTask::CrossfadeIn { id }),
        );
        cx.queue.schedule_at(
            cx.now + duration + self.timing.crossfade_grace,
            Task::Stinger(StingerTask::CrossfadeComplete { id }),
        );
        self.crossfades.push(Crossfade {
            id,
            from: from.to_string(),
            to: to.to_string(),
            fade_in: duration - head_start,
            record: TransitionRecord::new(from, to, cx.now, duration),
        });
        info!(from, to, duration = ?duration, "Crossfading");
        Ok(())
    }

    /// Crossfades in flight with their progress as of `now`.
    pub fn crossfades(&self, now: Duration) -> Vec<TransitionRecord> {
        self.crossfades
            .iter()
            .map(|crossfade| {
                let mut record = crossfade.record.clone();
                record.advance(now);
                record
            })
            .collect()
    }

    /// Runs a due task. Returns the record of a crossfade that completed.
    pub fn on_task(
        &mut self,
        task: StingerTask,
        at: Duration,
        bank: &mut InstrumentBank,
        cx: &mut Context,
    ) -> Option<TransitionRecord> {
        match task {
            StingerTask::Note { instance, index } => {
                self.trigger(instance, index, at, cx);
                None
            }
            StingerTask::Cleanup { instance } => {
                if let Some(position) = self
                    .playing
                    .iter()
                    .position(|stinger| stinger.instance == instance)
                {
                    let stinger = self.playing.remove(position);
                    debug!(name = stinger.name, instance, "Stinger finished");
                    for voice in stinger.voices.iter() {
                        cx.pool.release(voice, cx.now);
                    }
                }
                None
            }
            StingerTask::CrossfadeIn { id } => {
                let crossfade = self.crossfades.iter().find(|crossfade| crossfade.id == id)?;
                let options = StartOptions {
                    delay: Duration::ZERO,
                    fade_in: Some(crossfade.fade_in),
                };
                if let Err(e) = bank.start_instrument(&crossfade.to, options, cx) {
                    warn!(to = crossfade.to, err = %e, "Unable to crossfade in");
                }
                None
            }
            StingerTask::CrossfadeComplete { id } => {
                let position = self
                    .crossfades
                    .iter()
                    .position(|crossfade| crossfade.id == id)?;
                let mut record = self.crossfades.remove(position).record;
                record.advance(at);
                Some(record)
            }
        }
    }

    /// Stingers currently sounding, in order of arrival.
    pub fn active_stingers(&self) -> Vec<StingerInfo> {
        self.playing
            .iter()
            .filter(|stinger| !stinger.stopping)
            .map(|stinger| StingerInfo {
                instance: stinger.instance,
                name: stinger.name.clone(),
                priority: stinger.params.priority,
                started: stinger.started.as_secs_f64(),
            })
            .collect()
    }

    pub fn is_playing(&self, name: &str) -> bool {
        self.playing
            .iter()
            .any(|stinger| stinger.name == name && !stinger.stopping)
    }

    /// Voices the stinger's playing instances hold.
    pub fn voices(&self, name: &str) -> usize {
        self.playing
            .iter()
            .filter(|stinger| stinger.name == name)
            .map(|stinger| stinger.voices.len())
            .sum()
    }

    /// Notes dropped because the pool refused a voice.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::StingerEngine;
    use crate::{
        config::{
            EngineConfig, InstrumentDefinition, PatternKind, PoolConfig, StingerDefinition,
            StingerOptions, Timing,
        },
        engine::{Context, Task},
        envelope::Envelope,
        error::AudioError,
        instruments::{InstrumentBank, StartOptions},
        pool::VoicePool,
        scheduler::Scheduler,
        sink::mock::{self, SinkCommand},
    };

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    struct Rig {
        stingers: StingerEngine,
        bank: InstrumentBank,
        pool: VoicePool,
        queue: Scheduler<Task>,
        sink: mock::Sink,
        now: Duration,
    }

    impl Rig {
        fn new(definitions: Vec<StingerDefinition>) -> Rig {
            let sink = mock::Sink::new();
            let instruments = ["guitar", "organ"].map(|role| {
                InstrumentDefinition::pitched(
                    role,
                    PatternKind::HarmonicChord,
                    4,
                    Envelope::default(),
                )
            });
            Rig {
                stingers: StingerEngine::new(&definitions, Timing::default()).unwrap(),
                bank: InstrumentBank::new(&instruments, Timing::default()).unwrap(),
                pool: VoicePool::new(&PoolConfig::default(), Box::new(sink.clone())).unwrap(),
                queue: Scheduler::new(),
                sink,
                now: Duration::ZERO,
            }
        }

        fn with<R>(
            &mut self,
            f: impl FnOnce(&mut StingerEngine, &mut InstrumentBank, &mut Context) -> R,
        ) -> R {
            let mut cx = Context {
                now: self.now,
                pool: &mut self.pool,
                queue: &mut self.queue,
            };
            f(&mut self.stingers, &mut self.bank, &mut cx)
        }

        fn play(&mut self, name: &str, priority: Option<u32>) -> u64 {
            let options = StingerOptions {
                priority,
                volume: None,
            };
            self.with(|stingers, _, cx| stingers.play_stinger(name, &options, cx))
                .unwrap()
        }

        fn run_until(&mut self, until: Duration) -> Vec<crate::moods::TransitionRecord> {
            let mut completed = Vec::new();
            while let Some((at, _, task)) = self.queue.pop_due(until) {
                self.now = at;
                match task {
                    Task::Stinger(task) => {
                        if let Some(record) =
                            self.with(|stingers, bank, cx| stingers.on_task(task, at, bank, cx))
                        {
                            completed.push(record);
                        }
                    }
                    Task::Instrument(task) => self.with(|_, bank, cx| bank.on_task(task, at, cx)),
                    _ => {}
                }
            }
            self.now = until;
            completed
        }

        fn names(&self) -> Vec<String> {
            self.stingers
                .active_stingers()
                .into_iter()
                .map(|info| info.name)
                .collect()
        }
    }

    #[test]
    fn test_higher_priority_cuts_lower() {
        let mut rig = Rig::new(vec![
            StingerDefinition::simple("warning", "1s", 3),
            StingerDefinition::simple("victory", "2s", 10),
        ]);
        rig.play("warning", None);
        assert_eq!(1, rig.stingers.voices("warning"));

        rig.now = ms(100);
        rig.play("victory", None);
        assert_eq!(vec!["victory"], rig.names());
        let stops: Vec<_> = rig
            .sink
            .commands()
            .into_iter()
            .filter(|c| matches!(c, SinkCommand::Stop { at, .. } if *at == ms(100)))
            .collect();
        assert_eq!(1, stops.len());

        // Victory plays to completion.
        rig.run_until(ms(2599));
        assert_eq!(vec!["victory"], rig.names());
        rig.run_until(ms(2600));
        assert!(rig.names().is_empty());
        assert_eq!(0, rig.pool.active_count());
    }

    #[test]
    fn test_equal_and_higher_priorities_layer() {
        let mut rig = Rig::new(vec![
            StingerDefinition::simple("a", "1s", 5),
            StingerDefinition::simple("b", "1s", 5),
            StingerDefinition::simple("c", "1s", 3),
        ]);
        rig.play("a", None);
        rig.play("b", None);
        rig.play("c", None);
        assert_eq!(vec!["a", "b", "c"], rig.names());

        // Per-call priority wins over the definition's.
        rig.play("c", Some(6));
        assert_eq!(vec!["c"], rig.names());
        assert_eq!(6, rig.stingers.active_stingers()[0].priority);
    }

    #[test]
    fn test_same_stinger_replaces_itself() {
        let mut rig = Rig::new(vec![StingerDefinition::simple("fanfare", "1s", 5)]);
        let first = rig.play("fanfare", None);
        let second = rig.play("fanfare", None);
        assert_ne!(first, second);
        let active = rig.stingers.active_stingers();
        assert_eq!(1, active.len());
        assert_eq!(second, active[0].instance);
        assert_eq!(1, rig.pool.active_count());
    }

    #[test]
    fn test_notes_follow_onsets() {
        let config = EngineConfig::builtin().unwrap();
        let mut rig = Rig::new(config.stingers().to_vec());
        rig.play("level_up", None);
        assert_eq!(1, rig.stingers.voices("level_up"));

        rig.run_until(ms(600));
        assert_eq!(4, rig.stingers.voices("level_up"));
        let onsets: Vec<Duration> = rig
            .sink
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                SinkCommand::Schedule { at, .. } => Some(at),
                _ => None,
            })
            .collect();
        assert_eq!(vec![ms(0), ms(200), ms(400), ms(600)], onsets);

        // Cleanup comes half a second after the two second cue.
        rig.run_until(ms(2499));
        assert!(rig.stingers.is_playing("level_up"));
        rig.run_until(ms(2500));
        assert!(!rig.stingers.is_playing("level_up"));
        assert_eq!(0, rig.pool.active_count());
    }

    #[test]
    fn test_peak_follows_volume() {
        let config = EngineConfig::builtin().unwrap();
        let mut rig = Rig::new(config.stingers().to_vec());
        rig.stingers.set_master_volume(0.5);
        rig.play("boss_appear", None);
        let peak = rig.sink.commands().into_iter().find_map(|c| match c {
            SinkCommand::Schedule { peak, .. } => Some(peak),
            _ => None,
        });
        assert!((peak.unwrap() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_stop_stinger_is_graceful() {
        let config = EngineConfig::builtin().unwrap();
        let mut rig = Rig::new(config.stingers().to_vec());
        rig.play("level_up", None);
        rig.run_until(ms(100));

        assert!(rig.with(|stingers, _, cx| stingers.stop_stinger("level_up", cx)));
        assert!(!rig.stingers.is_playing("level_up"));
        assert!(!rig.with(|stingers, _, cx| stingers.stop_stinger("level_up", cx)));
        let ramps = rig
            .sink
            .commands()
            .into_iter()
            .filter(|c| matches!(c, SinkCommand::Ramp { target, .. } if *target == 0.0))
            .count();
        assert_eq!(1, ramps);

        // The voice is reclaimed after the release and no later notes start.
        rig.run_until(ms(199));
        assert_eq!(1, rig.pool.active_count());
        rig.run_until(ms(3000));
        assert_eq!(0, rig.pool.active_count());
        assert_eq!(1, rig.sink.scheduled());
    }

    #[test]
    fn test_stop_all_and_halt() {
        let mut rig = Rig::new(vec![
            StingerDefinition::simple("a", "1s", 5),
            StingerDefinition::simple("b", "1s", 5),
        ]);
        rig.play("a", None);
        rig.play("b", None);
        assert_eq!(2, rig.with(|stingers, _, cx| stingers.stop_all_stingers(cx)));
        assert!(rig.names().is_empty());

        rig.play("a", None);
        rig.with(|stingers, _, cx| stingers.halt(cx));
        assert!(rig.names().is_empty());
        assert!(rig.queue.is_empty());
        assert_eq!(0, rig.pool.active_count());
    }

    #[test]
    fn test_unknown_stinger() {
        let mut rig = Rig::new(Vec::new());
        let result = rig.with(|stingers, _, cx| {
            stingers.play_stinger("tada", &StingerOptions::default(), cx)
        });
        assert_eq!(Err(AudioError::UnknownStinger("tada".into())), result);
    }

    #[test]
    fn test_crossfade() {
        let mut rig = Rig::new(Vec::new());
        rig.with(|_, bank, cx| bank.start_instrument("guitar", StartOptions::default(), cx))
            .unwrap();

        rig.with(|stingers, bank, cx| stingers.crossfade("guitar", "organ", ms(1000), bank, cx))
            .unwrap();
        assert!(!rig.bank.is_playing("guitar"));
        assert_eq!(
            Err(AudioError::TransitionInFlight {
                from: "guitar".into(),
                to: "organ".into()
            }),
            rig.with(|stingers, bank, cx| stingers.crossfade("guitar", "organ", ms(1000), bank, cx))
        );
        // The reverse direction is a different pair.
        assert!(rig
            .with(|stingers, bank, cx| stingers.crossfade("organ", "guitar", ms(1000), bank, cx))
            .is_ok());

        // The incoming side starts after a fifth of the fade.
        rig.run_until(ms(199));
        assert!(!rig.bank.is_playing("organ"));
        rig.run_until(ms(200));
        assert!(rig.bank.is_playing("organ"));
        assert_eq!(3, rig.bank.live_notes("organ"));

        rig.run_until(ms(500));
        let progress = rig.stingers.crossfades(ms(500));
        assert_eq!(2, progress.len());
        assert_eq!(0.5, progress[0].progress);

        let completed = rig.run_until(ms(1500));
        assert_eq!(2, completed.len());
        assert_eq!("guitar", completed[0].from);
        assert!(completed[0].is_complete());
        assert!(rig.stingers.crossfades(ms(1500)).is_empty());
        assert!(rig
            .with(|stingers, bank, cx| stingers.crossfade("guitar", "organ", ms(1000), bank, cx))
            .is_ok());
    }

    #[test]
    fn test_crossfade_to_unknown_role() {
        let mut rig = Rig::new(Vec::new());
        assert_eq!(
            Err(AudioError::UnknownInstrument("kazoo".into())),
            rig.with(|stingers, bank, cx| stingers.crossfade("guitar", "kazoo", ms(1000), bank, cx))
        );
    }
}
