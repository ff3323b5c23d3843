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

use super::{InstrumentBank, StartOptions};
use crate::{
    config::{
        InstrumentDefinition, MoodParams, PatternKind, PercussiveSound, PoolConfig, Section,
        Timing,
    },
    engine::{Context, Task},
    envelope::Envelope,
    error::AudioError,
    music::MusicalKey,
    pool::VoicePool,
    scheduler::Scheduler,
    sink::mock::{self, SinkCommand},
};

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn chords(role: &str, polyphony: usize) -> InstrumentDefinition {
    InstrumentDefinition::pitched(
        role,
        PatternKind::HarmonicChord,
        polyphony,
        Envelope::default(),
    )
}

struct Rig {
    bank: InstrumentBank,
    pool: VoicePool,
    queue: Scheduler<Task>,
    sink: mock::Sink,
    now: Duration,
}

impl Rig {
    fn new(definitions: Vec<InstrumentDefinition>, pool: PoolConfig) -> Rig {
        let sink = mock::Sink::new();
        let mut bank = InstrumentBank::new(&definitions, Timing::default()).unwrap();
        bank.set_params(MoodParams {
            tempo: 120.0,
            intensity: 0.5,
            volume: 1.0,
            key: Some(MusicalKey::Am),
        });
        Rig {
            bank,
            pool: VoicePool::new(&pool, Box::new(sink.clone())).unwrap(),
            queue: Scheduler::new(),
            sink,
            now: Duration::ZERO,
        }
    }

    fn with<R>(&mut self, f: impl FnOnce(&mut InstrumentBank, &mut Context) -> R) -> R {
        let mut cx = Context {
            now: self.now,
            pool: &mut self.pool,
            queue: &mut self.queue,
        };
        f(&mut self.bank, &mut cx)
    }

    fn start(&mut self, role: &str) {
        self.with(|bank, cx| bank.start_instrument(role, StartOptions::default(), cx))
            .unwrap();
    }

    fn run_until(&mut self, until: Duration) {
        while let Some((at, _, task)) = self.queue.pop_due(until) {
            self.now = at;
            if let Task::Instrument(task) = task {
                self.with(|bank, cx| bank.on_task(task, at, cx));
            }
        }
        self.now = until;
    }

    fn stops(&self) -> Vec<SinkCommand> {
        self.sink
            .commands()
            .into_iter()
            .filter(|c| matches!(c, SinkCommand::Stop { .. }))
            .collect()
    }
}

#[test]
fn test_start_plays_first_step_immediately() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::default());
    rig.start("guitar");

    assert_eq!(vec!["guitar"], rig.bank.playing_roles());
    assert_eq!(3, rig.bank.live_notes("guitar"));
    assert_eq!(3, rig.bank.live_voices("guitar", &rig.pool));
    assert_eq!(3, rig.sink.scheduled());
}

#[test]
fn test_unknown_instrument() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::default());
    let result =
        rig.with(|bank, cx| bank.start_instrument("theremin", StartOptions::default(), cx));
    assert_eq!(
        Err(AudioError::UnknownInstrument("theremin".into())),
        result
    );
}

#[test]
fn test_loop_reschedules_itself() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::default());
    rig.start("guitar");

    // Four beats at 120 BPM: the first chord ends as the second begins.
    rig.run_until(ms(1999));
    assert_eq!(3, rig.sink.scheduled());
    rig.run_until(ms(2000));
    assert_eq!(6, rig.sink.scheduled());
    assert_eq!(3, rig.bank.live_notes("guitar"));

    // Two of the finished voices were pooled and picked up again.
    assert_eq!(2, rig.pool.stats().reused);
    assert_eq!(4, rig.pool.stats().created);

    rig.run_until(ms(8000));
    assert_eq!(15, rig.sink.scheduled());
    assert_eq!(3, rig.bank.live_notes("guitar"));
}

#[test]
fn test_polyphony_evicts_oldest() {
    let mut rig = Rig::new(vec![chords("guitar", 2)], PoolConfig::default());
    rig.start("guitar");

    // A triad on a two-note instrument: the root is cut for the fifth.
    assert_eq!(2, rig.bank.live_notes("guitar"));
    assert_eq!(1, rig.pool.stats().evicted);
    let first = rig.sink.commands().into_iter().find_map(|c| match c {
        SinkCommand::Create { id, .. } => Some(id),
        _ => None,
    });
    assert_eq!(
        vec![SinkCommand::Stop {
            id: first.unwrap(),
            at: Duration::ZERO
        }],
        rig.stops()
    );
}

#[test]
fn test_rapid_retrigger_keeps_polyphony() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::default());
    rig.start("guitar");
    rig.start("guitar");

    // Three fading notes and three new ones on a four-note instrument.
    assert_eq!(4, rig.bank.live_notes("guitar"));
    assert_eq!(2, rig.pool.stats().evicted);

    let created: Vec<_> = rig
        .sink
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            SinkCommand::Create { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    let stopped: Vec<_> = rig
        .stops()
        .into_iter()
        .filter_map(|c| match c {
            SinkCommand::Stop { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(created[..2], stopped[..]);
}

#[test]
fn test_restart_drops_stale_steps() {
    let mut rig = Rig::new(vec![chords("guitar", 8)], PoolConfig::default());
    rig.start("guitar");
    rig.start("guitar");
    assert_eq!(1, rig.bank.fading_count());

    rig.run_until(ms(2000));
    // One step per start, then only the new loop continues.
    assert_eq!(9, rig.sink.scheduled());
    assert_eq!(0, rig.bank.fading_count());
}

#[test]
fn test_stop_fades_then_force_releases() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::default());
    rig.start("guitar");
    rig.run_until(ms(500));

    assert!(rig.with(|bank, cx| bank.stop_instrument("guitar", ms(1000), cx)));
    assert!(!rig.bank.is_playing("guitar"));
    let ramps: Vec<_> = rig
        .sink
        .commands()
        .into_iter()
        .filter(|c| {
            matches!(c, SinkCommand::Ramp { target, over, .. }
                if *target == 0.0 && *over == ms(1000))
        })
        .collect();
    assert_eq!(3, ramps.len());

    // Still sounding during the fade.
    rig.run_until(ms(1599));
    assert_eq!(3, rig.pool.active_count());
    rig.run_until(ms(1600));
    assert_eq!(0, rig.pool.active_count());
    assert_eq!(0, rig.bank.fading_count());

    rig.run_until(ms(10_000));
    assert_eq!(3, rig.sink.scheduled());

    assert!(!rig.with(|bank, cx| bank.stop_instrument("guitar", ms(1000), cx)));
}

#[test]
fn test_staggered_fade_in() {
    let mut rig = Rig::new(
        vec![
            chords("guitar", 4),
            InstrumentDefinition::pitched("bass", PatternKind::BassLine, 2, Envelope::default()),
        ],
        PoolConfig::default(),
    );
    let roles = vec!["guitar".to_string(), "bass".to_string(), "lute".to_string()];
    let started = rig.with(|bank, cx| bank.fade_in_instruments(&roles, cx));
    assert_eq!(2, started);

    // The guitar comes in first, ramping up from silence.
    assert_eq!(3, rig.sink.scheduled());
    for command in rig.sink.commands() {
        if let SinkCommand::Schedule { peak, .. } = command {
            assert!(peak > 0.0 && peak < 0.3);
        }
    }

    assert_eq!(0, rig.bank.live_notes("bass"));
    rig.run_until(ms(299));
    assert_eq!(0, rig.bank.live_notes("bass"));
    rig.run_until(ms(300));
    assert_eq!(1, rig.bank.live_notes("bass"));
}

#[test]
fn test_start_instruments_together() {
    let mut rig = Rig::new(
        vec![
            chords("guitar", 4),
            InstrumentDefinition::pitched("bass", PatternKind::BassLine, 2, Envelope::default()),
        ],
        PoolConfig::default(),
    );
    let roles = vec!["guitar".to_string(), "bass".to_string()];
    let started = rig.with(|bank, cx| bank.start_instruments(&roles, cx));
    assert_eq!(2, started);
    assert_eq!(1, rig.bank.live_notes("guitar"));
    assert_eq!(1, rig.bank.live_notes("bass"));
}

#[test]
fn test_rejected_voice_skips_note() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::with_max_synths(2));
    rig.start("guitar");

    assert_eq!(2, rig.bank.live_notes("guitar"));
    assert_eq!(1, rig.bank.skipped());
    // The loop carries on regardless.
    assert!(rig.bank.is_playing("guitar"));
}

#[test]
fn test_rejected_voice_keeps_sounding_notes() {
    let mut rig = Rig::new(vec![chords("guitar", 2)], PoolConfig::with_max_synths(2));
    rig.start("guitar");

    // The fifth finds no voice, so the root keeps playing.
    assert_eq!(2, rig.bank.live_notes("guitar"));
    assert_eq!(2, rig.bank.live_voices("guitar", &rig.pool));
    assert_eq!(1, rig.bank.skipped());
    assert_eq!(0, rig.pool.stats().evicted);
    assert!(rig.stops().is_empty());
}

#[test]
fn test_unplayable_definitions_are_rejected() {
    let drums = InstrumentDefinition::percussive(
        "drums",
        PatternKind::DrumKit,
        vec![PercussiveSound {
            name: "kick".into(),
            frequency: 80.0,
            decay: f64::INFINITY,
            volume: 0.9,
            noise: false,
        }],
    );
    assert!(InstrumentBank::new(&[drums], Timing::default()).is_err());

    let strings = InstrumentDefinition::pitched(
        "strings",
        PatternKind::OrchestralChord,
        12,
        Envelope::default(),
    )
    .with_sections(vec![Section {
        name: "cello".into(),
        ratios: vec![1.0],
        detune_cents: -24.0,
        attack_offset: -1.0,
    }]);
    assert!(InstrumentBank::new(&[strings], Timing::default()).is_err());
}

#[test]
fn test_update_sheds_least_important_role() {
    let pool = PoolConfig::default()
        .with_max_concurrent_sounds(4)
        .with_role("guitar", 2, None)
        .with_role("organ", 8, None);
    let mut rig = Rig::new(vec![chords("guitar", 4), chords("organ", 4)], pool);
    rig.start("guitar");
    rig.start("organ");
    assert_eq!(6, rig.bank.total_notes());

    assert_eq!(2, rig.with(|bank, cx| bank.update(cx)));
    assert_eq!(1, rig.bank.live_notes("guitar"));
    assert_eq!(3, rig.bank.live_notes("organ"));
    assert_eq!(0, rig.with(|bank, cx| bank.update(cx)));
}

#[test]
fn test_update_forgets_reclaimed_notes() {
    let mut rig = Rig::new(vec![chords("guitar", 4)], PoolConfig::default());
    rig.start("guitar");
    rig.pool.dispose_all();

    rig.with(|bank, cx| bank.update(cx));
    assert_eq!(0, rig.bank.total_notes());
    // The loop itself keeps running.
    rig.run_until(ms(2000));
    assert_eq!(3, rig.bank.live_notes("guitar"));
}

#[test]
fn test_halt() {
    let mut rig = Rig::new(vec![chords("guitar", 4), chords("organ", 4)], PoolConfig::default());
    rig.start("guitar");
    rig.start("organ");
    rig.with(|bank, cx| bank.stop_instrument("organ", ms(500), cx));

    rig.with(|bank, cx| bank.halt(cx));
    assert!(rig.bank.playing_roles().is_empty());
    assert_eq!(0, rig.bank.total_notes());
    assert_eq!(0, rig.bank.fading_count());
    assert!(rig.queue.is_empty());
    assert_eq!(0, rig.pool.active_count());
}
