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

use super::{VoicePool, WarningLevel};
use crate::{
    config::PoolConfig,
    envelope::Envelope,
    error::AudioError,
    sink::mock::{self, SinkCommand},
    voice::{PolyphonyClass, VoiceConfig},
};

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn pool(config: PoolConfig) -> (VoicePool, mock::Sink) {
    let sink = mock::Sink::new();
    let pool = VoicePool::new(&config, Box::new(sink.clone())).unwrap();
    (pool, sink)
}

fn creates(sink: &mock::Sink) -> usize {
    sink.commands()
        .iter()
        .filter(|c| matches!(c, SinkCommand::Create { .. }))
        .count()
}

#[test]
fn test_budget_scenario() {
    let (mut pool, _) = pool(PoolConfig::with_max_synths(5));
    let config = VoiceConfig::default();

    let results: Vec<_> = (0..6)
        .map(|i| pool.acquire("basic", &config, ms(i)))
        .collect();
    assert_eq!(5, results.iter().filter(|r| r.is_ok()).count());
    assert!(matches!(
        results[5],
        Err(AudioError::ResourceExhausted { .. })
    ));
    assert_eq!(1, pool.stats().rejected);
}

#[test]
fn test_ceiling_holds_under_load() {
    let config = PoolConfig::with_max_synths(16)
        .with_role("lead", 10, Some(4))
        .with_role("pad", 6, Some(4))
        .with_role("texture", 2, Some(4));
    let (mut pool, sink) = pool(config);
    let voice = VoiceConfig::default();

    let mut held = Vec::new();
    for i in 0..500u64 {
        let role = ["lead", "pad", "texture"][(i % 3) as usize];
        let now = ms(i * 10);
        if let Ok(handle) = pool.acquire(role, &voice, now) {
            held.push(handle);
        }
        if i % 4 == 0 && !held.is_empty() {
            let handle = held.remove(0);
            pool.release(&handle, now);
        }
        assert!(pool.active_count() + pool.pooled_count() <= 16);
        assert!(sink.allocated() <= 16);
    }
}

#[test]
fn test_emergency_rejects_low_priority() {
    let config = PoolConfig::with_max_synths(20)
        .with_role("boss", 10, None)
        .with_role("lead", 7, None)
        .with_role("pad", 6, None);
    let (mut pool, _) = pool(config);
    let voice = VoiceConfig::default();

    for i in 0..19 {
        pool.acquire("boss", &voice, ms(i)).unwrap();
    }
    assert_eq!(WarningLevel::Emergency, pool.usage().level);

    for _ in 0..3 {
        assert!(matches!(
            pool.acquire("pad", &voice, ms(100)),
            Err(AudioError::ResourceExhausted { .. })
        ));
    }
    assert!(pool.acquire("lead", &voice, ms(100)).is_ok());
    assert_eq!(20, pool.active_count());
}

#[test]
fn test_critical_rejects_and_reclaims() {
    let config = PoolConfig::with_max_synths(20)
        .with_role("ambience", 1, None)
        .with_role("lead", 9, None);
    let (mut pool, sink) = pool(config);
    let voice = VoiceConfig::default();

    let ambience: Vec<_> = (0..17)
        .map(|i| pool.acquire("ambience", &voice, ms(i)).unwrap())
        .collect();
    assert_eq!(WarningLevel::Critical, pool.usage().level);

    // Low priority roles are turned away.
    assert!(pool.acquire("ambience", &voice, ms(20)).is_err());

    // An important role gets in and the oldest low scoring voices make room.
    let lead = pool.acquire("lead", &voice, ms(20)).unwrap();
    assert!(pool.is_live(&lead));
    assert_eq!(3, pool.stats().evicted);
    assert!(!pool.is_live(&ambience[0]));
    assert!(!pool.is_live(&ambience[1]));
    assert!(!pool.is_live(&ambience[2]));
    assert!(pool.is_live(&ambience[3]));
    assert_eq!(15, pool.active_count());
    assert!(sink
        .commands()
        .iter()
        .any(|c| matches!(c, SinkCommand::Stop { .. })));

    // Releasing a reclaimed handle does nothing.
    pool.release(&ambience[0], ms(30));
    assert_eq!(15, pool.active_count());
}

#[test]
fn test_round_trip_reuses_voice() {
    let (mut pool, sink) = pool(PoolConfig::default().with_role("bass", 6, Some(2)));
    let config = VoiceConfig::default();

    let first = pool.acquire("bass", &config, ms(0)).unwrap();
    pool.release(&first, ms(500));
    assert_eq!(1, pool.pooled_for("bass"));

    // Amplitude and pitch changes are still compatible.
    let retuned = VoiceConfig {
        frequency: 55.0,
        amplitude: 0.9,
        ..Default::default()
    };
    let second = pool.acquire("bass", &retuned, ms(600)).unwrap();
    assert_eq!(first.id(), second.id());
    assert_eq!(1, creates(&sink));
    assert_eq!(1, pool.stats().reused);
    assert_eq!(0.5, pool.stats().hit_rate());

    // The old handle cannot touch the voice's new lease.
    assert!(!pool.is_live(&first));
    pool.release(&first, ms(700));
    assert!(pool.is_live(&second));
}

#[test]
fn test_incompatible_config_creates_new_voice() {
    let (mut pool, sink) = pool(PoolConfig::default());
    let first = pool.acquire("lead", &VoiceConfig::default(), ms(0)).unwrap();
    pool.release(&first, ms(500));

    let percussive = VoiceConfig {
        envelope: Envelope::percussive(0.1),
        ..Default::default()
    };
    let second = pool.acquire("lead", &percussive, ms(600)).unwrap();
    assert_ne!(first.id(), second.id());

    let poly = VoiceConfig {
        polyphony: PolyphonyClass::Polyphonic,
        ..Default::default()
    };
    let third = pool.acquire("lead", &poly, ms(700)).unwrap();
    assert_ne!(first.id(), third.id());
    assert_eq!(3, creates(&sink));
    // The pooled voice is still waiting for a compatible request.
    assert_eq!(1, pool.pooled_for("lead"));
}

#[test]
fn test_release_eligibility() {
    let config = PoolConfig::default()
        .with_role("ui", 3, Some(4))
        .with_role("pad", 5, Some(1));
    let (mut pool, sink) = pool(config);
    let voice = VoiceConfig::default();

    // UI voices are never pooled.
    let click = pool.acquire("ui", &voice, ms(0)).unwrap();
    pool.release(&click, ms(1000));
    assert_eq!(0, pool.pooled_for("ui"));

    // Very short lived voices are disposed.
    let blip = pool.acquire("pad", &voice, ms(0)).unwrap();
    pool.release(&blip, ms(50));
    assert_eq!(0, pool.pooled_for("pad"));

    // Overflow beyond the role's pool size is disposed.
    let a = pool.acquire("pad", &voice, ms(0)).unwrap();
    let b = pool.acquire("pad", &voice, ms(0)).unwrap();
    pool.release(&a, ms(500));
    pool.release(&b, ms(500));
    assert_eq!(1, pool.pooled_for("pad"));
    assert_eq!(3, pool.stats().disposed);
    assert_eq!(1, sink.allocated());
}

#[test]
fn test_degraded_mode() {
    let (mut pool, sink) = pool(PoolConfig::default());
    let voice = VoiceConfig::default();

    sink.set_ready(false);
    let handle = pool.acquire("lead", &voice, ms(0)).unwrap();
    assert!(handle.is_silent());
    assert!(pool.is_degraded());
    assert_eq!(0, creates(&sink));

    // Silent handles are harmless.
    pool.schedule(&handle, ms(0), &[]).unwrap();
    pool.release(&handle, ms(10));

    // The sink coming back is not enough until readiness is confirmed.
    sink.set_ready(true);
    assert!(pool.is_degraded());
    assert_eq!(Some(false), pool.poll_context());

    let handle = pool.acquire("lead", &voice, ms(20)).unwrap();
    assert!(!handle.is_silent());
    assert_eq!(1, creates(&sink));
}

#[test]
fn test_starts_degraded() {
    let sink = mock::Sink::new();
    sink.set_ready(false);
    let mut pool = VoicePool::new(&PoolConfig::default(), Box::new(sink.clone())).unwrap();
    assert!(pool.is_degraded());
    assert!(pool
        .acquire("lead", &VoiceConfig::default(), ms(0))
        .unwrap()
        .is_silent());

    sink.set_ready(true);
    pool.set_context_ready(true);
    assert!(!pool.is_degraded());
}

#[test]
fn test_host_not_ready_outlasts_polling() {
    let (mut pool, sink) = pool(PoolConfig::default());
    pool.set_context_ready(false);
    assert!(pool.is_degraded());

    // The sink reporting ready does not override the host.
    assert_eq!(None, pool.poll_context());
    assert!(pool.is_degraded());
    assert!(pool
        .acquire("lead", &VoiceConfig::default(), ms(0))
        .unwrap()
        .is_silent());

    // Nor does the host alone while the sink is down.
    sink.set_ready(false);
    pool.set_context_ready(true);
    assert!(pool.is_degraded());

    sink.set_ready(true);
    assert_eq!(Some(false), pool.poll_context());
    assert_eq!(0, creates(&sink));
}

#[test]
fn test_invalid_config() {
    let (mut pool, _) = pool(PoolConfig::default());
    let bad = VoiceConfig {
        envelope: Envelope::new(0.1, 0.1, 3.0, 0.1),
        ..Default::default()
    };
    assert!(matches!(
        pool.acquire("lead", &bad, ms(0)),
        Err(AudioError::InvalidConfig(_))
    ));
    assert!(matches!(
        pool.acquire("", &VoiceConfig::default(), ms(0)),
        Err(AudioError::InvalidConfig(_))
    ));
}

#[test]
fn test_maintenance_expires_idle_voices() {
    let (mut pool, sink) = pool(PoolConfig::default().with_role("pad", 5, Some(4)));
    let voice = VoiceConfig::default();

    let handles: Vec<_> = (0..3)
        .map(|_| pool.acquire("pad", &voice, ms(0)).unwrap())
        .collect();
    for handle in handles.iter() {
        pool.release(handle, ms(1000));
    }
    assert_eq!(3, pool.pooled_count());

    let report = pool.maintain(ms(10_000));
    assert_eq!(0, report.expired);

    let report = pool.maintain(ms(31_000));
    assert_eq!(3, report.expired);
    assert_eq!(0, pool.pooled_count());
    assert_eq!(0, sink.allocated());
    assert_eq!(3, report.stats.disposed);
}

#[test]
fn test_maintenance_lowers_limits() {
    let config = PoolConfig::with_max_synths(20).with_memory_budget_mb(10.0);
    let (mut pool, _) = pool(config);
    let voice = VoiceConfig::default();

    let _held: Vec<_> = (0..9)
        .map(|_| pool.acquire("lead", &voice, ms(0)).unwrap())
        .collect();
    let report = pool.maintain(ms(5000));
    let change = report.limits.unwrap();
    assert_eq!(16, change.max_synths);
    assert_eq!(16, pool.max_synths());

    // Limits never come back up on their own.
    let report = pool.maintain(ms(10_000));
    assert!(report.limits.is_some());
    assert!(pool.max_synths() < 16);
}

#[test]
fn test_evict_stops_and_reclaims() {
    let (mut pool, sink) = pool(PoolConfig::default().with_role("lead", 8, Some(2)));
    let handle = pool.acquire("lead", &VoiceConfig::default(), ms(0)).unwrap();
    pool.evict(&handle, ms(400));

    assert!(!pool.is_live(&handle));
    assert_eq!(1, pool.stats().evicted);
    assert_eq!(1, pool.pooled_for("lead"));
    assert!(sink.commands().contains(&SinkCommand::Stop {
        id: handle.id().unwrap(),
        at: ms(400)
    }));
}

#[test]
fn test_dispose_all() {
    let (mut pool, sink) = pool(PoolConfig::default());
    let voice = VoiceConfig::default();
    let a = pool.acquire("lead", &voice, ms(0)).unwrap();
    let _b = pool.acquire("lead", &voice, ms(0)).unwrap();
    pool.release(&a, ms(500));

    pool.dispose_all();
    assert_eq!(0, pool.active_count());
    assert_eq!(0, pool.pooled_count());
    assert_eq!(0, sink.allocated());
}
