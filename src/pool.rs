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
    collections::{HashMap, HashSet, VecDeque},
    time::Duration,
};

use serde::Serialize;
use slotmap::SlotMap;
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigError, PoolConfig},
    envelope::GainPoint,
    error::AudioError,
    sink::Sink,
    voice::{VoiceConfig, VoiceHandle, VoiceId, VoiceState},
};

mod budget;
mod priority;
#[cfg(test)]
mod tests;

pub use self::budget::{LimitChange, ResourceBudget, ResourceUsage, WarningLevel};
pub use self::priority::PriorityTable;

struct VoiceEntry {
    role: String,
    config: VoiceConfig,
    state: VoiceState,
    lease: u32,
    priority: u8,
    created_at: Duration,
    acquired_at: Duration,
    last_used: Duration,
}

/// Running totals of pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub disposed: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub hits: u64,
    pub misses: u64,
}

impl PoolStats {
    /// Fraction of acquisitions satisfied from a free list.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The outcome of a maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaintenanceReport {
    pub usage: ResourceUsage,
    /// Pooled voices disposed for sitting idle too long.
    pub expired: usize,
    /// Pooled voices disposed to fit lowered limits.
    pub trimmed: usize,
    /// Active voices held for suspiciously long.
    pub long_lived: usize,
    pub limits: Option<LimitChange>,
    pub stats: PoolStats,
}

/// A bounded set of reusable voices shared by everything that makes sound.
///
/// The pool is the only owner of the output sink. Callers hold
/// [`VoiceHandle`]s and go through the pool to schedule, ramp, stop and
/// release them, so that a handle whose voice has been reclaimed can never
/// touch the voice's next owner.
pub struct VoicePool {
    voices: SlotMap<VoiceId, VoiceEntry>,
    /// Released voices per role, oldest first.
    free: HashMap<String, VecDeque<VoiceId>>,
    sink: Box<dyn Sink>,
    budget: ResourceBudget,
    priorities: PriorityTable,
    stats: PoolStats,
    degraded: bool,
    /// Readiness last declared by the host, independent of the sink.
    host_ready: bool,
    level: WarningLevel,
    max_idle_age: Duration,
    min_pool_lifetime: Duration,
    unpooled_roles: HashSet<String>,
    shrink_ratio: f64,
    low_priority_score: f64,
    max_evictions: usize,
}

impl VoicePool {
    pub fn new(config: &PoolConfig, sink: Box<dyn Sink>) -> Result<VoicePool, ConfigError> {
        config.validate()?;
        let degraded = !sink.is_ready();
        if degraded {
            warn!("Audio context is not ready, voice pool starting in silent mode");
        }
        Ok(VoicePool {
            voices: SlotMap::with_key(),
            free: HashMap::new(),
            sink,
            budget: ResourceBudget::new(config)?,
            priorities: PriorityTable::new(config)?,
            stats: PoolStats::default(),
            degraded,
            host_ready: true,
            level: WarningLevel::Normal,
            max_idle_age: config.max_idle_age()?,
            min_pool_lifetime: config.min_pool_lifetime()?,
            unpooled_roles: config.unpooled_roles().iter().cloned().collect(),
            shrink_ratio: config.shrink_ratio(),
            low_priority_score: config.low_priority_score(),
            max_evictions: config.max_evictions(),
        })
    }

    /// Grants a voice for the role, reusing a compatible pooled voice when
    /// one exists.
    ///
    /// Returns a silent handle while the audio context is unavailable and
    /// [`AudioError::ResourceExhausted`] when the budget does not admit the
    /// role.
    pub fn acquire(
        &mut self,
        role: &str,
        config: &VoiceConfig,
        now: Duration,
    ) -> Result<VoiceHandle, AudioError> {
        if role.is_empty() {
            return Err(AudioError::InvalidConfig(
                "voice role must not be empty".into(),
            ));
        }
        config.validate()?;
        let priority = self.priorities.priority(role);

        if self.degraded || !self.sink.is_ready() {
            self.enter_degraded();
            return Ok(VoiceHandle::silent(priority, now));
        }

        let usage = self.usage();
        self.note_level(usage.level);
        if priority < usage.level.min_priority() {
            self.stats.rejected += 1;
            debug!(
                role,
                priority,
                level = %usage.level,
                "Rejecting voice request"
            );
            return Err(AudioError::exhausted(
                role,
                format!(
                    "{} usage only admits priority {} and above",
                    usage.level,
                    usage.level.min_priority()
                ),
            ));
        }
        if usage.level >= WarningLevel::Warning {
            self.optimize(usage.level, priority, now);
        }

        if let Some(handle) = self.reuse(role, config, priority, now) {
            return Ok(handle);
        }
        self.stats.misses += 1;

        if self.voices.len() >= self.budget.max_synths() && !self.dispose_oldest_pooled() {
            self.stats.rejected += 1;
            return Err(AudioError::exhausted(
                role,
                format!("all {} voices are in use", self.budget.max_synths()),
            ));
        }
        self.create(role, config, priority, now)
    }

    fn reuse(
        &mut self,
        role: &str,
        config: &VoiceConfig,
        priority: u8,
        now: Duration,
    ) -> Option<VoiceHandle> {
        let free = self.free.get_mut(role)?;
        let voices = &self.voices;
        let position = free.iter().position(|id| {
            voices
                .get(*id)
                .is_some_and(|entry| entry.config.is_compatible(config))
        })?;
        let id = free.remove(position)?;

        if let Err(e) = self.sink.configure(id, config) {
            warn!(role, err = %e, "Unable to reconfigure pooled voice");
            if let Some(free) = self.free.get_mut(role) {
                free.push_front(id);
            }
            if e == AudioError::ContextUnavailable {
                self.enter_degraded();
                return Some(VoiceHandle::silent(priority, now));
            }
            return None;
        }

        let entry = self.voices.get_mut(id)?;
        entry.state = VoiceState::Active;
        entry.lease += 1;
        entry.config = config.clone();
        entry.priority = priority;
        entry.acquired_at = now;
        entry.last_used = now;
        let lease = entry.lease;

        self.priorities.record_used(role, now);
        self.stats.reused += 1;
        self.stats.hits += 1;
        debug!(role, "Reusing pooled voice");
        Some(VoiceHandle::live(id, lease, priority, now))
    }

    fn create(
        &mut self,
        role: &str,
        config: &VoiceConfig,
        priority: u8,
        now: Duration,
    ) -> Result<VoiceHandle, AudioError> {
        let id = self.voices.insert(VoiceEntry {
            role: role.to_string(),
            config: config.clone(),
            state: VoiceState::Active,
            lease: 1,
            priority,
            created_at: now,
            acquired_at: now,
            last_used: now,
        });

        let result = match self.sink.create_voice(id, role, config) {
            Ok(()) => self.sink.configure(id, config).inspect_err(|_| self.sink.dispose(id)),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                self.priorities.record_created(role, now);
                self.stats.created += 1;
                debug!(role, live = self.voices.len(), "Created voice");
                Ok(VoiceHandle::live(id, 1, priority, now))
            }
            Err(AudioError::ContextUnavailable) => {
                self.voices.remove(id);
                self.enter_degraded();
                Ok(VoiceHandle::silent(priority, now))
            }
            Err(e) => {
                self.voices.remove(id);
                Err(e)
            }
        }
    }

    /// Returns a voice after its note completed. Pool-eligible voices are
    /// reset and kept for reuse, the rest are disposed.
    pub fn release(&mut self, handle: &VoiceHandle, now: Duration) {
        let Some(id) = self.owned(handle) else {
            return;
        };
        let Some(entry) = self.voices.get(id) else {
            return;
        };

        let eligible = !self.unpooled_roles.contains(&entry.role)
            && now.saturating_sub(entry.created_at) >= self.min_pool_lifetime;
        let pooled = self.free.get(&entry.role).map_or(0, VecDeque::len);
        let has_room = pooled < self.priorities.max_pooled(&entry.role);

        if eligible && has_room {
            self.sink.reset(id);
            let role = entry.role.clone();
            if let Some(entry) = self.voices.get_mut(id) {
                entry.state = VoiceState::Pooled;
                entry.last_used = now;
            }
            self.free.entry(role).or_default().push_back(id);
        } else {
            self.dispose(id);
        }
    }

    /// Force-stops a voice before its note completes and reclaims it.
    pub fn evict(&mut self, handle: &VoiceHandle, now: Duration) {
        if let Some(id) = self.owned(handle) {
            self.sink.stop(id, now);
            self.stats.evicted += 1;
            self.release(handle, now);
        }
    }

    /// Whether the handle still refers to an active voice it owns.
    pub fn is_live(&self, handle: &VoiceHandle) -> bool {
        self.owned(handle).is_some()
    }

    fn owned(&self, handle: &VoiceHandle) -> Option<VoiceId> {
        let id = handle.id()?;
        let entry = self.voices.get(id)?;
        (entry.state == VoiceState::Active && entry.lease == handle.lease()).then_some(id)
    }

    /// Schedules gain automation on the voice. Silent or reclaimed handles
    /// are ignored.
    pub fn schedule(
        &mut self,
        handle: &VoiceHandle,
        at: Duration,
        points: &[GainPoint],
    ) -> Result<(), AudioError> {
        let Some(id) = self.owned(handle) else {
            return Ok(());
        };
        match self.sink.schedule(id, at, points) {
            Err(AudioError::ContextUnavailable) => {
                self.enter_degraded();
                Ok(())
            }
            result => result,
        }
    }

    /// Ramps the voice's gain towards `target`.
    pub fn ramp(&self, handle: &VoiceHandle, target: f64, at: Duration, over: Duration) {
        if let Some(id) = self.owned(handle) {
            self.sink.ramp(id, target, at, over);
        }
    }

    /// Silences the voice at the given time without reclaiming it.
    pub fn stop(&self, handle: &VoiceHandle, at: Duration) {
        if let Some(id) = self.owned(handle) {
            self.sink.stop(id, at);
        }
    }

    fn dispose(&mut self, id: VoiceId) {
        let Some(entry) = self.voices.remove(id) else {
            return;
        };
        if entry.state == VoiceState::Pooled {
            if let Some(free) = self.free.get_mut(&entry.role) {
                free.retain(|pooled| *pooled != id);
            }
        }
        self.sink.dispose(id);
        self.stats.disposed += 1;
    }

    /// Disposes the pooled voice that has been idle longest.
    fn dispose_oldest_pooled(&mut self) -> bool {
        let oldest = self
            .voices
            .iter()
            .filter(|(_, entry)| entry.state == VoiceState::Pooled)
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id);
        match oldest {
            Some(id) => {
                self.dispose(id);
                true
            }
            None => false,
        }
    }

    /// Best effort relief under pressure: shrinks oversized free lists and,
    /// from critical usage on, reclaims active voices of low scoring roles
    /// that matter less than the requester.
    fn optimize(&mut self, level: WarningLevel, requester: u8, now: Duration) {
        let mut shrunk = Vec::new();
        for (role, free) in self.free.iter() {
            let cap =
                (self.priorities.max_pooled(role) as f64 * self.shrink_ratio).floor() as usize;
            if free.len() > cap {
                shrunk.extend(free.iter().take(free.len() - cap).copied());
            }
        }
        for id in shrunk.iter() {
            self.dispose(*id);
        }

        let mut evicted = 0;
        if level >= WarningLevel::Critical {
            let mut candidates: Vec<(f64, Duration, VoiceId)> = self
                .voices
                .iter()
                .filter(|(_, entry)| {
                    entry.state == VoiceState::Active && entry.priority < requester
                })
                .map(|(id, entry)| {
                    (self.priorities.score(&entry.role, now), entry.acquired_at, id)
                })
                .filter(|(score, _, _)| *score < self.low_priority_score)
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            for (_, _, id) in candidates.into_iter().take(self.max_evictions) {
                self.sink.stop(id, now);
                self.dispose(id);
                self.stats.evicted += 1;
                evicted += 1;
            }
        }

        if !shrunk.is_empty() || evicted > 0 {
            debug!(
                level = %level,
                shrunk = shrunk.len(),
                evicted,
                "Optimized voice pool"
            );
        }
    }

    fn note_level(&mut self, level: WarningLevel) {
        if level == self.level {
            return;
        }
        if level > self.level {
            warn!(
                level = %level,
                recommendations = ?level.recommendations(),
                "Voice pool usage rising"
            );
        } else {
            info!(level = %level, "Voice pool usage easing");
        }
        self.level = level;
    }

    fn enter_degraded(&mut self) {
        if !self.degraded {
            warn!("Audio context unavailable, voice pool entering silent mode");
            self.degraded = true;
        }
    }

    /// Tells the pool whether the audio context is usable. The pool stays
    /// silent until both the host and the sink report readiness.
    pub fn set_context_ready(&mut self, ready: bool) {
        self.host_ready = ready;
        self.refresh_context();
    }

    /// Re-checks the sink's readiness. Returns the new degraded state if it
    /// changed.
    pub fn poll_context(&mut self) -> Option<bool> {
        let before = self.degraded;
        self.refresh_context();
        (before != self.degraded).then_some(self.degraded)
    }

    fn refresh_context(&mut self) {
        if !self.host_ready || !self.sink.is_ready() {
            self.enter_degraded();
        } else if self.degraded {
            info!("Audio context ready, voice pool leaving silent mode");
            self.degraded = false;
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Periodic housekeeping: expires idle pooled voices, samples usage and
    /// lowers limits when memory or CPU run hot.
    pub fn maintain(&mut self, now: Duration) -> MaintenanceReport {
        let max_idle_age = self.max_idle_age;
        let expired: Vec<VoiceId> = self
            .voices
            .iter()
            .filter(|(_, entry)| {
                entry.state == VoiceState::Pooled
                    && now.saturating_sub(entry.last_used) >= max_idle_age
            })
            .map(|(id, _)| id)
            .collect();
        for id in expired.iter() {
            self.dispose(*id);
        }

        let long_lived = self
            .voices
            .values()
            .filter(|entry| {
                entry.state == VoiceState::Active
                    && now.saturating_sub(entry.acquired_at) > max_idle_age * 2
            })
            .count();
        if long_lived > 0 {
            warn!(long_lived, "Voices have been active for a long time");
        }

        self.budget.record(self.active_count());
        let usage = self.usage();
        self.note_level(usage.level);

        let limits = self.budget.adjust(&usage);
        let mut trimmed = 0;
        if let Some(change) = limits {
            info!(
                max_synths = change.max_synths,
                max_concurrent_sounds = change.max_concurrent_sounds,
                cleanup_interval = ?change.cleanup_interval,
                "Lowered voice pool limits"
            );
            while self.voices.len() > self.budget.max_synths() && self.dispose_oldest_pooled() {
                trimmed += 1;
            }
        }

        MaintenanceReport {
            usage,
            expired: expired.len(),
            trimmed,
            long_lived,
            limits,
            stats: self.stats,
        }
    }

    /// Disposes every voice, e.g. at shutdown.
    pub fn dispose_all(&mut self) {
        let ids: Vec<VoiceId> = self.voices.keys().collect();
        for id in ids {
            self.dispose(id);
        }
        self.free.clear();
    }

    pub fn usage(&self) -> ResourceUsage {
        self.budget.usage(self.active_count(), self.pooled_count())
    }

    pub fn priority(&self, role: &str) -> u8 {
        self.priorities.priority(role)
    }

    pub fn priority_score(&self, role: &str, now: Duration) -> f64 {
        self.priorities.score(role, now)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn pooled_count(&self) -> usize {
        self.free.values().map(VecDeque::len).sum()
    }

    pub fn active_count(&self) -> usize {
        self.voices.len() - self.pooled_count()
    }

    /// Active voices held by the role.
    pub fn active_for(&self, role: &str) -> usize {
        self.voices
            .values()
            .filter(|entry| entry.state == VoiceState::Active && entry.role == role)
            .count()
    }

    pub fn pooled_for(&self, role: &str) -> usize {
        self.free.get(role).map_or(0, VecDeque::len)
    }

    pub fn max_synths(&self) -> usize {
        self.budget.max_synths()
    }

    pub fn max_concurrent_sounds(&self) -> usize {
        self.budget.max_concurrent_sounds()
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.budget.cleanup_interval()
    }
}
