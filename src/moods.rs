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

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::{EngineConfig, MoodOverrides, MoodParams, MoodState},
    error::AudioError,
};

/// How many finished or running transitions are remembered.
const HISTORY_LEN: usize = 32;

/// A change from one mood (or instrument role) to another, with progress
/// measured against a fixed duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    /// Seconds on the engine clock.
    pub started: f64,
    /// Seconds.
    pub duration: f64,
    pub progress: f64,
}

impl TransitionRecord {
    pub fn new(from: &str, to: &str, started: Duration, duration: Duration) -> TransitionRecord {
        TransitionRecord {
            from: from.to_string(),
            to: to.to_string(),
            started: started.as_secs_f64(),
            duration: duration.as_secs_f64(),
            progress: 0.0,
        }
    }

    /// Brings progress up to date. Progress never goes backwards.
    pub fn advance(&mut self, now: Duration) {
        let elapsed = (now.as_secs_f64() - self.started).max(0.0);
        let progress = if self.duration <= 0.0 {
            1.0
        } else {
            (elapsed / self.duration).min(1.0)
        };
        self.progress = self.progress.max(progress);
    }

    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}

/// What an accepted transition asks of the instruments.
#[derive(Debug, Clone, PartialEq)]
pub struct MoodChange {
    pub from: String,
    pub to: String,
    /// The instruments of the previous mood should fade out.
    pub fade_out: bool,
    /// Roles to fade in, in order.
    pub fade_in: Vec<String>,
    pub params: MoodParams,
    /// A self-transition: only the parameters change.
    pub refresh: bool,
}

/// A snapshot of the state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoodInfo {
    pub current: String,
    pub previous: Option<String>,
    pub transitioning: bool,
    pub progress: f64,
    pub params: MoodParams,
    pub available: Vec<String>,
}

/// Holds the playing mood and decides which mood changes are legal.
///
/// The machine is pure bookkeeping: it never touches instruments itself but
/// hands back a [`MoodChange`] describing what should happen.
pub struct MoodStateMachine {
    moods: HashMap<String, MoodState>,
    transitions: HashMap<String, Vec<String>>,
    initial: String,
    current: String,
    previous: Option<String>,
    params: MoodParams,
    transition_duration: Duration,
    /// The running transition, if any, is the last entry.
    history: VecDeque<TransitionRecord>,
    transitioning: bool,
}

impl MoodStateMachine {
    pub fn new(config: &EngineConfig, transition_duration: Duration) -> MoodStateMachine {
        let moods: HashMap<String, MoodState> = config
            .moods()
            .iter()
            .map(|mood| (mood.id().to_string(), mood.clone()))
            .collect();
        let transitions = moods
            .keys()
            .map(|id| (id.clone(), config.transitions_from(id).to_vec()))
            .collect();
        let initial = config.initial_mood().to_string();
        let params = moods
            .get(&initial)
            .map(|mood| mood.merged(&MoodOverrides::default()))
            .unwrap_or_default();

        MoodStateMachine {
            moods,
            transitions,
            current: initial.clone(),
            initial,
            previous: None,
            params,
            transition_duration,
            history: VecDeque::new(),
            transitioning: false,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn params(&self) -> MoodParams {
        self.params
    }

    pub fn is_transitioning(&self) -> bool {
        self.transitioning
    }

    pub fn mood(&self, id: &str) -> Option<&MoodState> {
        self.moods.get(id)
    }

    /// Moods reachable from the current one. From the initial mood every
    /// other mood is reachable.
    pub fn available_transitions(&self) -> Vec<String> {
        let mut available: Vec<String> = if self.current == self.initial {
            self.moods
                .keys()
                .filter(|id| **id != self.initial)
                .cloned()
                .collect()
        } else {
            self.transitions
                .get(&self.current)
                .cloned()
                .unwrap_or_default()
        };
        available.sort();
        available
    }

    /// Whether a move from `from` to `to` is legal.
    pub fn can_transition(&self, from: &str, to: &str) -> bool {
        from == to
            || from == self.initial
            || self
                .transitions
                .get(from)
                .is_some_and(|targets| targets.iter().any(|target| target == to))
    }

    /// Validates and records a mood change. Rejected requests leave the
    /// machine untouched.
    pub fn transition_to(
        &mut self,
        target: &str,
        overrides: &MoodOverrides,
        now: Duration,
    ) -> Result<MoodChange, AudioError> {
        let Some(mood) = self.moods.get(target) else {
            warn!(mood = target, "Unknown mood requested");
            return Err(AudioError::UnknownMood(target.to_string()));
        };
        if !self.can_transition(&self.current, target) {
            warn!(from = self.current, to = target, "Rejecting illegal mood transition");
            return Err(AudioError::InvalidTransition {
                from: self.current.clone(),
                to: target.to_string(),
            });
        }

        let params = mood.merged(overrides);
        if self.current == target {
            debug!(mood = target, "Refreshing mood parameters");
            self.params = params;
            return Ok(MoodChange {
                from: target.to_string(),
                to: target.to_string(),
                fade_out: false,
                fade_in: Vec::new(),
                params,
                refresh: true,
            });
        }

        let fade_in = mood.instruments().to_vec();
        Ok(self.enter(target, params, fade_in, now))
    }

    /// Returns to the initial mood regardless of the transition table.
    pub fn reset(&mut self, now: Duration) -> MoodChange {
        let initial = self.initial.clone();
        let params = self
            .moods
            .get(&initial)
            .map(|mood| mood.merged(&MoodOverrides::default()))
            .unwrap_or_default();
        self.enter(&initial, params, Vec::new(), now)
    }

    fn enter(
        &mut self,
        target: &str,
        params: MoodParams,
        fade_in: Vec<String>,
        now: Duration,
    ) -> MoodChange {
        let from = std::mem::replace(&mut self.current, target.to_string());
        info!(from, to = target, tempo = params.tempo, "Mood transition");

        // A transition still running is cut short.
        if let Some(running) = self.history.back_mut().filter(|_| self.transitioning) {
            running.advance(now);
        }
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord::new(
            &from,
            target,
            now,
            self.transition_duration,
        ));

        self.transitioning = true;
        self.params = params;
        let fade_out = from != self.initial;
        self.previous = Some(from.clone());
        MoodChange {
            from,
            to: target.to_string(),
            fade_out,
            fade_in,
            params,
            refresh: false,
        }
    }

    /// Sets the playing intensity, e.g. from the game event feed.
    pub fn set_intensity(&mut self, intensity: f64) -> f64 {
        self.params.intensity = intensity.clamp(0.0, 1.0);
        self.params.intensity
    }

    /// Advances transition progress. Returns the transition that just
    /// completed, if any.
    pub fn update(&mut self, now: Duration) -> Option<TransitionRecord> {
        if !self.transitioning {
            return None;
        }
        let running = self.history.back_mut()?;
        running.advance(now);
        if running.is_complete() {
            self.transitioning = false;
            debug!(from = running.from, to = running.to, "Mood transition complete");
            return Some(running.clone());
        }
        None
    }

    /// Progress of the running transition, or 1.0 when settled.
    pub fn progress(&self) -> f64 {
        match self.history.back() {
            Some(running) if self.transitioning => running.progress,
            _ => 1.0,
        }
    }

    /// Transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.history.iter()
    }

    pub fn info(&self) -> MoodInfo {
        MoodInfo {
            current: self.current.clone(),
            previous: self.previous.clone(),
            transitioning: self.transitioning,
            progress: self.progress(),
            params: self.params,
            available: self.available_transitions(),
        }
    }
}
