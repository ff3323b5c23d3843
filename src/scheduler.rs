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
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    time::Duration,
};

/// Identifies a scheduled task so that it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Heap key. Ties on fire time are broken by insertion order so that tasks
/// scheduled for the same instant run first-in, first-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    at: Duration,
    seq: u64,
}

/// A min-heap of timed tasks with explicit cancellation.
///
/// Cancellation removes the task payload immediately; the heap slot is
/// discarded lazily the next time it reaches the top.
pub struct Scheduler<T> {
    heap: BinaryHeap<Reverse<Slot>>,
    tasks: HashMap<u64, (Duration, T)>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Scheduler::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Scheduler<T> {
        Scheduler {
            heap: BinaryHeap::new(),
            tasks: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules a task to fire at the given time.
    pub fn schedule_at(&mut self, at: Duration, task: T) -> TaskId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Slot { at, seq }));
        self.tasks.insert(seq, (at, task));
        TaskId(seq)
    }

    /// Cancels a pending task, returning it if it had not fired yet.
    pub fn cancel(&mut self, id: TaskId) -> Option<T> {
        self.tasks.remove(&id.0).map(|(_, task)| task)
    }

    /// Returns true if the task is still waiting to fire.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id.0)
    }

    /// Pops the earliest task whose fire time is at or before `now`. The
    /// task's own fire time is returned alongside it.
    pub fn pop_due(&mut self, now: Duration) -> Option<(Duration, TaskId, T)> {
        while let Some(Reverse(slot)) = self.heap.peek().copied() {
            if slot.at > now {
                return None;
            }
            self.heap.pop();
            if let Some((at, task)) = self.tasks.remove(&slot.seq) {
                return Some((at, TaskId(slot.seq), task));
            }
        }
        None
    }

    /// The fire time of the earliest pending task.
    pub fn next_fire_time(&mut self) -> Option<Duration> {
        while let Some(Reverse(slot)) = self.heap.peek().copied() {
            if self.tasks.contains_key(&slot.seq) {
                return Some(slot.at);
            }
            self.heap.pop();
        }
        None
    }

    /// Cancels every task matching the predicate.
    pub fn cancel_where<F: FnMut(&T) -> bool>(&mut self, mut f: F) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, (_, task)| !f(task));
        before - self.tasks.len()
    }

    /// Iterates over pending tasks in no particular order.
    pub fn pending(&self) -> impl Iterator<Item = (Duration, &T)> {
        self.tasks.values().map(|(at, task)| (*at, task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.tasks.clear();
    }
}
