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
use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;

/// A monotonic time source. All engine timing is expressed as an offset from
/// the clock's origin.
pub trait Clock: Send + Sync {
    /// The current time since the clock's origin.
    fn now(&self) -> Duration;
}

/// A clock that only moves when told to. Hosts that already own a transport
/// can drive the engine with this, and tests use it to step time precisely.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    /// Moves the clock forward by the given amount.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock to an absolute time. Going backwards is ignored.
    pub fn set(&self, to: Duration) {
        let mut now = self.now.lock();
        if to > *now {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// Wall clock backed by the platform's monotonic timer.
pub struct SystemClock {
    #[cfg(not(feature = "quanta"))]
    origin: std::time::Instant,
    #[cfg(feature = "quanta")]
    clock: quanta::Clock,
    #[cfg(feature = "quanta")]
    origin: quanta::Instant,
}

impl SystemClock {
    #[cfg(not(feature = "quanta"))]
    pub fn new() -> SystemClock {
        SystemClock {
            origin: std::time::Instant::now(),
        }
    }

    #[cfg(feature = "quanta")]
    pub fn new() -> SystemClock {
        let clock = quanta::Clock::new();
        let origin = clock.now();
        SystemClock { clock, origin }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    #[cfg(not(feature = "quanta"))]
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    #[cfg(feature = "quanta")]
    fn now(&self) -> Duration {
        self.clock.now().duration_since(self.origin)
    }
}
