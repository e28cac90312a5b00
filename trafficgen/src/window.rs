//! Rolling one second request counter.
//!
//! Every completed request records an event, the reported RPS is the number
//! of events no older than one second. Stale events are evicted on every
//! read and write so the window never grows past one second of traffic.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// The time source of a [`Window`].
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to the tokio clock.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for RealClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Thread-safe rolling window of event timestamps.
#[derive(Debug)]
pub struct Window<C = RealClock> {
    clock: C,
    events: Mutex<VecDeque<Duration>>,
}

impl Default for Window<RealClock> {
    fn default() -> Self {
        Self::with_clock(RealClock::default())
    }
}

impl<C> Window<C>
where
    C: Clock,
{
    /// Create a new [`Window`] reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one event at the current time.
    pub fn record_event(&self) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        // Read the clock under the lock so events stay ordered.
        let now = self.clock.elapsed();
        events.push_back(now);
        evict(&mut events, now);
    }

    /// Number of events recorded in the trailing second.
    pub fn current_rps(&self) -> u64 {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.elapsed();
        evict(&mut events, now);
        events.len() as u64
    }
}

fn evict(events: &mut VecDeque<Duration>, now: Duration) {
    while let Some(oldest) = events.front() {
        if now.saturating_sub(*oldest) > WINDOW {
            events.pop_front();
        } else {
            break;
        }
    }
}
