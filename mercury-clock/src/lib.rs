//! Clock abstraction for mercury.
//!
//! Packet timestamps and run timing go through a trait so that tests can pin
//! or step the time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Trait for getting the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the time elapsed since the Unix epoch.
    fn now(&self) -> Duration;

    /// Returns the current time in whole nanoseconds since the epoch.
    fn now_nanos(&self) -> u128 {
        self.now().as_nanos()
    }
}

/// Real system clock implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        // A clock set before 1970 reports the epoch itself.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
    }
}

/// Mock clock for testing with a fixed time.
#[derive(Debug, Clone, Copy)]
pub struct MockClock {
    now: Duration,
}

impl MockClock {
    /// Create a mock clock pinned at `now`.
    pub fn new(now: Duration) -> Self {
        Self { now }
    }

    /// Create a mock clock pinned at whole seconds since the epoch.
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        self.now
    }
}

/// Mock clock that advances by a fixed step on each call.
///
/// Useful where a loop measures elapsed time between two reads.
#[derive(Debug)]
pub struct AdvancingClock {
    nanos: AtomicU64,
    step: u64,
}

impl AdvancingClock {
    /// Create a clock starting at `start` and stepping by `step` per call.
    pub fn new(start: Duration, step: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos() as u64),
            step: step.as_nanos() as u64,
        }
    }
}

impl Clock for AdvancingClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.fetch_add(self.step, Ordering::SeqCst))
    }
}
