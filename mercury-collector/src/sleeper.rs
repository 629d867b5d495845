//! Sleep abstraction for testable polling loops.
//!
//! The output coordinator idles between empty rounds; tests swap in
//! [`MockSleeper`] so those idles cost nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread for the full duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Yields instead of sleeping and counts the idles, so tests can assert the
/// coordinator backed off on an empty round.
#[derive(Debug, Default, Clone)]
pub struct MockSleeper {
    calls: Arc<AtomicU64>,
}

impl MockSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Sleeper for MockSleeper {
    fn sleep(&self, _duration: Duration) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::yield_now();
    }
}
