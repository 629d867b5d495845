//! Stop flag and signal handling.
//!
//! `ShutdownFlag` is the one stop flag of a run. SIGINT and SIGTERM set it
//! from the handler thread installed by `ctrlc`; the handler does nothing
//! else. The main thread sets it after every worker has been joined. It is
//! never cleared.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Read side of the stop flag, polled once per worker iteration and once
/// per coordinator round.
pub trait ShutdownCheck: Send + Sync {
    fn should_stop(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    /// Create the flag and point the SIGINT/SIGTERM handler at it.
    ///
    /// `ctrlc` allows one handler per process; when one is already installed
    /// the returned flag only stops on [`ShutdownFlag::trigger`].
    pub fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let on_signal = Arc::clone(&flag);
        let _ = ctrlc::set_handler(move || on_signal.store(true, Ordering::SeqCst));

        Self { flag }
    }

    /// A flag no signal can reach.
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the flag. There is no way back.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

impl ShutdownCheck for ShutdownFlag {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Stop check for tests that run a worker to input exhaustion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverShutdown;

impl ShutdownCheck for NeverShutdown {
    fn should_stop(&self) -> bool {
        false
    }
}

/// Stop check that is already set, for final-drain tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysShutdown;

impl ShutdownCheck for AlwaysShutdown {
    fn should_stop(&self) -> bool {
        true
    }
}

/// Signals shutdown once it has been polled `limit` times.
///
/// The first `limit` calls return false; every later call returns true.
#[derive(Debug)]
pub struct CountingShutdown {
    limit: u64,
    polls: AtomicU64,
}

impl CountingShutdown {
    pub fn after(limit: u64) -> Self {
        Self {
            limit,
            polls: AtomicU64::new(0),
        }
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl ShutdownCheck for CountingShutdown {
    fn should_stop(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst) >= self.limit
    }
}
