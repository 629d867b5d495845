//! Leveled logging shared by every thread of a run.
//!
//! Workers, the output coordinator and the command layer all hold an
//! `Arc<dyn Logger>`. `-v` raises the threshold to [`Verbosity::Verbose`],
//! `-vv` to [`Verbosity::Debug`].

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Always shown: fatal conditions and per-worker failures.
    Normal,
    /// Run configuration and the closing summary.
    Verbose,
    /// Per-round and per-file detail.
    Debug,
}

impl Verbosity {
    /// Map a repeated `-v` count to a level; anything past two is debug.
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    }
}

pub trait Logger: Send + Sync {
    fn log(&self, level: Verbosity, message: &str);

    fn info(&self, message: &str) {
        self.log(Verbosity::Normal, message);
    }

    fn verbose(&self, message: &str) {
        self.log(Verbosity::Verbose, message);
    }

    fn debug(&self, message: &str) {
        self.log(Verbosity::Debug, message);
    }
}

/// Writes one `mercury: <message>` line per call to stderr.
///
/// At debug level the line is tagged with the calling thread's name, so
/// interleaved worker and coordinator output can be told apart.
#[derive(Debug)]
pub struct StderrLogger {
    threshold: Verbosity,
}

impl StderrLogger {
    pub fn new(threshold: Verbosity) -> Self {
        Self { threshold }
    }

    fn enabled(&self, level: Verbosity) -> bool {
        level <= self.threshold
    }
}

impl Logger for StderrLogger {
    fn log(&self, level: Verbosity, message: &str) {
        if !self.enabled(level) {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = if self.threshold == Verbosity::Debug {
            let current = thread::current();
            let name = current.name().unwrap_or("main");
            writeln!(stderr, "mercury [{}]: {}", name, message)
        } else {
            writeln!(stderr, "mercury: {}", message)
        };
    }
}

/// One message seen by a [`MockLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Verbosity,
    pub message: String,
}

/// Records every message regardless of level. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct MockLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MockLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.message).collect()
    }

    pub fn messages_at_level(&self, level: Verbosity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| (e.level == level).then_some(e.message))
            .collect()
    }

    /// True if any recorded message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|e| e.message.contains(needle))
    }
}

impl Logger for MockLogger {
    fn log(&self, level: Verbosity, message: &str) {
        self.entries.lock().unwrap().push(LogEntry {
            level,
            message: message.to_owned(),
        });
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: Verbosity, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // Verbosity
    // ===========================================

    #[test]
    fn test_count_maps_to_level() {
        let levels: Vec<Verbosity> = (0..4).map(Verbosity::from_count).collect();
        assert_eq!(
            levels,
            vec![
                Verbosity::Normal,
                Verbosity::Verbose,
                Verbosity::Debug,
                Verbosity::Debug
            ]
        );
    }

    #[test]
    fn test_threshold_filters_higher_levels() {
        let logger = StderrLogger::new(Verbosity::Verbose);
        assert!(logger.enabled(Verbosity::Normal));
        assert!(logger.enabled(Verbosity::Verbose));
        assert!(!logger.enabled(Verbosity::Debug));
    }

    // ===========================================
    // MockLogger
    // ===========================================

    #[test]
    fn test_mock_records_every_level() {
        let logger = MockLogger::new();
        logger.info("bind failed");
        logger.verbose("2 worker queue(s)");
        logger.debug("round 7");

        let entries = logger.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].level, Verbosity::Verbose);
        assert_eq!(logger.messages_at_level(Verbosity::Debug), vec!["round 7"]);
        assert!(logger.contains("queue(s)"));
        assert!(!logger.contains("rotation"));
    }

    #[test]
    fn test_mock_clones_share_entries_across_threads() {
        let logger = MockLogger::new();
        let shared: Arc<dyn Logger> = Arc::new(logger.clone());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.info(&format!("worker {i}")))
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        let mut messages = logger.messages();
        messages.sort();
        assert_eq!(messages, vec!["worker 0", "worker 1", "worker 2", "worker 3"]);
    }

    #[test]
    fn test_null_logger_accepts_everything() {
        let logger: Arc<dyn Logger> = Arc::new(NullLogger);
        logger.info("ignored");
        logger.debug("ignored");
    }
}
