//! mercury collector.
//!
//! This crate provides the `mercury` command: argument and config handling,
//! the capture and replay workers, the output coordinator, adaptive
//! admission and the shutdown protocol that ties them together.

pub mod admission;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod exit;
pub mod logger;
pub mod pipeline;
pub mod privileges;
pub mod signal;
pub mod sleeper;
pub mod worker;

pub use admission::AdmissionController;
pub use cli::{parse_from, Cli, CliError, ThreadCount, DEFAULT_BUFFER_FRACTION};
pub use commands::{
    execute, execute_capture, execute_replay, CommandError, CommandResult, RunSummary, Runtime,
};
pub use config::{physical_memory, Config, ConfigError, FileConfig, InputMode, OutputMode};
pub use coordinator::{CoordinatorReport, OutputCoordinator};
pub use logger::{Logger, MockLogger, NullLogger, StderrLogger, Verbosity};
pub use pipeline::{Pipeline, PipelineError};
pub use privileges::{MockProcess, PrivilegeError, ProcessControl, SystemProcess};
pub use signal::{ShutdownCheck, ShutdownFlag};
pub use sleeper::{MockSleeper, RealSleeper, Sleeper};
pub use worker::{CaptureWorker, ReplayWorker, Worker, WorkerExit, WorkerReport, WorkerState};
