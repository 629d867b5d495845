//! mercury CLI binary.
//!
//! Entry point for the `mercury` command-line tool.

use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mercury_collector::exit::{codes, exit_code};
use mercury_collector::{
    execute, Cli, CommandError, Config, FileConfig, Logger, Runtime, ShutdownFlag, StderrLogger,
};
use mercury_fs::RealFilesystem;
use mercury_packet::CaptureBinder;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                codes::USAGE
            } else {
                codes::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code as u8);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::from(codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("mercury: error: {}", e);
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}

fn run(cli: Cli) -> Result<(), CommandError> {
    let cli = match &cli.config {
        Some(path) => {
            let file = FileConfig::load(&RealFilesystem::new(), path)?;
            cli.merge_file(file)
        }
        None => cli,
    };
    let cpus = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    let config = Config::from_cli(&cli, cpus)?;

    let logger: Arc<dyn Logger> = Arc::new(StderrLogger::new(config.verbosity));
    let fs = if config.overwrite {
        RealFilesystem::clobbering()
    } else {
        RealFilesystem::new()
    };

    // Install the signal handler before any thread exists.
    let shutdown = ShutdownFlag::new();
    let runtime = Runtime::new(fs, shutdown, logger);
    let binder = capture_binder(&config, runtime.available_memory);

    execute(&config, &runtime, binder.as_ref())?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn capture_binder(config: &Config, available_memory: u64) -> Box<dyn CaptureBinder> {
    let workers = config.threads.max(1);
    let slots = config.queue_capacity(available_memory, workers);
    let rcvbuf = slots.saturating_mul(mercury_queue::RECORD_SLOT_BYTES as usize);
    Box::new(mercury_packet::AfPacketBinder::new(rcvbuf))
}

#[cfg(not(target_os = "linux"))]
fn capture_binder(_config: &Config, _available_memory: u64) -> Box<dyn CaptureBinder> {
    Box::new(mercury_packet::UnsupportedBinder)
}
