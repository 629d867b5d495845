//! Replay command: PCAP files, a directory of them, or the test packet.

use std::path::PathBuf;
use std::sync::Arc;

use mercury_fs::Filesystem;
use mercury_packet::ReplayInput;

use crate::admission::AdmissionController;
use crate::config::{Config, InputMode};
use crate::worker::ReplayWorker;

use super::{init_analysis, run_pipeline, CommandError, CommandResult, RunSummary, Runtime};

/// Replay every input `loop_count` times, one worker per input.
///
/// A failing input ends only its own worker. The run fails only when that
/// worker was the only one.
pub fn execute_replay<F>(
    config: &Config,
    inputs: Vec<Box<dyn ReplayInput>>,
    runtime: &Runtime<F>,
) -> CommandResult<RunSummary>
where
    F: Filesystem + Clone + 'static,
{
    if inputs.is_empty() {
        let path = match &config.input {
            InputMode::Read(path) => path.clone(),
            InputMode::Capture(_) | InputMode::TestPacket => PathBuf::new(),
        };
        return Err(CommandError::NoReplayFiles(path));
    }
    let analyzer = init_analysis(config, runtime)?;

    if config.loop_count > 1 {
        runtime
            .logger
            .info(&format!("loop count: {}", config.loop_count));
    }
    if config.threads > 1 {
        runtime.logger.verbose(&format!(
            "replay runs one worker per input; {} input(s), {} thread(s) requested",
            inputs.len(),
            config.threads
        ));
    }
    if let Some(user) = &config.user {
        runtime.process.drop_privileges(user)?;
        runtime.logger.verbose(&format!("running as user {}", user));
    }

    let kind = config.processor_kind();
    let loop_count = config.loop_count;
    let logger = Arc::clone(&runtime.logger);
    let engine = analyzer.clone();
    run_pipeline(
        config,
        runtime,
        inputs,
        Arc::new(AdmissionController::disabled()),
        analyzer,
        |index, input, queue| {
            ReplayWorker::new(
                index,
                input,
                loop_count,
                kind.build(engine.clone()),
                queue,
                Arc::clone(&logger),
            )
        },
    )
}
