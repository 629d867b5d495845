//! Command orchestration.
//!
//! Provides execute functions for:
//! - live capture (`-c`)
//! - replay of a file, a directory of files, or the test packet (`-r`)

pub mod capture;
pub mod replay;

pub use capture::execute_capture;
pub use replay::execute_replay;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mercury_clock::{Clock, SystemClock};
use mercury_fs::{
    Filesystem, FsError, OutputError, OutputFile, OutputNaming, RecordOutput, StreamOutput,
};
use mercury_packet::{
    AnalysisEngine, AnalysisError, CaptureBinder, CaptureError, PcapFileInput, ReplayError,
    ReplayInput, TestPacketInput,
};
use mercury_queue::QueueProducer;
use mercury_schema::PacketRecord;
use thiserror::Error;

use crate::admission::AdmissionController;
use crate::cli::CliError;
use crate::config::{physical_memory, Config, ConfigError, InputMode};
use crate::coordinator::CoordinatorReport;
use crate::logger::Logger;
use crate::pipeline::{Pipeline, PipelineError};
use crate::privileges::{PrivilegeError, ProcessControl, SystemProcess};
use crate::signal::ShutdownFlag;
use crate::sleeper::{RealSleeper, Sleeper};
use crate::worker::{Worker, WorkerError, WorkerExit, WorkerReport};

/// Errors from command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] CliError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("analysis init failed: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("output error: {0}")]
    Output(#[from] OutputError),

    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] FsError),

    #[error("{0}")]
    Privilege(#[from] PrivilegeError),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    #[error("no files to replay in {0}")]
    NoReplayFiles(PathBuf),
}

impl From<WorkerError> for CommandError {
    fn from(error: WorkerError) -> Self {
        match error {
            WorkerError::Replay(e) => CommandError::Replay(e),
            WorkerError::Capture(e) => CommandError::Capture(e),
        }
    }
}

/// Result of command execution.
pub type CommandResult<T> = Result<T, CommandError>;

type StdoutFactory = Arc<dyn Fn() -> Box<dyn io::Write + Send> + Send + Sync>;

/// Everything a command needs from its environment.
pub struct Runtime<F: Filesystem> {
    pub fs: F,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub logger: Arc<dyn Logger>,
    pub shutdown: ShutdownFlag,
    pub process: Arc<dyn ProcessControl>,
    /// Memory the queue buffer fraction is taken from.
    pub available_memory: u64,
    stdout: StdoutFactory,
}

impl<F: Filesystem> Runtime<F> {
    /// Runtime over the real system.
    pub fn new(fs: F, shutdown: ShutdownFlag, logger: Arc<dyn Logger>) -> Self {
        Self {
            fs,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(RealSleeper),
            logger,
            shutdown,
            process: Arc::new(SystemProcess),
            available_memory: physical_memory(),
            stdout: Arc::new(|| -> Box<dyn io::Write + Send> { Box::new(io::stdout()) }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_process(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = process;
        self
    }

    pub fn with_available_memory(mut self, bytes: u64) -> Self {
        self.available_memory = bytes;
        self
    }

    /// Send stdout output to writers made by `factory`.
    pub fn with_stdout<S>(mut self, factory: S) -> Self
    where
        S: Fn() -> Box<dyn io::Write + Send> + Send + Sync + 'static,
    {
        self.stdout = Arc::new(factory);
        self
    }
}

/// Totals of one run, for the verbose summary line.
#[derive(Debug)]
pub struct RunSummary {
    pub workers: Vec<WorkerReport>,
    pub coordinator: CoordinatorReport,
    pub elapsed: Duration,
    /// `(analyzed, labelled)` when analysis ran.
    pub analysis: Option<(u64, u64)>,
}

impl RunSummary {
    pub fn packets_read(&self) -> u64 {
        self.workers.iter().map(|w| w.packets_read).sum()
    }

    pub fn records_written(&self) -> u64 {
        self.coordinator.records_written()
    }

    pub fn bytes_written(&self) -> u64 {
        self.coordinator.bytes_written()
    }

    pub fn queue_drops(&self) -> u64 {
        self.workers.iter().map(|w| w.queue_drops).sum()
    }

    pub fn admission_drops(&self) -> u64 {
        self.workers.iter().map(|w| w.admission_drops).sum()
    }

    pub fn failed_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.exit.is_failure()).count()
    }

    pub fn summary_line(&self) -> String {
        let nanos = self.elapsed.as_nanos();
        let secs = self.elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.bytes_written() as f64 / secs
        } else {
            0.0
        };
        format!(
            "packets read: {}, records written: {}, bytes written: {}, queue drops: {}, admission drops: {}, nanoseconds: {}, bytes/s: {:.4e}",
            self.packets_read(),
            self.records_written(),
            self.bytes_written(),
            self.queue_drops(),
            self.admission_drops(),
            nanos,
            rate
        )
    }
}

/// Format a Unix timestamp for the start-of-run log line.
fn format_start_time(ts: Duration) -> String {
    i64::try_from(ts.as_secs())
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, ts.subsec_nanos()).single())
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| format!("{}s", ts.as_secs()))
}

/// Open the outputs for `streams` worker streams: one output when there is
/// a single stream or the output is stdout, one file-set member per stream
/// otherwise.
pub fn open_outputs<F>(
    config: &Config,
    runtime: &Runtime<F>,
    streams: usize,
) -> CommandResult<Vec<Box<dyn RecordOutput>>>
where
    F: Filesystem + Clone + 'static,
{
    let format = config.output_format();
    let rotating = config.rotation_limit > 0;
    let Some(path) = config.output_path() else {
        let output = StreamOutput::new(format, (runtime.stdout)())?;
        return Ok(vec![Box::new(output) as Box<dyn RecordOutput>]);
    };

    if streams <= 1 {
        let naming = OutputNaming::single(path, rotating);
        let output = OutputFile::create(runtime.fs.clone(), naming, format, config.rotation_limit)?;
        runtime
            .logger
            .verbose(&format!("writing {} output to {}", format, path.display()));
        return Ok(vec![Box::new(output) as Box<dyn RecordOutput>]);
    }

    let mut outputs: Vec<Box<dyn RecordOutput>> = Vec::with_capacity(streams);
    for index in 0..streams {
        let naming = OutputNaming::file_set_member(path, index, rotating);
        let output = OutputFile::create(runtime.fs.clone(), naming, format, config.rotation_limit)?;
        outputs.push(Box::new(output));
    }
    runtime.logger.verbose(&format!(
        "writing {} output to file-set {} ({} members)",
        format,
        path.display(),
        streams
    ));
    Ok(outputs)
}

/// Replay inputs, one per worker.
pub fn replay_inputs<F>(config: &Config, runtime: &Runtime<F>) -> CommandResult<Vec<Box<dyn ReplayInput>>>
where
    F: Filesystem + Clone + 'static,
{
    match &config.input {
        InputMode::TestPacket => {
            let input = TestPacketInput::at(runtime.clock.now());
            Ok(vec![Box::new(input) as Box<dyn ReplayInput>])
        }
        InputMode::Read(path) if runtime.fs.is_dir(path) => {
            let files = runtime.fs.list_files(path)?;
            if files.is_empty() {
                return Err(CommandError::NoReplayFiles(path.clone()));
            }
            runtime.logger.verbose(&format!(
                "replaying {} file(s) from {}",
                files.len(),
                path.display()
            ));
            Ok(files
                .into_iter()
                .map(|file| Box::new(PcapFileInput::new(runtime.fs.clone(), file)) as Box<dyn ReplayInput>)
                .collect())
        }
        InputMode::Read(path) => {
            let input = PcapFileInput::new(runtime.fs.clone(), path.clone());
            Ok(vec![Box::new(input) as Box<dyn ReplayInput>])
        }
        InputMode::Capture(_) => Ok(Vec::new()),
    }
}

/// Load the analysis engine when `-a` is given.
pub(crate) fn init_analysis<F: Filesystem>(
    config: &Config,
    runtime: &Runtime<F>,
) -> CommandResult<Option<Arc<AnalysisEngine>>> {
    if !config.analysis {
        return Ok(None);
    }
    let engine = AnalysisEngine::init(&runtime.fs, config.resources.as_deref())?;
    runtime.logger.verbose(&format!(
        "analysis initialised with {} fingerprint label(s)",
        engine.label_count()
    ));
    Ok(Some(Arc::new(engine)))
}

fn finalize_analysis<F: Filesystem>(
    engine: Option<Arc<AnalysisEngine>>,
    runtime: &Runtime<F>,
) -> Option<(u64, u64)> {
    let engine = engine?;
    let (analyzed, labelled) = engine.finalize();
    runtime.logger.verbose(&format!(
        "analysis finalized: {} fingerprint(s) analyzed, {} labelled",
        analyzed, labelled
    ));
    Some((analyzed, labelled))
}

/// Log the per-worker and overall results at verbose level.
fn log_summary<F: Filesystem>(summary: &RunSummary, runtime: &Runtime<F>) {
    for worker in &summary.workers {
        runtime.logger.debug(&format!(
            "worker {} ({}): packets={} queued={} queue_drops={} admission_drops={} parse_errors={} passes={}",
            worker.index,
            worker.name,
            worker.packets_read,
            worker.records_queued,
            worker.queue_drops,
            worker.admission_drops,
            worker.parse_errors,
            worker.passes
        ));
    }
    if summary.coordinator.write_errors > 0 {
        runtime.logger.info(&format!(
            "{} record(s) could not be written",
            summary.coordinator.write_errors
        ));
    }
    runtime.logger.verbose(&summary.summary_line());
}

/// Run one worker per source through a fresh pipeline and collect the
/// results.
///
/// `build` turns a source and its queue producer into a worker. When the
/// only worker fails, its error is returned after the outputs are closed.
pub(crate) fn run_pipeline<F, S, W, B>(
    config: &Config,
    runtime: &Runtime<F>,
    sources: Vec<S>,
    admission: Arc<AdmissionController>,
    analyzer: Option<Arc<AnalysisEngine>>,
    mut build: B,
) -> CommandResult<RunSummary>
where
    F: Filesystem + Clone + 'static,
    W: Worker,
    B: FnMut(usize, S, QueueProducer<PacketRecord>) -> W,
{
    let streams = sources.len();
    let outputs = open_outputs(config, runtime, streams)?;
    let capacity = config.queue_capacity(runtime.available_memory, streams);

    let start = runtime.clock.now();
    runtime
        .logger
        .verbose(&format!("run started at {}", format_start_time(start)));
    let mut pipeline = Pipeline::start(
        outputs,
        streams,
        capacity,
        admission,
        runtime.shutdown.clone(),
        Arc::clone(&runtime.sleeper),
        Arc::clone(&runtime.logger),
    )?;
    let workers: Vec<W> = sources
        .into_iter()
        .zip(pipeline.take_producers())
        .enumerate()
        .map(|(index, (source, queue))| build(index, source, queue))
        .collect();
    let (mut reports, coordinator) = pipeline.run_workers(workers)?;
    let elapsed = runtime.clock.now().saturating_sub(start);
    let analysis = finalize_analysis(analyzer, runtime);

    let failure = sole_failure(&mut reports);
    let summary = RunSummary {
        workers: reports,
        coordinator,
        elapsed,
        analysis,
    };
    log_summary(&summary, runtime);
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(summary),
    }
}

/// The error of the only worker, if there is exactly one and it failed.
fn sole_failure(workers: &mut [WorkerReport]) -> Option<WorkerError> {
    let [only] = workers else {
        return None;
    };
    match std::mem::replace(&mut only.exit, WorkerExit::InputExhausted) {
        WorkerExit::Failed(e) => Some(e),
        other => {
            only.exit = other;
            None
        }
    }
}

/// Run the configured command.
pub fn execute<F>(
    config: &Config,
    runtime: &Runtime<F>,
    binder: &dyn CaptureBinder,
) -> CommandResult<RunSummary>
where
    F: Filesystem + Clone + 'static,
{
    if let Some(dir) = &config.directory {
        runtime.process.change_directory(dir)?;
        runtime
            .logger
            .verbose(&format!("working directory {}", dir.display()));
    }
    match &config.input {
        InputMode::Capture(interface) => execute_capture(config, interface, binder, runtime),
        InputMode::Read(_) | InputMode::TestPacket => {
            let inputs = replay_inputs(config, runtime)?;
            execute_replay(config, inputs, runtime)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parse_from;
    use crate::logger::NullLogger;
    use crate::privileges::{MockProcess, ProcessCall};
    use mercury_clock::{AdvancingClock, MockClock};
    use mercury_fs::MockFilesystem;
    use mercury_packet::MockBinder;
    use std::path::Path;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["mercury"];
        argv.extend_from_slice(args);
        Config::from_cli(&parse_from(argv).expect("parse"), 4).expect("config")
    }

    fn runtime(fs: &MockFilesystem) -> Runtime<MockFilesystem> {
        let stdout = fs.clone();
        Runtime::new(fs.clone(), ShutdownFlag::manual(), Arc::new(NullLogger))
            .with_process(Arc::new(MockProcess::new()))
            .with_stdout(move || stdout.create(Path::new("/stdout")).expect("create"))
    }

    // ===========================================
    // Test Category A — Outputs
    // ===========================================

    #[test]
    fn test_open_single_output() {
        let fs = MockFilesystem::new();
        let outputs = open_outputs(&config(&["-r", "a.pcap", "-f", "/out/fp.json"]), &runtime(&fs), 1)
            .expect("open");
        assert_eq!(outputs.len(), 1);
        assert!(fs.exists(Path::new("/out/fp.json")));
    }

    #[test]
    fn test_open_file_set() {
        let fs = MockFilesystem::new();
        let cfg = config(&["-c", "eth0", "-w", "/out/raw.pcap", "-t", "3", "-l", "10"]);
        let outputs = open_outputs(&cfg, &runtime(&fs), 3).expect("open");
        assert_eq!(outputs.len(), 3);
        assert_eq!(
            fs.paths(),
            vec![
                PathBuf::from("/out/raw.pcap/raw-w0-0.pcap"),
                PathBuf::from("/out/raw.pcap/raw-w1-0.pcap"),
                PathBuf::from("/out/raw.pcap/raw-w2-0.pcap"),
            ]
        );
    }

    #[test]
    fn test_open_stdout_is_single_shared_output() {
        let fs = MockFilesystem::new();
        let outputs = open_outputs(&config(&["-r", "dir"]), &runtime(&fs), 3).expect("open");
        assert_eq!(outputs.len(), 1);
        assert!(fs.exists(Path::new("/stdout")));
    }

    #[test]
    fn test_open_output_failure() {
        let fs = MockFilesystem::new();
        fs.set_read_only(true);
        let result = open_outputs(&config(&["-r", "a.pcap", "-f", "/out/fp.json"]), &runtime(&fs), 1);
        assert!(matches!(result, Err(CommandError::Output(_))));
    }

    // ===========================================
    // Test Category B — Replay Inputs
    // ===========================================

    #[test]
    fn test_replay_inputs_directory_sorted() {
        let fs = MockFilesystem::new();
        fs.add_file(PathBuf::from("/in/b.pcap"), Vec::new());
        fs.add_file(PathBuf::from("/in/a.pcap"), Vec::new());
        let inputs = replay_inputs(&config(&["-r", "/in"]), &runtime(&fs)).expect("inputs");
        let names: Vec<String> = inputs.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["/in/a.pcap", "/in/b.pcap"]);
    }

    #[test]
    fn test_replay_inputs_empty_directory() {
        let fs = MockFilesystem::new();
        fs.create_dir_all(Path::new("/empty")).expect("mkdir");
        let result = replay_inputs(&config(&["-r", "/empty"]), &runtime(&fs));
        assert!(matches!(result, Err(CommandError::NoReplayFiles(_))));
    }

    #[test]
    fn test_replay_inputs_single_file_and_test_packet() {
        let fs = MockFilesystem::new();
        assert_eq!(
            replay_inputs(&config(&["-r", "/in/a.pcap"]), &runtime(&fs))
                .expect("inputs")
                .len(),
            1
        );
        let inputs = replay_inputs(&config(&["--test-packet"]), &runtime(&fs)).expect("inputs");
        assert_eq!(inputs[0].name(), "test packet");
    }

    // ===========================================
    // Test Category C — Dispatch
    // ===========================================

    #[test]
    fn test_execute_changes_directory_first() {
        let fs = MockFilesystem::new();
        let process = MockProcess::new();
        let rt = runtime(&fs).with_process(Arc::new(process.clone()));
        let cfg = config(&["-r", "/missing.pcap", "-d", "/work"]);
        let _ = execute(&cfg, &rt, &MockBinder::new());
        assert_eq!(
            process.calls().first(),
            Some(&ProcessCall::ChangeDirectory(PathBuf::from("/work")))
        );
    }

    #[test]
    fn test_analysis_init_failure_aborts() {
        let fs = MockFilesystem::new();
        let cfg = config(&["-r", "/in.pcap", "-a", "--resources", "/missing.json"]);
        let result = execute(&cfg, &runtime(&fs), &MockBinder::new());
        assert!(matches!(result, Err(CommandError::Analysis(_))));
    }

    // ===========================================
    // Test Category D — Summary
    // ===========================================

    #[test]
    fn test_summary_line() {
        let summary = RunSummary {
            workers: Vec::new(),
            coordinator: CoordinatorReport {
                records_per_worker: vec![3],
                outputs: vec![mercury_fs::OutputSummary {
                    records: 3,
                    bytes: 2000,
                    files: Vec::new(),
                }],
                ..CoordinatorReport::default()
            },
            elapsed: Duration::from_secs(2),
            analysis: None,
        };
        assert_eq!(
            summary.summary_line(),
            "packets read: 0, records written: 3, bytes written: 2000, queue drops: 0, admission drops: 0, nanoseconds: 2000000000, bytes/s: 1.0000e3"
        );
    }

    #[test]
    fn test_elapsed_measured_by_runtime_clock() {
        let fs = MockFilesystem::new();
        let clock = AdvancingClock::new(Duration::from_secs(1_000), Duration::from_millis(5));
        let rt = runtime(&fs).with_clock(Arc::new(clock));
        let summary = execute(
            &config(&["--test-packet", "-w", "/out/t.pcap"]),
            &rt,
            &MockBinder::new(),
        )
        .expect("run");
        assert_eq!(summary.elapsed, Duration::from_millis(5));
    }

    #[test]
    fn test_test_packet_stamped_with_clock() {
        let fs = MockFilesystem::new();
        let rt = runtime(&fs).with_clock(Arc::new(MockClock::from_secs(1_700_000_000)));
        execute(
            &config(&["--test-packet", "-w", "/out/t.pcap"]),
            &rt,
            &MockBinder::new(),
        )
        .expect("run");

        let bytes = fs.get_file(Path::new("/out/t.pcap")).expect("file");
        let mut reader = pcap_file::pcap::PcapReader::new(std::io::Cursor::new(bytes)).expect("pcap");
        let packet = reader.next_packet().expect("one packet").expect("valid");
        assert_eq!(packet.timestamp, Duration::from_secs(1_700_000_000));
        assert!(reader.next_packet().is_none());
    }

    #[test]
    fn test_format_start_time() {
        assert_eq!(
            format_start_time(Duration::from_millis(1_700_000_000_250)),
            "2023-11-14T22:13:20.250Z"
        );
    }
}
