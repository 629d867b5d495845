//! Live capture command.
//!
//! Startup order: analysis, capture bindings, privilege drop, outputs,
//! then threads. Any failure before the threads start ends the run.

use std::sync::Arc;

use mercury_fs::Filesystem;
use mercury_packet::CaptureBinder;

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::worker::CaptureWorker;

use super::{init_analysis, run_pipeline, CommandResult, RunSummary, Runtime};

/// Capture on `interface` with one worker per configured thread until the
/// stop flag is set.
pub fn execute_capture<F>(
    config: &Config,
    interface: &str,
    binder: &dyn CaptureBinder,
    runtime: &Runtime<F>,
) -> CommandResult<RunSummary>
where
    F: Filesystem + Clone + 'static,
{
    let analyzer = init_analysis(config, runtime)?;

    let workers = config.threads.max(1);
    runtime.logger.verbose(&format!(
        "capturing on {} with {} worker thread(s)",
        interface, workers
    ));
    let mut bindings = Vec::with_capacity(workers);
    for index in 0..workers {
        bindings.push(binder.bind(interface, index, workers)?);
    }

    if let Some(user) = &config.user {
        runtime.process.drop_privileges(user)?;
        runtime.logger.verbose(&format!("running as user {}", user));
    }

    let admission = Arc::new(if config.admission_applies() {
        AdmissionController::adaptive()
    } else {
        AdmissionController::disabled()
    });
    let worker_admission = config
        .admission_applies()
        .then(|| Arc::clone(&admission));
    if worker_admission.is_some() {
        runtime.logger.verbose(&format!(
            "adaptive admission starting at {}%",
            admission.percent()
        ));
    }

    let kind = config.processor_kind();
    let logger = Arc::clone(&runtime.logger);
    let engine = analyzer.clone();
    run_pipeline(
        config,
        runtime,
        bindings,
        admission,
        analyzer,
        |index, binding, queue| {
            CaptureWorker::new(
                index,
                interface,
                binding,
                kind.build(engine.clone()),
                queue,
                worker_admission.clone(),
                Arc::clone(&logger),
            )
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parse_from;
    use crate::commands::CommandError;
    use crate::logger::MockLogger;
    use crate::privileges::{MockProcess, ProcessCall};
    use crate::signal::ShutdownFlag;
    use crate::sleeper::MockSleeper;
    use mercury_fs::MockFilesystem;
    use mercury_packet::{CaptureError, MockBinder, MockBinding, RawPacket, TEST_PACKET};
    use std::path::Path;
    use std::time::Duration;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["mercury"];
        argv.extend_from_slice(args);
        Config::from_cli(&parse_from(argv).expect("parse"), 4).expect("config")
    }

    fn runtime(fs: &MockFilesystem, shutdown: &ShutdownFlag, process: &MockProcess) -> Runtime<MockFilesystem> {
        Runtime::new(fs.clone(), shutdown.clone(), Arc::new(MockLogger::new()))
            .with_sleeper(Arc::new(MockSleeper::new()))
            .with_process(Arc::new(process.clone()))
            .with_available_memory(64 << 20)
    }

    fn syn_packets(count: usize) -> Vec<RawPacket> {
        (0..count)
            .map(|i| RawPacket::new(Duration::from_secs(i as u64), TEST_PACKET.to_vec()))
            .collect()
    }

    /// Binding that delivers `count` packets, then sets `shutdown`.
    fn stopping_binding(count: usize, shutdown: &ShutdownFlag) -> MockBinding {
        let flag = shutdown.clone();
        MockBinding::new(syn_packets(count)).on_exhausted(move || flag.trigger())
    }

    #[test]
    fn test_capture_writes_fingerprints() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new();
        let binder = MockBinder::new().with_binding(0, stopping_binding(3, &shutdown));
        let cfg = config(&["-c", "eth0", "-f", "/out/fp.json"]);

        let summary =
            execute_capture(&cfg, "eth0", &binder, &runtime(&fs, &shutdown, &process)).expect("run");

        assert_eq!(summary.packets_read(), 3);
        assert_eq!(summary.records_written(), 3);
        let text = String::from_utf8(fs.get_file(Path::new("/out/fp.json")).expect("file"))
            .expect("utf8");
        assert_eq!(text.lines().count(), 3);
        assert_eq!(binder.bound(), vec![("eth0".to_string(), 0, 1)]);
    }

    #[test]
    fn test_capture_multi_worker_file_set() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new();
        // Worker 0 delivers its packets and then stops the run; worker 1
        // delivers its packets right away.
        let binder = MockBinder::new()
            .with_binding(0, stopping_binding(4, &shutdown))
            .with_binding(1, MockBinding::new(syn_packets(2)));
        let cfg = config(&["-c", "eth0", "-w", "/out/raw.pcap", "-t", "2"]);

        let summary =
            execute_capture(&cfg, "eth0", &binder, &runtime(&fs, &shutdown, &process)).expect("run");

        assert_eq!(summary.workers.len(), 2);
        assert_eq!(summary.coordinator.records_per_worker[0], 4);
        assert!(fs.exists(Path::new("/out/raw.pcap/raw-w0.pcap")));
        assert!(fs.exists(Path::new("/out/raw.pcap/raw-w1.pcap")));
    }

    #[test]
    fn test_capture_drops_privileges_after_bind() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new();
        let binder = MockBinder::new().with_binding(0, stopping_binding(0, &shutdown));
        let cfg = config(&["-c", "eth0", "-f", "/out/fp.json", "-u", "nobody"]);

        execute_capture(&cfg, "eth0", &binder, &runtime(&fs, &shutdown, &process)).expect("run");

        assert_eq!(binder.bound().len(), 1);
        assert_eq!(
            process.calls(),
            vec![ProcessCall::DropPrivileges("nobody".to_string())]
        );
    }

    #[test]
    fn test_capture_unknown_user_is_fatal() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new().with_users(&["mercury"]);
        let binder = MockBinder::new();
        let cfg = config(&["-c", "eth0", "-f", "/out/fp.json", "-u", "nobody"]);

        let result = execute_capture(&cfg, "eth0", &binder, &runtime(&fs, &shutdown, &process));
        assert!(matches!(result, Err(CommandError::Privilege(_))));
        assert!(!fs.exists(Path::new("/out/fp.json")));
    }

    #[test]
    fn test_capture_bind_failure_is_fatal() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new();
        let cfg = config(&["-c", MockBinder::unknown_interface(), "-f", "/out/fp.json"]);

        let result = execute_capture(
            &cfg,
            MockBinder::unknown_interface(),
            &MockBinder::new(),
            &runtime(&fs, &shutdown, &process),
        );
        assert!(matches!(
            result,
            Err(CommandError::Capture(CaptureError::InterfaceNotFound { .. }))
        ));
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn test_capture_sole_worker_receive_failure() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new();
        let binder = MockBinder::new()
            .with_binding(0, MockBinding::new(syn_packets(2)).then_fail("link down"));
        let cfg = config(&["-c", "eth0", "-f", "/out/fp.json"]);

        let result = execute_capture(&cfg, "eth0", &binder, &runtime(&fs, &shutdown, &process));
        assert!(matches!(result, Err(CommandError::Capture(CaptureError::Receive(_)))));
        let text = String::from_utf8(fs.get_file(Path::new("/out/fp.json")).expect("file"))
            .expect("utf8");
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_capture_adaptive_admission() {
        let fs = MockFilesystem::new();
        let shutdown = ShutdownFlag::manual();
        let process = MockProcess::new();
        let binder = MockBinder::new().with_binding(0, stopping_binding(2000, &shutdown));
        let cfg = config(&["-c", "eth0", "-w", "/out/raw.pcap", "--adaptive"]);

        let summary =
            execute_capture(&cfg, "eth0", &binder, &runtime(&fs, &shutdown, &process)).expect("run");

        let worker = &summary.workers[0];
        assert_eq!(worker.packets_read, 2000);
        assert_eq!(worker.admission_drops + worker.records_offered, 2000);
        assert_eq!(summary.records_written(), worker.records_queued);
    }
}
