//! Thread orchestration for one run.
//!
//! [`Pipeline::start`] creates one queue per worker and spawns the output
//! coordinator, which waits for the ready signal. The caller takes the
//! producers, builds its workers, and hands them to [`Pipeline::run_workers`],
//! which spawns them, joins them, sets the stop flag and joins the
//! coordinator.

use std::io;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mercury_fs::RecordOutput;
use mercury_queue::{worker_queue, QueueProducer};
use mercury_schema::PacketRecord;
use thiserror::Error;

use crate::admission::AdmissionController;
use crate::coordinator::{CoordinatorReport, OutputCoordinator};
use crate::logger::Logger;
use crate::signal::ShutdownFlag;
use crate::sleeper::Sleeper;
use crate::worker::{Worker, WorkerReport};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("output coordinator panicked")]
    CoordinatorPanicked,

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

pub struct Pipeline {
    producers: Vec<Option<QueueProducer<PacketRecord>>>,
    ready: Option<SyncSender<()>>,
    shutdown: ShutdownFlag,
    coordinator: JoinHandle<CoordinatorReport>,
}

impl Pipeline {
    /// Create `workers` queues of `capacity` slots and start the output
    /// coordinator over them.
    pub fn start(
        outputs: Vec<Box<dyn RecordOutput>>,
        workers: usize,
        capacity: usize,
        admission: Arc<AdmissionController>,
        shutdown: ShutdownFlag,
        sleeper: Arc<dyn Sleeper>,
        logger: Arc<dyn Logger>,
    ) -> Result<Self, PipelineError> {
        let (producers, consumers): (Vec<_>, Vec<_>) =
            (0..workers).map(|_| worker_queue(capacity)).unzip();
        let (ready_tx, ready_rx) = sync_channel(1);

        logger.verbose(&format!(
            "{} worker queue(s) of {} records",
            workers, capacity
        ));
        let coordinator = OutputCoordinator::new(consumers, outputs, admission, logger);
        let stop = shutdown.clone();
        let handle = thread::Builder::new()
            .name("mercury-output".to_string())
            .spawn(move || coordinator.run(ready_rx, &stop, sleeper.as_ref()))
            .map_err(PipelineError::Spawn)?;

        Ok(Self {
            producers: producers.into_iter().map(Some).collect(),
            ready: Some(ready_tx),
            shutdown,
            coordinator: handle,
        })
    }

    /// Producer halves not yet taken, in worker order.
    pub fn take_producers(&mut self) -> Vec<QueueProducer<PacketRecord>> {
        self.producers.iter_mut().filter_map(Option::take).collect()
    }

    /// Release the coordinator. Only the first call has an effect.
    pub fn signal_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.try_send(());
        }
    }

    /// Spawn every worker, wait for all of them, then stop and join the
    /// coordinator.
    ///
    /// If a worker thread cannot be spawned the stop flag is set, workers
    /// already running are joined, and the spawn error is returned after the
    /// coordinator has drained.
    pub fn run_workers<W: Worker>(
        mut self,
        workers: Vec<W>,
    ) -> Result<(Vec<WorkerReport>, CoordinatorReport), PipelineError> {
        let mut handles = Vec::with_capacity(workers.len());
        let mut failure = None;
        for worker in workers {
            let index = worker.index();
            let stop = self.shutdown.clone();
            match spawn_worker(index, move || worker.run(&stop)) {
                Ok(handle) => {
                    handles.push((index, handle));
                    self.signal_ready();
                }
                Err(e) => {
                    self.shutdown.trigger();
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => {
                    failure.get_or_insert(PipelineError::WorkerPanicked(index));
                }
            }
        }

        let coordinator = self.finish()?;
        match failure {
            Some(e) => Err(e),
            None => Ok((reports, coordinator)),
        }
    }

    /// Set the stop flag and wait for the coordinator's final drain.
    ///
    /// Producers that were never taken are dropped first so their queues
    /// count as finished.
    pub fn finish(mut self) -> Result<CoordinatorReport, PipelineError> {
        self.producers.clear();
        self.ready = None;
        self.shutdown.trigger();
        self.coordinator
            .join()
            .map_err(|_| PipelineError::CoordinatorPanicked)
    }
}

/// Spawn worker `index` on a named thread.
pub fn spawn_worker<F>(index: usize, body: F) -> Result<JoinHandle<WorkerReport>, PipelineError>
where
    F: FnOnce() -> WorkerReport + Send + 'static,
{
    thread::Builder::new()
        .name(format!("mercury-w{index}"))
        .spawn(body)
        .map_err(PipelineError::Spawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullLogger;
    use crate::sleeper::MockSleeper;
    use crate::worker::ReplayWorker;
    use mercury_fs::{Filesystem, MockFilesystem, OutputFormat, StreamOutput};
    use mercury_packet::{MockReplayInput, ProcessorKind, RawPacket};
    use std::path::Path;
    use std::time::Duration;

    fn stream(fs: &MockFilesystem, path: &str) -> Box<dyn RecordOutput> {
        let writer = fs.create(Path::new(path)).expect("create");
        Box::new(StreamOutput::new(OutputFormat::Pcap, writer).expect("open"))
    }

    fn start(fs: &MockFilesystem, workers: usize, capacity: usize) -> Pipeline {
        Pipeline::start(
            vec![stream(fs, "/out.pcap")],
            workers,
            capacity,
            Arc::new(AdmissionController::disabled()),
            ShutdownFlag::manual(),
            Arc::new(MockSleeper::new()),
            Arc::new(NullLogger),
        )
        .expect("start")
    }

    #[test]
    fn test_take_producers_once() {
        let fs = MockFilesystem::new();
        let mut pipeline = start(&fs, 3, 8);
        assert_eq!(pipeline.take_producers().len(), 3);
        assert!(pipeline.take_producers().is_empty());
        pipeline.finish().expect("finish");
    }

    #[test]
    fn test_finish_without_workers() {
        let fs = MockFilesystem::new();
        let pipeline = start(&fs, 2, 8);
        let report = pipeline.finish().expect("finish");
        assert_eq!(report.records_written(), 0);
        assert_eq!(report.records_per_worker, vec![0, 0]);
    }

    #[test]
    fn test_records_pushed_before_finish_are_written() {
        let fs = MockFilesystem::new();
        let mut pipeline = start(&fs, 1, 16);
        let producer = pipeline.take_producers().pop().expect("producer");
        for seq in 0..10 {
            let record = mercury_schema::PacketRecord::new(
                Duration::ZERO,
                0,
                seq,
                mercury_schema::RecordPayload::packet(vec![0; 60]),
            );
            assert!(producer.try_push(record));
        }
        pipeline.signal_ready();
        drop(producer);
        let report = pipeline.finish().expect("finish");
        assert_eq!(report.records_written(), 10);
    }

    #[test]
    fn test_run_workers_joins_and_drains() {
        let fs = MockFilesystem::new();
        let mut pipeline = start(&fs, 2, 64);
        let workers: Vec<ReplayWorker> = pipeline
            .take_producers()
            .into_iter()
            .enumerate()
            .map(|(index, queue)| {
                let packets = (0..5)
                    .map(|i| RawPacket::new(Duration::from_secs(i), vec![index as u8; 60]))
                    .collect();
                ReplayWorker::new(
                    index,
                    Box::new(MockReplayInput::new(format!("in{index}"), packets)),
                    2,
                    ProcessorKind::Packet { select: false }.build(None),
                    queue,
                    Arc::new(NullLogger),
                )
            })
            .collect();

        let (reports, coordinator) = pipeline.run_workers(workers).expect("run");
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.records_queued == 10));
        assert_eq!(coordinator.records_per_worker, vec![10, 10]);
    }
}
