//! Capture and replay workers.
//!
//! A worker owns one packet source, one packet processor and the producer
//! half of its queue. It never blocks on the queue: a record that does not
//! fit is dropped and counted. Sequence numbers are assigned per worker
//! from 0 to every record offered, so a dropped record leaves a gap.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mercury_packet::{
    CaptureBinding, CaptureError, PacketProcessor, ProcessorStats, RawPacket, ReplayError,
    ReplayInput,
};
use mercury_queue::QueueProducer;
use mercury_schema::{PacketRecord, RecordPayload};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::admission::AdmissionController;
use crate::logger::Logger;
use crate::signal::ShutdownCheck;

/// Lifecycle of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Running,
    /// Replay pass `n` (2-based) has started.
    Repeat(u64),
    /// Replay finished every pass.
    Done,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Init => f.write_str("init"),
            WorkerState::Running => f.write_str("running"),
            WorkerState::Repeat(pass) => write!(f, "repeat({pass})"),
            WorkerState::Done => f.write_str("done"),
            WorkerState::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Why a worker stopped.
#[derive(Debug)]
pub enum WorkerExit {
    /// The stop flag was observed.
    StopRequested,
    /// Replay completed every pass.
    InputExhausted,
    /// The source failed; the worker ended early.
    Failed(WorkerError),
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, WorkerExit::Failed(_))
    }
}

/// Counters returned when a worker stops.
#[derive(Debug)]
pub struct WorkerReport {
    pub index: usize,
    pub name: String,
    pub state: WorkerState,
    pub exit: WorkerExit,
    /// Replay passes completed.
    pub passes: u64,
    pub packets_read: u64,
    pub records_offered: u64,
    pub records_queued: u64,
    pub queue_drops: u64,
    pub admission_drops: u64,
    pub parse_errors: u64,
    pub processor: ProcessorStats,
}

/// Something the pipeline can run on its own thread.
pub trait Worker: Send + 'static {
    fn index(&self) -> usize;

    /// Run until the source ends or `shutdown` reports stop.
    fn run(self, shutdown: &dyn ShutdownCheck) -> WorkerReport;
}

struct RecordEmitter {
    worker: usize,
    queue: QueueProducer<PacketRecord>,
    next_sequence: u64,
    offered: u64,
    queued: u64,
    dropped: u64,
}

impl RecordEmitter {
    fn new(worker: usize, queue: QueueProducer<PacketRecord>) -> Self {
        Self {
            worker,
            queue,
            next_sequence: 0,
            offered: 0,
            queued: 0,
            dropped: 0,
        }
    }

    fn emit(&mut self, timestamp: Duration, payload: RecordPayload) {
        let record = PacketRecord::new(timestamp, self.worker, self.next_sequence, payload);
        self.next_sequence += 1;
        self.offered += 1;
        if self.queue.try_push(record) {
            self.queued += 1;
        } else {
            self.dropped += 1;
        }
    }
}

/// State shared by both worker kinds: processor, emitter and counters.
struct WorkerCore {
    index: usize,
    name: String,
    state: WorkerState,
    processor: Box<dyn PacketProcessor>,
    emitter: RecordEmitter,
    scratch: Vec<RecordPayload>,
    packets_read: u64,
    admission_drops: u64,
    parse_errors: u64,
    passes: u64,
    logger: Arc<dyn Logger>,
}

impl WorkerCore {
    fn new(
        index: usize,
        name: String,
        processor: Box<dyn PacketProcessor>,
        queue: QueueProducer<PacketRecord>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            index,
            name,
            state: WorkerState::Init,
            processor,
            emitter: RecordEmitter::new(index, queue),
            scratch: Vec::new(),
            packets_read: 0,
            admission_drops: 0,
            parse_errors: 0,
            passes: 0,
            logger,
        }
    }

    fn transition(&mut self, next: WorkerState) {
        self.logger.debug(&format!(
            "worker {} ({}): {} -> {}",
            self.index, self.name, self.state, next
        ));
        self.state = next;
    }

    fn handle(&mut self, packet: &RawPacket) {
        if let Err(e) = self.processor.process(packet, &mut self.scratch) {
            self.parse_errors += 1;
            self.logger
                .debug(&format!("worker {}: skipping packet: {}", self.index, e));
        }
        for payload in self.scratch.drain(..) {
            self.emitter.emit(packet.timestamp, payload);
        }
    }

    fn finish(mut self, exit: WorkerExit) -> WorkerReport {
        if let WorkerExit::Failed(e) = &exit {
            self.logger
                .info(&format!("worker {} ({}) failed: {}", self.index, self.name, e));
        }
        self.transition(WorkerState::Stopped);
        WorkerReport {
            index: self.index,
            name: self.name,
            state: self.state,
            exit,
            passes: self.passes,
            packets_read: self.packets_read,
            records_offered: self.emitter.offered,
            records_queued: self.emitter.queued,
            queue_drops: self.emitter.dropped,
            admission_drops: self.admission_drops,
            parse_errors: self.parse_errors,
            processor: self.processor.stats(),
        }
    }
}

/// Worker bound to one live receive channel.
pub struct CaptureWorker {
    core: WorkerCore,
    binding: Box<dyn CaptureBinding>,
    admission: Option<Arc<AdmissionController>>,
    rng: SmallRng,
}

impl CaptureWorker {
    /// `admission` is consulted for every packet when given; pass `None`
    /// when records do not carry raw packets.
    pub fn new(
        index: usize,
        interface: &str,
        binding: Box<dyn CaptureBinding>,
        processor: Box<dyn PacketProcessor>,
        queue: QueueProducer<PacketRecord>,
        admission: Option<Arc<AdmissionController>>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            core: WorkerCore::new(index, interface.to_string(), processor, queue, logger),
            binding,
            admission,
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Replace the admission draw source, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }
}

impl Worker for CaptureWorker {
    fn index(&self) -> usize {
        self.core.index
    }

    fn run(mut self, shutdown: &dyn ShutdownCheck) -> WorkerReport {
        self.core.transition(WorkerState::Running);
        while !shutdown.should_stop() {
            let packet = match self.binding.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => continue,
                Err(e) => return self.core.finish(WorkerExit::Failed(e.into())),
            };
            self.core.packets_read += 1;
            if let Some(admission) = &self.admission {
                if !admission.accept_with(&mut self.rng) {
                    self.core.admission_drops += 1;
                    continue;
                }
            }
            self.core.handle(&packet);
        }
        self.core.finish(WorkerExit::StopRequested)
    }
}

/// Worker replaying one input `loop_count` times.
pub struct ReplayWorker {
    core: WorkerCore,
    input: Box<dyn ReplayInput>,
    loop_count: u64,
}

impl ReplayWorker {
    pub fn new(
        index: usize,
        input: Box<dyn ReplayInput>,
        loop_count: u64,
        processor: Box<dyn PacketProcessor>,
        queue: QueueProducer<PacketRecord>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            core: WorkerCore::new(index, input.name(), processor, queue, logger),
            input,
            loop_count: loop_count.max(1),
        }
    }

    fn replay_pass(&mut self, shutdown: &dyn ShutdownCheck) -> Result<bool, ReplayError> {
        let mut reader = self.input.open()?;
        loop {
            if shutdown.should_stop() {
                return Ok(false);
            }
            match reader.read_next()? {
                Some(packet) => {
                    self.core.packets_read += 1;
                    self.core.handle(&packet);
                }
                None => return Ok(true),
            }
        }
    }
}

impl Worker for ReplayWorker {
    fn index(&self) -> usize {
        self.core.index
    }

    fn run(mut self, shutdown: &dyn ShutdownCheck) -> WorkerReport {
        self.core.transition(WorkerState::Running);
        for pass in 1..=self.loop_count {
            if pass > 1 {
                self.core.transition(WorkerState::Repeat(pass));
            }
            match self.replay_pass(shutdown) {
                Ok(true) => self.core.passes += 1,
                Ok(false) => return self.core.finish(WorkerExit::StopRequested),
                Err(e) => return self.core.finish(WorkerExit::Failed(e.into())),
            }
        }
        self.core.transition(WorkerState::Done);
        self.core.finish(WorkerExit::InputExhausted)
    }
}
