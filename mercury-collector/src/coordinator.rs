//! Output coordinator.
//!
//! The only thread that touches outputs. It drains every worker queue in
//! round-robin order, writes each record to the output of the worker that
//! produced it, and feeds queue pressure back to the admission controller.
//! After stop it keeps draining until every producer has gone and every
//! queue is empty, then closes the outputs.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

use mercury_fs::{OutputSummary, RecordOutput};
use mercury_queue::QueueConsumer;
use mercury_schema::PacketRecord;

use crate::admission::AdmissionController;
use crate::logger::Logger;
use crate::signal::ShutdownCheck;
use crate::sleeper::Sleeper;

/// Pause after a round that found nothing to write.
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// What the coordinator wrote over the whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorReport {
    /// Records written, indexed by worker.
    pub records_per_worker: Vec<u64>,
    /// Payload bytes written, indexed by worker.
    pub bytes_per_worker: Vec<u64>,
    /// Drops recorded by each worker's queue.
    pub queue_drops: Vec<u64>,
    /// One summary per output, in output order.
    pub outputs: Vec<OutputSummary>,
    pub write_errors: u64,
    pub rounds: u64,
    /// Admission percentage when the coordinator stopped.
    pub final_admission: u8,
}

impl CoordinatorReport {
    pub fn records_written(&self) -> u64 {
        self.records_per_worker.iter().sum()
    }

    /// Bytes written to outputs, including sink framing.
    pub fn bytes_written(&self) -> u64 {
        self.outputs.iter().map(|o| o.bytes).sum()
    }

    pub fn total_queue_drops(&self) -> u64 {
        self.queue_drops.iter().sum()
    }

    pub fn files(&self) -> usize {
        self.outputs.iter().map(|o| o.files.len()).sum()
    }
}

pub struct OutputCoordinator {
    queues: Vec<QueueConsumer<PacketRecord>>,
    outputs: Vec<Box<dyn RecordOutput>>,
    admission: Arc<AdmissionController>,
    logger: Arc<dyn Logger>,
    records_per_worker: Vec<u64>,
    bytes_per_worker: Vec<u64>,
    seen_drops: Vec<u64>,
    write_errors: u64,
    rounds: u64,
}

impl OutputCoordinator {
    /// `outputs` holds either one shared output or one output per queue.
    pub fn new(
        queues: Vec<QueueConsumer<PacketRecord>>,
        outputs: Vec<Box<dyn RecordOutput>>,
        admission: Arc<AdmissionController>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let workers = queues.len();
        Self {
            queues,
            outputs,
            admission,
            logger,
            records_per_worker: vec![0; workers],
            bytes_per_worker: vec![0; workers],
            seen_drops: vec![0; workers],
            write_errors: 0,
            rounds: 0,
        }
    }

    fn output_index(&self, worker: usize) -> usize {
        if self.outputs.len() == 1 {
            0
        } else {
            worker
        }
    }

    /// Visit every queue once, writing what each holds at the time of the
    /// visit. Returns the number of records taken.
    pub fn drain_round(&mut self) -> usize {
        let mut taken = 0;
        let mut new_drops = false;
        let mut all_quiet = true;

        for worker in 0..self.queues.len() {
            let queue = &self.queues[worker];
            if queue.len() * 4 > queue.capacity() {
                all_quiet = false;
            }
            let dropped = queue.dropped();
            if dropped > self.seen_drops[worker] {
                new_drops = true;
                self.seen_drops[worker] = dropped;
            }

            let target = self.output_index(worker);
            for record in self.queues[worker].drain() {
                taken += 1;
                let Some(output) = self.outputs.get_mut(target) else {
                    self.write_errors += 1;
                    continue;
                };
                match output.write(&record) {
                    Ok(()) => {
                        self.records_per_worker[worker] += 1;
                        self.bytes_per_worker[worker] += record.payload.byte_len() as u64;
                    }
                    Err(e) => {
                        self.write_errors += 1;
                        self.logger.info(&format!(
                            "write failed for worker {} record {}: {}",
                            worker, record.sequence, e
                        ));
                    }
                }
            }
        }

        let before = self.admission.percent();
        self.admission.observe_round(new_drops, all_quiet);
        let after = self.admission.percent();
        if before != after {
            self.logger
                .debug(&format!("admission {}% -> {}%", before, after));
        }
        self.rounds += 1;
        taken
    }

    /// Run until stop, drain what remains, close every output.
    ///
    /// Blocks on `ready` first; a closed channel also releases it.
    pub fn run(
        mut self,
        ready: Receiver<()>,
        shutdown: &dyn ShutdownCheck,
        sleeper: &dyn Sleeper,
    ) -> CoordinatorReport {
        let _ = ready.recv();
        self.logger.debug(&format!(
            "output coordinator started: {} queue(s), {} output(s)",
            self.queues.len(),
            self.outputs.len()
        ));

        while !shutdown.should_stop() {
            if self.drain_round() == 0 {
                sleeper.sleep(IDLE_SLEEP);
            }
        }

        loop {
            // Disconnect is sampled before the drain: once every producer is
            // gone, a queue found empty afterwards stays empty.
            let finished = self.queues.iter().all(QueueConsumer::is_disconnected);
            let taken = self.drain_round();
            if finished && self.queues.iter().all(QueueConsumer::is_empty) {
                break;
            }
            if taken == 0 {
                sleeper.sleep(IDLE_SLEEP);
            }
        }
        self.close()
    }

    fn close(mut self) -> CoordinatorReport {
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (index, output) in self.outputs.iter_mut().enumerate() {
            match output.close() {
                Ok(summary) => outputs.push(summary),
                Err(e) => {
                    self.write_errors += 1;
                    self.logger
                        .info(&format!("failed to close output {}: {}", index, e));
                    outputs.push(OutputSummary::default());
                }
            }
        }
        for (worker, summary) in outputs.iter().enumerate() {
            for path in &summary.files {
                self.logger
                    .debug(&format!("output {}: {}", worker, path.display()));
            }
        }
        CoordinatorReport {
            records_per_worker: self.records_per_worker,
            bytes_per_worker: self.bytes_per_worker,
            queue_drops: self.queues.iter().map(QueueConsumer::dropped).collect(),
            outputs,
            write_errors: self.write_errors,
            rounds: self.rounds,
            final_admission: self.admission.percent(),
        }
    }
}
