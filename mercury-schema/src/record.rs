//! PacketRecord: one unit of output work.

use std::time::Duration;

/// Payload carried by a record: either a serialized fingerprint summary or
/// the raw packet bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    /// One JSON line (without the trailing newline).
    Fingerprint(String),
    /// Captured bytes plus the length of the packet on the wire.
    Packet { data: Vec<u8>, orig_len: u32 },
}

impl RecordPayload {
    /// Build a raw packet payload whose original length equals the capture length.
    pub fn packet(data: Vec<u8>) -> Self {
        let orig_len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        RecordPayload::Packet { data, orig_len }
    }

    /// Number of bytes this payload occupies in its sink, excluding framing.
    pub fn byte_len(&self) -> usize {
        match self {
            RecordPayload::Fingerprint(line) => line.len(),
            RecordPayload::Packet { data, .. } => data.len(),
        }
    }

    pub fn is_fingerprint(&self) -> bool {
        matches!(self, RecordPayload::Fingerprint(_))
    }
}

/// A record produced by exactly one worker and consumed by the coordinator.
///
/// `sequence` starts at 0 for every worker and increases by one for each
/// record offered to the worker's queue, so gaps at the sink mark drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub timestamp: Duration,
    pub worker: usize,
    pub sequence: u64,
    pub payload: RecordPayload,
}

impl PacketRecord {
    pub fn new(timestamp: Duration, worker: usize, sequence: u64, payload: RecordPayload) -> Self {
        Self {
            timestamp,
            worker,
            sequence,
            payload,
        }
    }
}
