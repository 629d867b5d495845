//! Packet collaborators for the mercury pipeline.
//!
//! This crate provides:
//! - A header parser producing flow keys and TCP SYN fingerprints
//! - `PacketProcessor` implementations turning packets into records
//! - The fingerprint `AnalysisEngine`
//! - Packet sources: PCAP replay, the built-in test packet, live capture

pub mod analysis;
pub mod capture;
pub mod parser;
pub mod processor;
pub mod replay;

#[cfg(target_os = "linux")]
pub mod af_packet;

use std::time::Duration;

pub use analysis::{AnalysisEngine, AnalysisError};
pub use capture::{
    CaptureBinder, CaptureBinding, CaptureError, MockBinder, MockBinding, UnsupportedBinder,
};
pub use parser::{parse_packet, PacketMetadata, ParseError};
pub use processor::{
    FingerprintWriter, PacketProcessor, PacketWriter, ProcessError, ProcessorKind, ProcessorStats,
};
pub use replay::{
    MockReplayInput, PacketReader, PcapFileInput, ReplayError, ReplayInput, TestPacketInput,
    TEST_PACKET,
};

#[cfg(target_os = "linux")]
pub use af_packet::AfPacketBinder;

/// A packet as delivered by a capture binding or a replay reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub timestamp: Duration,
    pub data: Vec<u8>,
    /// Length on the wire; at least `data.len()`.
    pub orig_len: u32,
}

impl RawPacket {
    pub fn new(timestamp: Duration, data: Vec<u8>) -> Self {
        let orig_len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        Self {
            timestamp,
            data,
            orig_len,
        }
    }
}
