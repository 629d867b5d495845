//! Per-worker packet processors.
//!
//! Each worker owns exactly one processor, chosen by [`ProcessorKind`] when
//! the worker is built and dropped with the worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use mercury_schema::{FingerprintSummary, RecordPayload, SummaryError};
use thiserror::Error;

use crate::analysis::AnalysisEngine;
use crate::parser::{parse_packet, ParseError};
use crate::RawPacket;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("summary error: {0}")]
    Summary(#[from] SummaryError),
}

/// Cumulative counters kept by a processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub packets: u64,
    pub bytes: u64,
}

/// Turns one packet into zero or more record payloads.
pub trait PacketProcessor: Send {
    /// Process `packet`, appending payloads to `out`.
    ///
    /// An error concerns this packet only; the caller skips it and continues.
    fn process(&mut self, packet: &RawPacket, out: &mut Vec<RecordPayload>)
        -> Result<(), ProcessError>;

    fn stats(&self) -> ProcessorStats;
}

/// Which processor a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// JSON fingerprint summaries.
    Fingerprint,
    /// Raw packets; with `select`, only packets that carry a fingerprint.
    Packet { select: bool },
}

impl ProcessorKind {
    pub fn build(self, analyzer: Option<Arc<AnalysisEngine>>) -> Box<dyn PacketProcessor> {
        match self {
            ProcessorKind::Fingerprint => Box::new(FingerprintWriter::new(analyzer)),
            ProcessorKind::Packet { select } => Box::new(PacketWriter::new(select)),
        }
    }

    /// True when records carry raw packet bytes.
    pub fn persists_packets(self) -> bool {
        matches!(self, ProcessorKind::Packet { .. })
    }
}

/// Emits one JSON summary for every packet that carries a fingerprint.
#[derive(Debug, Default)]
pub struct FingerprintWriter {
    analyzer: Option<Arc<AnalysisEngine>>,
    stats: ProcessorStats,
}

impl FingerprintWriter {
    pub fn new(analyzer: Option<Arc<AnalysisEngine>>) -> Self {
        Self {
            analyzer,
            stats: ProcessorStats::default(),
        }
    }
}

impl PacketProcessor for FingerprintWriter {
    fn process(
        &mut self,
        packet: &RawPacket,
        out: &mut Vec<RecordPayload>,
    ) -> Result<(), ProcessError> {
        self.stats.packets += 1;
        self.stats.bytes += u64::from(packet.orig_len);

        let Some(meta) = parse_packet(&packet.data)? else {
            return Ok(());
        };
        let Some(tcp) = meta.tcp_fingerprint else {
            return Ok(());
        };

        let analysis = self
            .analyzer
            .as_ref()
            .map(|engine| engine.analyze(meta.dst_ip, &tcp));
        let mut fingerprints = BTreeMap::new();
        fingerprints.insert("tcp".to_string(), tcp);
        let summary = FingerprintSummary {
            src_ip: meta.src_ip.to_string(),
            dst_ip: meta.dst_ip.to_string(),
            src_port: meta.src_port,
            dst_port: meta.dst_port,
            protocol: meta.protocol,
            fingerprints,
            analysis,
            event_start: packet.timestamp.as_secs_f64(),
        };
        out.push(RecordPayload::Fingerprint(summary.to_json()?));
        Ok(())
    }

    fn stats(&self) -> ProcessorStats {
        self.stats
    }
}

/// Emits the packet itself.
#[derive(Debug, Default)]
pub struct PacketWriter {
    select: bool,
    stats: ProcessorStats,
}

impl PacketWriter {
    pub fn new(select: bool) -> Self {
        Self {
            select,
            stats: ProcessorStats::default(),
        }
    }
}

impl PacketProcessor for PacketWriter {
    fn process(
        &mut self,
        packet: &RawPacket,
        out: &mut Vec<RecordPayload>,
    ) -> Result<(), ProcessError> {
        self.stats.packets += 1;
        self.stats.bytes += u64::from(packet.orig_len);

        if self.select {
            let selected = parse_packet(&packet.data)?.is_some_and(|m| m.has_fingerprint());
            if !selected {
                return Ok(());
            }
        }
        out.push(RecordPayload::Packet {
            data: packet.data.clone(),
            orig_len: packet.orig_len,
        });
        Ok(())
    }

    fn stats(&self) -> ProcessorStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::tests::syn_frame;
    use mercury_fs::MockFilesystem;
    use mercury_schema::DestinationClass;
    use std::time::Duration;

    fn syn() -> RawPacket {
        RawPacket::new(Duration::from_millis(1_700_000_000_500), syn_frame())
    }

    fn arp() -> RawPacket {
        let mut data = vec![0u8; 12];
        data.extend_from_slice(&[0x08, 0x06]);
        data.extend_from_slice(&[0u8; 28]);
        RawPacket::new(Duration::ZERO, data)
    }

    // ===========================================
    // Test Category A — Fingerprint Writer
    // ===========================================

    #[test]
    fn test_fingerprint_writer_emits_summary() {
        let mut writer = FingerprintWriter::new(None);
        let mut out = Vec::new();
        writer.process(&syn(), &mut out).expect("process");

        assert_eq!(out.len(), 1);
        let RecordPayload::Fingerprint(line) = &out[0] else {
            panic!("expected fingerprint payload");
        };
        let summary = FingerprintSummary::from_json(line).expect("json");
        assert_eq!(summary.dst_port, 443);
        assert_eq!(
            summary.fingerprints.get("tcp").map(String::as_str),
            Some("(faf0)((020405b4)(01)(030307))")
        );
        assert_eq!(summary.event_start, 1_700_000_000.5);
        assert!(summary.analysis.is_none());
    }

    #[test]
    fn test_fingerprint_writer_skips_non_fingerprint_packets() {
        let mut writer = FingerprintWriter::new(None);
        let mut out = Vec::new();
        writer.process(&arp(), &mut out).expect("process");
        assert!(out.is_empty());
        assert_eq!(writer.stats().packets, 1);
        assert_eq!(writer.stats().bytes, 42);
    }

    #[test]
    fn test_fingerprint_writer_with_analysis() {
        let engine = Arc::new(AnalysisEngine::init(&MockFilesystem::new(), None).expect("init"));
        let mut writer = FingerprintWriter::new(Some(Arc::clone(&engine)));
        let mut out = Vec::new();
        writer.process(&syn(), &mut out).expect("process");

        let RecordPayload::Fingerprint(line) = &out[0] else {
            panic!("expected fingerprint payload");
        };
        let summary = FingerprintSummary::from_json(line).expect("json");
        let analysis = summary.analysis.expect("analysis");
        assert_eq!(analysis.dst_class, DestinationClass::Global);
        assert_eq!(engine.finalize().0, 1);
    }

    #[test]
    fn test_fingerprint_writer_parse_error_counts_packet() {
        let mut writer = FingerprintWriter::new(None);
        let mut out = Vec::new();
        let short = RawPacket::new(Duration::ZERO, vec![0u8; 5]);
        assert!(matches!(
            writer.process(&short, &mut out),
            Err(ProcessError::Parse(_))
        ));
        assert_eq!(writer.stats().packets, 1);
        assert!(out.is_empty());
    }

    // ===========================================
    // Test Category B — Packet Writer
    // ===========================================

    #[test]
    fn test_packet_writer_copies_packet() {
        let mut writer = PacketWriter::new(false);
        let mut out = Vec::new();
        let mut packet = arp();
        packet.orig_len = 1500;
        writer.process(&packet, &mut out).expect("process");
        assert_eq!(
            out,
            vec![RecordPayload::Packet {
                data: packet.data.clone(),
                orig_len: 1500
            }]
        );
    }

    #[test]
    fn test_packet_writer_select_filters() {
        let mut writer = PacketWriter::new(true);
        let mut out = Vec::new();
        writer.process(&arp(), &mut out).expect("process");
        writer.process(&syn(), &mut out).expect("process");
        assert_eq!(out.len(), 1);
        assert_eq!(writer.stats().packets, 2);
    }

    #[test]
    fn test_packet_writer_without_select_ignores_garbage() {
        let mut writer = PacketWriter::new(false);
        let mut out = Vec::new();
        writer
            .process(&RawPacket::new(Duration::ZERO, vec![1, 2, 3]), &mut out)
            .expect("process");
        assert_eq!(out.len(), 1);
    }

    // ===========================================
    // Test Category C — Kind
    // ===========================================

    #[test]
    fn test_kind_builds_matching_processor() {
        let mut out = Vec::new();
        ProcessorKind::Fingerprint
            .build(None)
            .process(&syn(), &mut out)
            .expect("process");
        ProcessorKind::Packet { select: false }
            .build(None)
            .process(&syn(), &mut out)
            .expect("process");
        assert!(out[0].is_fingerprint());
        assert!(!out[1].is_fingerprint());
        assert!(ProcessorKind::Packet { select: true }.persists_packets());
        assert!(!ProcessorKind::Fingerprint.persists_packets());
    }
}
