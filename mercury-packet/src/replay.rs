//! Replay sources: PCAP files and the built-in test packet.
//!
//! A [`ReplayInput`] is opened once per loop pass; each open yields a fresh
//! [`PacketReader`] positioned at the first packet.

use std::collections::VecDeque;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use mercury_fs::{Filesystem, FsError};
use pcap_file::pcap::PcapReader;
use pcap_file::PcapError;
use thiserror::Error;

use crate::RawPacket;

/// Built-in TCP SYN used by `--test-packet`:
/// 10.0.0.1:51000 -> 93.184.216.34:443, window 0xfaf0, MSS 1460, NOP, WS 7.
pub const TEST_PACKET: [u8; 62] = [
    // ethernet
    0x00, 0x00, 0x5e, 0x00, 0x53, 0x01, 0x02, 0x42, 0xac, 0x11, 0x00, 0x02, 0x08, 0x00,
    // ipv4
    0x45, 0x00, 0x00, 0x30, 0x00, 0x01, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 0x0a, 0x00, 0x00,
    0x01, 0x5d, 0xb8, 0xd8, 0x22,
    // tcp
    0xc7, 0x38, 0x01, 0xbb, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x70, 0x02, 0xfa,
    0xf0, 0x00, 0x00, 0x00, 0x00, 0x02, 0x04, 0x05, 0xb4, 0x01, 0x03, 0x03, 0x07,
];

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot open {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: FsError,
    },

    #[error("malformed capture file {name}: {source}")]
    Format {
        name: String,
        #[source]
        source: PcapError,
    },

    #[error("read failed on {name}: {reason}")]
    Read { name: String, reason: String },
}

/// Sequential access to the packets of one input.
pub trait PacketReader: Send {
    /// Next packet, or `None` at end of input.
    fn read_next(&mut self) -> Result<Option<RawPacket>, ReplayError>;
}

/// A replayable input.
pub trait ReplayInput: Send {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> String;

    fn open(&self) -> Result<Box<dyn PacketReader>, ReplayError>;
}

/// A PCAP file read through a [`Filesystem`].
#[derive(Debug, Clone)]
pub struct PcapFileInput<F: Filesystem> {
    fs: F,
    path: PathBuf,
}

impl<F: Filesystem> PcapFileInput<F> {
    pub fn new(fs: F, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }
}

impl<F: Filesystem> ReplayInput for PcapFileInput<F> {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Box<dyn PacketReader>, ReplayError> {
        let name = self.name();
        let file = self.fs.open(&self.path).map_err(|source| ReplayError::Open {
            name: name.clone(),
            source,
        })?;
        let reader =
            PcapReader::new(file).map_err(|source| ReplayError::Format {
                name: name.clone(),
                source,
            })?;
        Ok(Box::new(PcapFileReader { name, reader }))
    }
}

struct PcapFileReader {
    name: String,
    reader: PcapReader<Box<dyn Read + Send>>,
}

impl PacketReader for PcapFileReader {
    fn read_next(&mut self) -> Result<Option<RawPacket>, ReplayError> {
        match self.reader.next_packet() {
            None => Ok(None),
            Some(Ok(packet)) => Ok(Some(RawPacket {
                timestamp: packet.timestamp,
                orig_len: packet.orig_len,
                data: packet.data.into_owned(),
            })),
            Some(Err(source)) => Err(ReplayError::Format {
                name: self.name.clone(),
                source,
            }),
        }
    }
}

/// The built-in test packet, delivered once per open.
#[derive(Debug, Clone, Copy)]
pub struct TestPacketInput {
    timestamp: Duration,
}

impl TestPacketInput {
    pub fn at(timestamp: Duration) -> Self {
        Self { timestamp }
    }
}

impl ReplayInput for TestPacketInput {
    fn name(&self) -> String {
        "test packet".to_string()
    }

    fn open(&self) -> Result<Box<dyn PacketReader>, ReplayError> {
        Ok(Box::new(VecReader {
            name: self.name(),
            packets: VecDeque::from([RawPacket::new(self.timestamp, TEST_PACKET.to_vec())]),
            fail_after: None,
        }))
    }
}

/// In-memory replay input for tests.
#[derive(Debug, Clone, Default)]
pub struct MockReplayInput {
    name: String,
    packets: Vec<RawPacket>,
    fail_open: bool,
    fail_after: Option<usize>,
}

impl MockReplayInput {
    pub fn new(name: impl Into<String>, packets: Vec<RawPacket>) -> Self {
        Self {
            name: name.into(),
            packets,
            ..Self::default()
        }
    }

    /// Every open fails.
    pub fn failing_open(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_open: true,
            ..Self::default()
        }
    }

    /// Reads fail after `count` packets have been delivered.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }
}

impl ReplayInput for MockReplayInput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> Result<Box<dyn PacketReader>, ReplayError> {
        if self.fail_open {
            return Err(ReplayError::Open {
                name: self.name.clone(),
                source: FsError::Path(format!("{}: mock open failure", self.name)),
            });
        }
        Ok(Box::new(VecReader {
            name: self.name.clone(),
            packets: self.packets.iter().cloned().collect(),
            fail_after: self.fail_after,
        }))
    }
}

struct VecReader {
    name: String,
    packets: VecDeque<RawPacket>,
    fail_after: Option<usize>,
}

impl PacketReader for VecReader {
    fn read_next(&mut self) -> Result<Option<RawPacket>, ReplayError> {
        if let Some(left) = self.fail_after.as_mut() {
            if *left == 0 {
                return Err(ReplayError::Read {
                    name: self.name.clone(),
                    reason: "mock read failure".to_string(),
                });
            }
            *left -= 1;
        }
        Ok(self.packets.pop_front())
    }
}
