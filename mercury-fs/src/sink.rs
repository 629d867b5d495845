//! Record sinks: JSON lines and classic PCAP.

use std::fmt;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use mercury_schema::{PacketRecord, RecordPayload};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::PcapError;
use thiserror::Error;

use crate::filesystem::FsError;

/// Snap length written into PCAP headers; jumbo frames fit.
pub const PCAP_SNAPLEN: u32 = 262_144;

/// Encoding of an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One fingerprint summary per line.
    Json,
    /// Raw packets in libpcap format.
    Pcap,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Pcap => f.write_str("pcap"),
        }
    }
}

/// Errors raised while opening, writing or closing an output.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("cannot create output {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("PCAP error: {0}")]
    Pcap(#[from] PcapError),

    #[error("{payload} record cannot be written to a {format} output")]
    FormatMismatch {
        format: OutputFormat,
        payload: &'static str,
    },
}

type BoxedWriter = BufWriter<Box<dyn Write + Send>>;

/// An open encoder over a writable stream.
pub enum RecordSink {
    Json(BoxedWriter),
    Pcap(PcapWriter<BoxedWriter>),
}

impl RecordSink {
    /// Wrap `writer`; for PCAP the file header is written immediately.
    pub fn open(format: OutputFormat, writer: Box<dyn Write + Send>) -> Result<Self, OutputError> {
        let buffered = BufWriter::new(writer);
        match format {
            OutputFormat::Json => Ok(RecordSink::Json(buffered)),
            OutputFormat::Pcap => {
                let header = PcapHeader {
                    snaplen: PCAP_SNAPLEN,
                    ..PcapHeader::default()
                };
                Ok(RecordSink::Pcap(PcapWriter::with_header(buffered, header)?))
            }
        }
    }

    pub fn format(&self) -> OutputFormat {
        match self {
            RecordSink::Json(_) => OutputFormat::Json,
            RecordSink::Pcap(_) => OutputFormat::Pcap,
        }
    }

    /// Encode one record; returns the number of payload bytes written.
    pub fn write(&mut self, record: &PacketRecord) -> Result<usize, OutputError> {
        match (self, &record.payload) {
            (RecordSink::Json(w), RecordPayload::Fingerprint(line)) => {
                w.write_all(line.as_bytes())?;
                w.write_all(b"\n")?;
                Ok(line.len() + 1)
            }
            (RecordSink::Pcap(w), RecordPayload::Packet { data, orig_len }) => {
                let orig_len = (*orig_len).max(data.len() as u32);
                w.write_packet(&PcapPacket::new(record.timestamp, orig_len, data))?;
                Ok(data.len())
            }
            (sink, payload) => Err(OutputError::FormatMismatch {
                format: sink.format(),
                payload: if payload.is_fingerprint() {
                    "fingerprint"
                } else {
                    "packet"
                },
            }),
        }
    }

    /// Flush buffered output and release the stream.
    pub fn finish(self) -> Result<(), OutputError> {
        let mut writer = match self {
            RecordSink::Json(w) => w,
            RecordSink::Pcap(w) => w.into_writer(),
        };
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for RecordSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordSink").field(&self.format()).finish()
    }
}
