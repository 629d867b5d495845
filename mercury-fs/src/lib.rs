//! Filesystem abstraction and record outputs for mercury.
//!
//! This crate provides:
//! - Filesystem trait with real and in-memory implementations
//! - Output naming for single files, rotation suffixes and file-sets
//! - JSON-lines and PCAP record sinks
//! - Rotating output files driven by a per-file record limit

pub mod filesystem;
pub mod naming;
pub mod rotation;
pub mod sink;

pub use filesystem::{Filesystem, FsError, MockFilesystem, RealFilesystem};
pub use naming::OutputNaming;
pub use rotation::{OutputFile, OutputSummary, RecordOutput, StreamOutput};
pub use sink::{OutputError, OutputFormat, RecordSink};
