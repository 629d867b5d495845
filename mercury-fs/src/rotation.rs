//! Record outputs and record-count rotation.
//!
//! An [`OutputFile`] owns one open sink plus a counter of records in that
//! file. When the counter reaches the limit the file is closed; the next
//! file is opened when the next record arrives, so `R` records with limit
//! `L` produce `ceil(R / L)` files numbered from 0.

use std::fmt;
use std::io;
use std::path::PathBuf;

use mercury_schema::PacketRecord;

use crate::filesystem::Filesystem;
use crate::naming::OutputNaming;
use crate::sink::{OutputError, OutputFormat, RecordSink};

/// Totals reported when an output is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSummary {
    pub records: u64,
    pub bytes: u64,
    /// Files created, in creation order. Empty for stream outputs.
    pub files: Vec<PathBuf>,
}

/// A destination the output coordinator writes records into.
pub trait RecordOutput: Send {
    fn write(&mut self, record: &PacketRecord) -> Result<(), OutputError>;

    /// Flush and close; further writes are an error.
    fn close(&mut self) -> Result<OutputSummary, OutputError>;
}

/// A file-backed output with optional rotation.
pub struct OutputFile<F: Filesystem> {
    fs: F,
    naming: OutputNaming,
    format: OutputFormat,
    limit: u64,
    sink: Option<RecordSink>,
    in_file: u64,
    next_seq: u64,
    records: u64,
    bytes: u64,
    files: Vec<PathBuf>,
    closed: bool,
}

impl<F: Filesystem> OutputFile<F> {
    /// Create the output and open its first file.
    ///
    /// A `limit` of 0 disables rotation. File-set members create their
    /// directory first.
    pub fn create(
        fs: F,
        naming: OutputNaming,
        format: OutputFormat,
        limit: u64,
    ) -> Result<Self, OutputError> {
        if naming.is_file_set_member() {
            fs.create_dir_all(naming.dir())
                .map_err(|source| OutputError::Create {
                    path: naming.dir().to_path_buf(),
                    source,
                })?;
        }
        let mut output = Self {
            fs,
            naming,
            format,
            limit,
            sink: None,
            in_file: 0,
            next_seq: 0,
            records: 0,
            bytes: 0,
            files: Vec::new(),
            closed: false,
        };
        output.open_next()?;
        Ok(output)
    }

    fn open_next(&mut self) -> Result<(), OutputError> {
        let path = self.naming.path_for(self.next_seq);
        let writer = self
            .fs
            .create(&path)
            .map_err(|source| OutputError::Create {
                path: path.clone(),
                source,
            })?;
        self.sink = Some(RecordSink::open(self.format, writer)?);
        self.files.push(path);
        self.next_seq += 1;
        self.in_file = 0;
        Ok(())
    }

    /// Path of the file currently open, if any.
    pub fn current_path(&self) -> Option<&PathBuf> {
        self.sink.as_ref().and_then(|_| self.files.last())
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn summary(&self) -> OutputSummary {
        OutputSummary {
            records: self.records,
            bytes: self.bytes,
            files: self.files.clone(),
        }
    }
}

impl<F: Filesystem> RecordOutput for OutputFile<F> {
    fn write(&mut self, record: &PacketRecord) -> Result<(), OutputError> {
        if self.closed {
            return Err(closed_error());
        }
        if self.sink.is_none() {
            self.open_next()?;
        }
        let Some(sink) = self.sink.as_mut() else {
            return Err(closed_error());
        };
        let written = sink.write(record)?;
        self.records += 1;
        self.bytes += written as u64;
        self.in_file += 1;

        if self.limit > 0 && self.in_file >= self.limit {
            if let Some(full) = self.sink.take() {
                full.finish()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<OutputSummary, OutputError> {
        self.closed = true;
        if let Some(sink) = self.sink.take() {
            sink.finish()?;
        }
        Ok(self.summary())
    }
}

impl<F: Filesystem> fmt::Debug for OutputFile<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFile")
            .field("naming", &self.naming)
            .field("format", &self.format)
            .field("limit", &self.limit)
            .field("records", &self.records)
            .field("files", &self.files.len())
            .finish()
    }
}

/// An output over an arbitrary stream such as stdout. Never rotates.
#[derive(Debug)]
pub struct StreamOutput {
    sink: Option<RecordSink>,
    records: u64,
    bytes: u64,
}

impl StreamOutput {
    pub fn new(format: OutputFormat, writer: Box<dyn io::Write + Send>) -> Result<Self, OutputError> {
        Ok(Self {
            sink: Some(RecordSink::open(format, writer)?),
            records: 0,
            bytes: 0,
        })
    }
}

impl RecordOutput for StreamOutput {
    fn write(&mut self, record: &PacketRecord) -> Result<(), OutputError> {
        let sink = self.sink.as_mut().ok_or_else(closed_error)?;
        let written = sink.write(record)?;
        self.records += 1;
        self.bytes += written as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<OutputSummary, OutputError> {
        if let Some(sink) = self.sink.take() {
            sink.finish()?;
        }
        Ok(OutputSummary {
            records: self.records,
            bytes: self.bytes,
            files: Vec::new(),
        })
    }
}

fn closed_error() -> OutputError {
    OutputError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"))
}
