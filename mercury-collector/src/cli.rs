//! CLI argument parsing for mercury.
//!
//! Every option is optional at the parser level so that a `--config` file
//! can supply it; [`Cli::validate`] enforces the combination rules after the
//! file has been merged in.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use thiserror::Error;

use crate::config::FileConfig;

/// Default fraction of physical memory used for worker queues.
pub const DEFAULT_BUFFER_FRACTION: f64 = 0.008;

/// Errors from CLI argument validation.
#[derive(Debug, Error, PartialEq)]
pub enum CliError {
    #[error("neither read [r] nor capture [c] specified on command line")]
    NoInput,

    #[error("incompatible inputs specified on command line: {0}")]
    MultipleInputs(String),

    #[error("both fingerprint [f] and write [w] specified on command line")]
    ConflictingOutputs,

    #[error(
        "multiple threads [t] requested, but neither fingerprint [f] nor write [w] specified on command line"
    )]
    ThreadsWithoutOutput,

    #[error("invalid loop count {0}, it should be >= 1")]
    InvalidLoopCount(u64),

    #[error("the option --adaptive requires options -c capture interface and -w pcap file")]
    AdaptiveRequiresCaptureAndWrite,

    #[error("buffer fraction must be between 0.0 and 1.0 inclusive, got {0}")]
    InvalidBufferFraction(f64),

    #[error("--resources requires -a analysis")]
    ResourcesWithoutAnalysis,
}

/// Worker count: a number, or one per available processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadCount {
    Count(usize),
    Cpu,
}

impl ThreadCount {
    pub fn resolve(self, cpus: usize) -> usize {
        match self {
            ThreadCount::Count(n) => n,
            ThreadCount::Cpu => cpus.max(1),
        }
    }
}

impl FromStr for ThreadCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "cpu" {
            return Ok(ThreadCount::Cpu);
        }
        match s.parse::<usize>() {
            Ok(0) => Err("thread count must be at least 1".to_string()),
            Ok(n) => Ok(ThreadCount::Count(n)),
            Err(_) => Err(format!("expected a number or \"cpu\", got \"{s}\"")),
        }
    }
}

impl fmt::Display for ThreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadCount::Count(n) => write!(f, "{n}"),
            ThreadCount::Cpu => f.write_str("cpu"),
        }
    }
}

/// mercury: packet metadata capture and analysis.
///
/// Captures from an interface or replays PCAP files, writing TCP fingerprints
/// as JSON lines or raw packets as PCAP. With more than one thread each worker
/// writes its own member of a file-set directory.
#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(name = "mercury")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Capture packets from this network interface.
    #[arg(short = 'c', long)]
    pub capture: Option<String>,

    /// Replay a PCAP file, or every file in a directory (one thread each).
    #[arg(short = 'r', long)]
    pub read: Option<PathBuf>,

    /// Replay the built-in test packet.
    #[arg(long = "test-packet", hide = true)]
    pub test_packet: bool,

    /// Write fingerprints as JSON lines to this file.
    #[arg(short = 'f', long)]
    pub fingerprint: Option<PathBuf>,

    /// Write packets in PCAP format to this file.
    #[arg(short = 'w', long)]
    pub write: Option<PathBuf>,

    /// Number of worker threads, or "cpu" for one per processor.
    #[arg(short = 't', long)]
    pub threads: Option<ThreadCount>,

    /// Fraction of physical memory used for worker queues (0.0 to 1.0).
    #[arg(short = 'b', long)]
    pub buffer: Option<f64>,

    /// Rotate output files after this many records.
    #[arg(short = 'l', long)]
    pub limit: Option<u64>,

    /// Replay the input this many times (>= 1).
    #[arg(short = 'p', long = "loop")]
    pub loop_count: Option<u64>,

    /// Analyze fingerprints.
    #[arg(short = 'a', long)]
    pub analysis: bool,

    /// JSON map of fingerprint to label used by analysis.
    #[arg(long)]
    pub resources: Option<PathBuf>,

    /// Only write packets that carry a fingerprint.
    #[arg(short = 's', long)]
    pub select: bool,

    /// Drop privileges to this user after binding capture.
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Change to this directory before opening any file.
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// Overwrite existing output files.
    #[arg(short = 'o', long)]
    pub overwrite: bool,

    /// Adaptively accept or skip captured packets under load (-c and -w only).
    #[arg(long)]
    pub adaptive: bool,

    /// Read options from a TOML file; command-line options take precedence.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for run details, -vv for debug).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Fill options not given on the command line from `file`.
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        self.capture = self.capture.or(file.capture);
        self.read = self.read.or(file.read);
        self.fingerprint = self.fingerprint.or(file.fingerprint);
        self.write = self.write.or(file.write);
        self.threads = self.threads.or(file.threads);
        self.buffer = self.buffer.or(file.buffer);
        self.limit = self.limit.or(file.limit);
        self.loop_count = self.loop_count.or(file.loop_count);
        self.resources = self.resources.or(file.resources);
        self.user = self.user.or(file.user);
        self.directory = self.directory.or(file.directory);
        self.analysis |= file.analysis.unwrap_or(false);
        self.select |= file.select.unwrap_or(false);
        self.overwrite |= file.overwrite.unwrap_or(false);
        self.adaptive |= file.adaptive.unwrap_or(false);
        if self.verbose == 0 {
            self.verbose = file.verbose.unwrap_or(0);
        }
        self
    }

    fn inputs(&self) -> Vec<&'static str> {
        let mut inputs = Vec::new();
        if self.capture.is_some() {
            inputs.push("capture [c]");
        }
        if self.read.is_some() {
            inputs.push("read [r]");
        }
        if self.test_packet {
            inputs.push("test packet");
        }
        inputs
    }

    fn has_output(&self) -> bool {
        self.fingerprint.is_some() || self.write.is_some()
    }

    /// Validate option combinations.
    pub fn validate(&self) -> Result<(), CliError> {
        let inputs = self.inputs();
        match inputs.len() {
            0 => return Err(CliError::NoInput),
            1 => {}
            _ => return Err(CliError::MultipleInputs(inputs.join(" and "))),
        }
        if self.fingerprint.is_some() && self.write.is_some() {
            return Err(CliError::ConflictingOutputs);
        }
        if self.threads.is_some_and(|t| t != ThreadCount::Count(1)) && !self.has_output() {
            return Err(CliError::ThreadsWithoutOutput);
        }
        if let Some(count) = self.loop_count {
            if count < 1 {
                return Err(CliError::InvalidLoopCount(count));
            }
        }
        if self.adaptive && (self.capture.is_none() || self.write.is_none()) {
            return Err(CliError::AdaptiveRequiresCaptureAndWrite);
        }
        if let Some(fraction) = self.buffer {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(CliError::InvalidBufferFraction(fraction));
            }
        }
        if self.resources.is_some() && !self.analysis {
            return Err(CliError::ResourcesWithoutAnalysis);
        }
        Ok(())
    }
}

/// Parse CLI arguments from an iterator (for testing).
pub fn parse_from<I, T>(iter: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(iter)
}
