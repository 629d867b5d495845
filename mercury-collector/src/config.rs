//! Resolved run configuration.
//!
//! [`FileConfig`] is the optional TOML file given with `--config`; its keys
//! mirror the long options. [`Config`] is the immutable result of merging it
//! with the command line and validating the combination. It is built once
//! on the main thread and only read afterwards.

use std::path::{Path, PathBuf};

use mercury_fs::{Filesystem, FsError, OutputFormat};
use mercury_packet::ProcessorKind;
use mercury_queue::capacity_for;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::cli::{Cli, CliError, ThreadCount, DEFAULT_BUFFER_FRACTION};
use crate::logger::Verbosity;

/// Physical memory assumed when the system cannot report it.
pub const FALLBACK_MEMORY_BYTES: u64 = 1 << 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Options loaded from a `--config` TOML file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub capture: Option<String>,
    pub read: Option<PathBuf>,
    pub fingerprint: Option<PathBuf>,
    pub write: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_threads")]
    pub threads: Option<ThreadCount>,
    pub buffer: Option<f64>,
    pub limit: Option<u64>,
    #[serde(rename = "loop")]
    pub loop_count: Option<u64>,
    pub resources: Option<PathBuf>,
    pub user: Option<String>,
    pub directory: Option<PathBuf>,
    pub analysis: Option<bool>,
    pub select: Option<bool>,
    pub overwrite: Option<bool>,
    pub adaptive: Option<bool>,
    pub verbose: Option<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ThreadsValue {
    Count(usize),
    Word(String),
}

fn deserialize_threads<'de, D>(deserializer: D) -> Result<Option<ThreadCount>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<ThreadsValue>::deserialize(deserializer)?;
    let parsed = match value {
        None => return Ok(None),
        Some(ThreadsValue::Count(n)) => n.to_string().parse::<ThreadCount>(),
        Some(ThreadsValue::Word(word)) => word.parse::<ThreadCount>(),
    };
    parsed.map(Some).map_err(serde::de::Error::custom)
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load<F: Filesystem>(fs: &F, path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs.read_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &String::from_utf8_lossy(&bytes))
    }
}

/// Where packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    /// Live capture on a network interface.
    Capture(String),
    /// A PCAP file, or a directory of them.
    Read(PathBuf),
    /// The built-in test packet.
    TestPacket,
}

/// Where records go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// JSON fingerprint summaries to a file or file-set.
    Fingerprint(PathBuf),
    /// Raw packets to a PCAP file or file-set.
    Packets(PathBuf),
    /// JSON fingerprint summaries to standard output.
    Stdout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub input: InputMode,
    pub output: OutputMode,
    /// Workers requested with `-t`. Replay of a directory uses one worker
    /// per file instead.
    pub threads: usize,
    pub buffer_fraction: f64,
    /// Records per output file; 0 disables rotation.
    pub rotation_limit: u64,
    pub loop_count: u64,
    pub select: bool,
    pub adaptive: bool,
    pub analysis: bool,
    pub resources: Option<PathBuf>,
    pub verbosity: Verbosity,
    pub overwrite: bool,
    pub user: Option<String>,
    pub directory: Option<PathBuf>,
}

impl Config {
    /// Validate `cli` and resolve it against the number of processors.
    pub fn from_cli(cli: &Cli, cpus: usize) -> Result<Self, CliError> {
        cli.validate()?;

        let input = if let Some(interface) = &cli.capture {
            InputMode::Capture(interface.clone())
        } else if let Some(path) = &cli.read {
            InputMode::Read(path.clone())
        } else {
            InputMode::TestPacket
        };

        let output = match (&cli.fingerprint, &cli.write) {
            (Some(path), _) => OutputMode::Fingerprint(path.clone()),
            (None, Some(path)) => OutputMode::Packets(path.clone()),
            (None, None) => OutputMode::Stdout,
        };

        Ok(Self {
            input,
            output,
            threads: cli.threads.unwrap_or(ThreadCount::Count(1)).resolve(cpus),
            buffer_fraction: cli.buffer.unwrap_or(DEFAULT_BUFFER_FRACTION),
            rotation_limit: cli.limit.unwrap_or(0),
            loop_count: cli.loop_count.unwrap_or(1),
            select: cli.select,
            adaptive: cli.adaptive,
            analysis: cli.analysis,
            resources: cli.resources.clone(),
            verbosity: Verbosity::from_count(cli.verbose),
            overwrite: cli.overwrite,
            user: cli.user.clone(),
            directory: cli.directory.clone(),
        })
    }

    pub fn processor_kind(&self) -> ProcessorKind {
        match self.output {
            OutputMode::Packets(_) => ProcessorKind::Packet {
                select: self.select,
            },
            OutputMode::Fingerprint(_) | OutputMode::Stdout => ProcessorKind::Fingerprint,
        }
    }

    pub fn output_format(&self) -> OutputFormat {
        match self.output {
            OutputMode::Packets(_) => OutputFormat::Pcap,
            OutputMode::Fingerprint(_) | OutputMode::Stdout => OutputFormat::Json,
        }
    }

    /// Configured output path; `None` for stdout.
    pub fn output_path(&self) -> Option<&Path> {
        match &self.output {
            OutputMode::Fingerprint(path) | OutputMode::Packets(path) => Some(path),
            OutputMode::Stdout => None,
        }
    }

    /// Admission control runs only when raw packets are persisted.
    pub fn admission_applies(&self) -> bool {
        self.adaptive && self.processor_kind().persists_packets()
    }

    /// Slots per worker queue for `workers` queues sharing the buffer.
    pub fn queue_capacity(&self, available_memory: u64, workers: usize) -> usize {
        capacity_for(self.buffer_fraction, available_memory, workers)
    }
}

/// Physical memory of this machine in bytes.
pub fn physical_memory() -> u64 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions and only reads system values.
        let (pages, page_size) =
            unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
        if pages > 0 && page_size > 0 {
            return (pages as u64).saturating_mul(page_size as u64);
        }
    }
    FALLBACK_MEMORY_BYTES
}
