//! Fingerprint analysis engine.
//!
//! Classifies the destination of each fingerprinted flow and, when a
//! resource file is loaded, attaches the label known for the fingerprint.
//! The engine is initialised once before any worker starts and shared by
//! all workers; `finalize` closes the run.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use mercury_fs::{Filesystem, FsError};
use mercury_schema::{AnalysisResult, DestinationClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot read analysis resources {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    #[error("invalid analysis resources {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared analysis state. `analyze` takes `&self` so one engine serves
/// every worker thread.
#[derive(Debug, Default)]
pub struct AnalysisEngine {
    labels: HashMap<String, String>,
    analyzed: AtomicU64,
    labelled: AtomicU64,
}

impl AnalysisEngine {
    /// Load the engine. `resources` is a JSON object mapping fingerprint
    /// strings to labels.
    pub fn init<F: Filesystem>(fs: &F, resources: Option<&Path>) -> Result<Self, AnalysisError> {
        let labels = match resources {
            None => HashMap::new(),
            Some(path) => {
                let bytes = fs.read_file(path).map_err(|source| AnalysisError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_slice(&bytes).map_err(|source| AnalysisError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            }
        };
        Ok(Self {
            labels,
            ..Self::default()
        })
    }

    /// Number of fingerprint labels loaded.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn analyze(&self, dst_ip: IpAddr, fingerprint: &str) -> AnalysisResult {
        self.analyzed.fetch_add(1, Ordering::Relaxed);
        let label = self.labels.get(fingerprint).cloned();
        if label.is_some() {
            self.labelled.fetch_add(1, Ordering::Relaxed);
        }
        AnalysisResult {
            dst_class: classify(dst_ip),
            label,
        }
    }

    /// End the run; returns `(analyzed, labelled)` counts.
    pub fn finalize(&self) -> (u64, u64) {
        (
            self.analyzed.load(Ordering::Relaxed),
            self.labelled.load(Ordering::Relaxed),
        )
    }
}

/// Coarse destination class of an address.
pub fn classify(addr: IpAddr) -> DestinationClass {
    match addr {
        IpAddr::V4(v4) => {
            if v4.is_loopback() {
                DestinationClass::Loopback
            } else if v4.is_multicast() || v4.is_broadcast() {
                DestinationClass::Multicast
            } else if v4.is_link_local() {
                DestinationClass::LinkLocal
            } else if v4.is_private() {
                DestinationClass::Private
            } else {
                DestinationClass::Global
            }
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            if v6.is_loopback() {
                DestinationClass::Loopback
            } else if v6.is_multicast() {
                DestinationClass::Multicast
            } else if first & 0xffc0 == 0xfe80 {
                DestinationClass::LinkLocal
            } else if first & 0xfe00 == 0xfc00 {
                DestinationClass::Private
            } else {
                DestinationClass::Global
            }
        }
    }
}
