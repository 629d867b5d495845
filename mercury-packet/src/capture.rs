//! Live capture bindings.
//!
//! A [`CaptureBinder`] binds one receive channel per worker. Flow affinity
//! (every packet of a flow reaching the same worker) is the binder's
//! responsibility; the pipeline only preserves it.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::sync::Mutex;

use thiserror::Error;

use crate::RawPacket;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("network interface not found: {interface}")]
    InterfaceNotFound { interface: String },

    #[error("failed to bind capture on '{interface}': {source}")]
    Bind {
        interface: String,
        #[source]
        source: io::Error,
    },

    #[error("capture receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("live capture is not supported on this platform")]
    Unsupported,
}

/// One bound receive channel.
pub trait CaptureBinding: Send {
    /// Wait a bounded time for the next packet.
    ///
    /// `Ok(None)` means nothing arrived before the receive timeout, so the
    /// caller can check its stop flag and poll again.
    fn next_packet(&mut self) -> Result<Option<RawPacket>, CaptureError>;
}

/// Factory for per-worker bindings.
pub trait CaptureBinder: Send + Sync {
    /// Bind receive channel `worker` of `workers` on `interface`.
    fn bind(
        &self,
        interface: &str,
        worker: usize,
        workers: usize,
    ) -> Result<Box<dyn CaptureBinding>, CaptureError>;
}

/// Scripted binding for tests: delivers its packets in order, then idles.
#[derive(Default)]
pub struct MockBinding {
    packets: VecDeque<Result<RawPacket, String>>,
    on_exhausted: Option<Box<dyn FnMut() + Send>>,
}

impl MockBinding {
    pub fn new(packets: Vec<RawPacket>) -> Self {
        Self {
            packets: packets.into_iter().map(Ok).collect(),
            on_exhausted: None,
        }
    }

    /// Run `hook` on every poll made after the script has run out.
    pub fn on_exhausted(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_exhausted = Some(Box::new(hook));
        self
    }

    /// Queue a receive failure after the packets queued so far.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.packets.push_back(Err(reason.into()));
        self
    }
}

impl CaptureBinding for MockBinding {
    fn next_packet(&mut self) -> Result<Option<RawPacket>, CaptureError> {
        match self.packets.pop_front() {
            None => {
                if let Some(hook) = self.on_exhausted.as_mut() {
                    hook();
                }
                Ok(None)
            }
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(reason)) => Err(CaptureError::Receive(io::Error::new(
                io::ErrorKind::Other,
                reason,
            ))),
        }
    }
}

impl fmt::Debug for MockBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBinding")
            .field("pending", &self.packets.len())
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}

/// Binder for platforms without live capture; every bind fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBinder;

impl CaptureBinder for UnsupportedBinder {
    fn bind(
        &self,
        _interface: &str,
        _worker: usize,
        _workers: usize,
    ) -> Result<Box<dyn CaptureBinding>, CaptureError> {
        Err(CaptureError::Unsupported)
    }
}

/// Binder handing out pre-scripted [`MockBinding`]s by worker index.
#[derive(Debug, Default)]
pub struct MockBinder {
    bindings: Mutex<HashMap<usize, MockBinding>>,
    bound: Mutex<Vec<(String, usize, usize)>>,
}

impl MockBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the binding returned for `worker`. Workers without a script
    /// get an idle binding; see [`MockBinder::unknown_interface`].
    pub fn with_binding(self, worker: usize, binding: MockBinding) -> Self {
        self.bindings.lock().unwrap().insert(worker, binding);
        self
    }

    /// Calls made to `bind`, as `(interface, worker, workers)`.
    pub fn bound(&self) -> Vec<(String, usize, usize)> {
        self.bound.lock().unwrap().clone()
    }

    /// Name that makes `bind` fail with [`CaptureError::InterfaceNotFound`].
    pub fn unknown_interface() -> &'static str {
        "missing0"
    }
}

impl CaptureBinder for MockBinder {
    fn bind(
        &self,
        interface: &str,
        worker: usize,
        workers: usize,
    ) -> Result<Box<dyn CaptureBinding>, CaptureError> {
        if interface == Self::unknown_interface() {
            return Err(CaptureError::InterfaceNotFound {
                interface: interface.to_string(),
            });
        }
        self.bound
            .lock()
            .unwrap()
            .push((interface.to_string(), worker, workers));
        let binding = self
            .bindings
            .lock()
            .unwrap()
            .remove(&worker)
            .unwrap_or_default();
        Ok(Box::new(binding))
    }
}
