//! Native watch service seam
//!
//! A [`NativeBackend`] owns the OS-level subscriptions. The consolidation
//! core only ever asks it to create or destroy one watch at a time and
//! receives raw event batches through a [`RawEventSink`].

mod notify_backend;
mod translate;

#[cfg(test)]
pub(crate) mod mock;

pub use notify_backend::NotifyBackend;

use canopy_core::{BackendKind, ChangeEvent, NativeOptions, Result, WatchError, WatcherConfig};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc;

/// One raw delivery: a batch of events, or an error for the whole watch
pub type RawBatch = std::result::Result<Vec<ChangeEvent>, WatchError>;

/// Opaque identifier for an OS-level watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchToken(pub u64);

impl fmt::Display for WatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.0)
    }
}

/// Delivery end handed to the backend for one watch.
///
/// Safe to call from any thread. Batches are queued for the owning handle
/// and drained in order by a single consumer.
#[derive(Debug, Clone)]
pub struct RawEventSink {
    tx: mpsc::UnboundedSender<RawBatch>,
}

impl RawEventSink {
    pub fn new(tx: mpsc::UnboundedSender<RawBatch>) -> Self {
        Self { tx }
    }

    /// Queue one batch. Returns false once the handle has gone away.
    pub fn deliver(&self, batch: RawBatch) -> bool {
        self.tx.send(batch).is_ok()
    }
}

/// Administrative snapshot of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub active_watches: usize,
    /// Scan interval when the polling backend is in use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
}

/// The OS watch primitive
pub trait NativeBackend: Send + Sync {
    /// Subscribe to changes beneath `path`. Fails if the path is inaccessible.
    fn create_watch(&self, path: &Path, options: NativeOptions, sink: RawEventSink) -> Result<WatchToken>;

    /// Release a subscription. Unknown tokens are ignored.
    fn destroy_watch(&self, token: WatchToken) -> Result<()>;

    fn describe(&self) -> BackendStatus;

    /// Apply new settings to watches created from now on
    fn configure(&self, _config: &WatcherConfig) {}
}
