//! Message queues between pipeline stages
//!
//! Every stage reads from one inbox queue and writes to zero or more outbox queues.
//! Three implementations share the [`Queue`] contract:
//! - [`FileQueue`]: crash-safe, disk-backed, claim/release via atomic rename
//! - [`ChannelQueue`]: in-memory and bounded, for stages inside one process
//! - [`TimerQueue`]: emits a timer message on a fixed interval, used by jobs

mod channel;
mod file;
mod timer;

pub use channel::ChannelQueue;
pub use file::{parse_entry_name, EntryName, FileQueue, CLAIMED_SUFFIX, WRITING_SUFFIX};
pub use timer::TimerQueue;

use crate::message::Message;
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors raised by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unreadable queue entry {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed queue entry {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid queue name '{0}'")]
    InvalidName(String),

    #[error("Queue '{0}' is full")]
    Full(String),

    #[error("Queue '{0}' does not accept messages")]
    Unsupported(String),

    #[error("Queue '{0}' is closed")]
    Closed(String),
}

impl QueueError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> QueueError {
        let path = path.into();
        move |source| QueueError::Io { path, source }
    }
}

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Contract shared by every queue implementation
///
/// Delivery is at-least-once: a consumer must call [`Queue::end_transaction`] for
/// every message it receives, with `success = false` to request redelivery.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Name of the queue, used in entry names and logs
    fn name(&self) -> &str;

    /// Startup recovery; restores entries left in flight by a previous run
    fn prepare(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Starts background delivery. Must be called from within a Tokio runtime.
    fn start(&self) -> QueueResult<()>;

    /// Stops background delivery and waits for it to wind down
    async fn stop(&self);

    /// Waits for the next delivered message; `None` once the queue is stopped
    async fn recv(&self) -> Option<Message>;

    /// Enqueues a message with the given priority (lower is delivered first)
    fn put(&self, message: &Message, priority: u32) -> QueueResult<()>;

    /// Acknowledges a delivered message
    fn end_transaction(&self, message: &Message, success: bool) -> QueueResult<()>;

    /// Approximate depth, or `None` when the queue has no meaningful depth
    fn len(&self) -> Option<usize>;

    /// True only when the depth is known to be zero
    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// A spawned background loop with a shutdown signal
pub(crate) struct BackgroundTask {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    pub(crate) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Spawns `body` unless a loop is already running
    ///
    /// The closure receives a receiver that flips to `true` on shutdown.
    pub(crate) fn spawn<F, Fut>(&self, body: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if handle.is_some() {
            return;
        }

        let _ = self.shutdown.send(false);
        *handle = Some(tokio::spawn(body(self.shutdown.subscribe())));
    }

    /// Signals shutdown and waits for the loop to exit
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Background queue task ended abnormally: {}", e);
            }
        }
    }
}
