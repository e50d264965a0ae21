//! Pipeline stages and the managers that drive them
//!
//! A [`Worker`] turns one inbound message into zero or more outbound messages.
//! A [`WorkerManager`] runs a fixed pool of executors over an inbox queue, fans
//! the output out to its outboxes and ends each inbox transaction. A
//! [`JobManager`] does the same with a timer queue as the inbox.

mod job;
mod manager;

pub use job::JobManager;
pub use manager::WorkerManager;

use crate::message::Message;
use crate::metrics::PipelineMetrics;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A pipeline stage
#[async_trait]
pub trait Worker: Send + Sync {
    /// Handles one message
    ///
    /// # Returns
    ///
    /// * `Ok(messages)` - Messages to forward to every outbox; the inbox
    ///   transaction is then ended as successful
    /// * `Err(FrontierError)` - The inbox transaction is ended as failed
    async fn on_message(&self, message: &Message) -> Result<Vec<Message>>;

    /// Called after the output of `message` was forwarded (`delivered`), or
    /// after handling or forwarding failed
    async fn on_delivered(&self, _message: &Message, _delivered: bool) {}

    /// Called once after every executor has stopped
    async fn on_complete(&self) {}
}

/// Lifecycle shared by worker and job managers
#[async_trait]
pub trait Manager: Send + Sync {
    fn name(&self) -> &str;

    /// Spawns the executors. Must be called from within a Tokio runtime.
    fn start(&self) -> Result<()>;

    /// Stops the executors, waits for them within the grace period and runs
    /// the worker's completion hook
    ///
    /// Stopping is cooperative: an executor still inside its handler when the
    /// grace period ends is left to finish in the background.
    async fn stop(&self);

    fn metrics(&self) -> Arc<PipelineMetrics>;
}
