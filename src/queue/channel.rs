use crate::message::Message;
use crate::queue::{Queue, QueueError, QueueResult};
use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// Bounded in-memory queue
///
/// Messages live only as long as the process; acknowledgements are no-ops.
pub struct ChannelQueue {
    name: String,
    capacity: usize,
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
}

impl ChannelQueue {
    /// Creates a queue holding at most `capacity` messages
    pub fn new(name: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);

        Self {
            name: name.to_string(),
            capacity,
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

#[async_trait]
impl Queue for ChannelQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn stop(&self) {
        match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.close(),
            Err(_) => tracing::warn!("Queue {} stopped while a consumer was waiting", self.name),
        }
    }

    async fn recv(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    fn put(&self, message: &Message, _priority: u32) -> QueueResult<()> {
        self.sender
            .try_send(message.clone())
            .map_err(|e| match e {
                TrySendError::Full(_) => QueueError::Full(self.name.clone()),
                TrySendError::Closed(_) => QueueError::Closed(self.name.clone()),
            })
    }

    fn end_transaction(&self, _message: &Message, _success: bool) -> QueueResult<()> {
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.capacity - self.sender.capacity())
    }
}
