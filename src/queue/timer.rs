use crate::message::Message;
use crate::queue::{BackgroundTask, Queue, QueueError, QueueResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;

/// Queue that produces a timer message every interval
///
/// Ticks are dropped rather than buffered while the consumer is busy, so a slow
/// job never sees a burst of stale ticks.
pub struct TimerQueue {
    name: String,
    interval: Duration,
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
    ticker: BackgroundTask,
}

impl TimerQueue {
    /// Creates a timer queue; ticks start once [`Queue::start`] is called
    pub fn new(name: &str, interval: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(1);

        Self {
            name: name.to_string(),
            interval,
            sender,
            receiver: Mutex::new(receiver),
            ticker: BackgroundTask::new(),
        }
    }
}

async fn tick(interval: Duration, sender: mpsc::Sender<Message>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if sender.is_closed() {
                    break;
                }
                let _ = sender.try_send(Message::timer());
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[async_trait]
impl Queue for TimerQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> QueueResult<()> {
        let interval = self.interval;
        let sender = self.sender.clone();
        self.ticker
            .spawn(move |shutdown| tick(interval, sender, shutdown));
        Ok(())
    }

    async fn stop(&self) {
        self.ticker.stop().await;
        match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.close(),
            Err(_) => tracing::warn!("Queue {} stopped while a consumer was waiting", self.name),
        }
    }

    async fn recv(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    fn put(&self, _message: &Message, _priority: u32) -> QueueResult<()> {
        Err(QueueError::Unsupported(self.name.clone()))
    }

    fn end_transaction(&self, _message: &Message, _success: bool) -> QueueResult<()> {
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        None
    }
}
