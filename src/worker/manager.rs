use crate::message::Message;
use crate::metrics::PipelineMetrics;
use crate::queue::Queue;
use crate::worker::{Manager, Worker};
use crate::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Fixed-size pool of executors draining one inbox queue
pub struct WorkerManager {
    name: String,
    count: usize,
    grace: Duration,
    executor: Arc<Executor>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// State shared by every executor of one manager
struct Executor {
    name: String,
    worker: Arc<dyn Worker>,
    inbox: Arc<dyn Queue>,
    outboxes: Vec<Arc<dyn Queue>>,
    metrics: Arc<PipelineMetrics>,
}

impl WorkerManager {
    /// Creates a manager; no executor runs until [`Manager::start`]
    ///
    /// # Arguments
    ///
    /// * `name` - Stage name used in logs
    /// * `worker` - The stage implementation
    /// * `inbox` - Queue the executors receive from
    /// * `outboxes` - Queues every handler output is put to
    /// * `count` - Number of concurrent executors (at least one)
    /// * `grace` - How long `stop` waits for each executor
    pub fn new(
        name: &str,
        worker: Arc<dyn Worker>,
        inbox: Arc<dyn Queue>,
        outboxes: Vec<Arc<dyn Queue>>,
        count: usize,
        grace: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);

        Self {
            name: name.to_string(),
            count: count.max(1),
            grace,
            executor: Arc::new(Executor {
                name: name.to_string(),
                worker,
                inbox,
                outboxes,
                metrics: Arc::new(PipelineMetrics::new()),
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn inbox(&self) -> &Arc<dyn Queue> {
        &self.executor.inbox
    }
}

#[async_trait]
impl Manager for WorkerManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if !handles.is_empty() {
            return Ok(());
        }

        let _ = self.shutdown.send(false);
        for id in 0..self.count {
            let executor = Arc::clone(&self.executor);
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(async move { executor.run(id, shutdown).await }));
        }

        tracing::info!(
            "Started {} executor(s) for {} on inbox {}",
            self.count,
            self.name,
            self.executor.inbox.name()
        );
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.shutdown.send(true);

        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for mut handle in handles {
            match tokio::time::timeout(self.grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Executor of {} ended abnormally: {}", self.name, e),
                Err(_) => {
                    // Dropping the handle detaches the task; its handler runs to completion.
                    tracing::warn!(
                        "Executor of {} did not stop within {:?}, leaving it to finish",
                        self.name,
                        self.grace
                    );
                    drop(handle);
                }
            }
        }

        self.executor.worker.on_complete().await;
        tracing::info!("Stopped {}: {}", self.name, self.executor.metrics.snapshot());
    }

    fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.executor.metrics)
    }
}

impl Executor {
    async fn run(&self, id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Executor {} of {} running", id, self.name);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                message = self.inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            self.dispatch(message).await;
        }

        tracing::debug!("Executor {} of {} exited", id, self.name);
    }

    /// Runs the handler, forwards its output and ends the inbox transaction
    async fn dispatch(&self, message: Message) {
        self.metrics.received.inc();

        let success = match self.worker.on_message(&message).await {
            Ok(outputs) => self.forward(&outputs),
            Err(e) => {
                tracing::warn!("{} failed to handle message {}: {}", self.name, message.id, e);
                false
            }
        };

        self.worker.on_delivered(&message, success).await;

        if success {
            self.metrics.succeeded.inc();
        } else {
            self.metrics.failed.inc();
        }

        if let Err(e) = self.inbox.end_transaction(&message, success) {
            tracing::error!(
                "{} could not end transaction for {}: {}",
                self.name,
                message.id,
                e
            );
        }
    }

    fn forward(&self, outputs: &[Message]) -> bool {
        for output in outputs {
            for outbox in &self.outboxes {
                if let Err(e) = outbox.put(output, 0) {
                    tracing::warn!(
                        "{} could not forward message to {}: {}",
                        self.name,
                        outbox.name(),
                        e
                    );
                    return false;
                }
                self.metrics.forwarded.inc();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::queue::{ChannelQueue, QueueResult};
    use crate::FrontierError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Emits one copy of every message and fails on timer ticks
    struct Echo {
        completed: AtomicBool,
    }

    #[async_trait]
    impl Worker for Echo {
        async fn on_message(&self, message: &Message) -> Result<Vec<Message>> {
            if message.message_type == MessageType::Timer {
                return Err(FrontierError::Task("timer".to_string()));
            }
            Ok(vec![message.clone()])
        }

        async fn on_complete(&self) {
            self.completed.store(true, Ordering::SeqCst);
        }
    }

    /// Channel queue that records acknowledgements
    struct Recording {
        inner: ChannelQueue,
        acked: AtomicUsize,
        nacked: AtomicUsize,
    }

    impl Recording {
        fn new(name: &str) -> Self {
            Self {
                inner: ChannelQueue::new(name, 16),
                acked: AtomicUsize::new(0),
                nacked: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Queue for Recording {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn start(&self) -> QueueResult<()> {
            self.inner.start()
        }

        async fn stop(&self) {
            self.inner.stop().await
        }

        async fn recv(&self) -> Option<Message> {
            self.inner.recv().await
        }

        fn put(&self, message: &Message, priority: u32) -> QueueResult<()> {
            self.inner.put(message, priority)
        }

        fn end_transaction(&self, _message: &Message, success: bool) -> QueueResult<()> {
            if success {
                self.acked.fetch_add(1, Ordering::SeqCst);
            } else {
                self.nacked.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn len(&self) -> Option<usize> {
            self.inner.len()
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn request() -> Message {
        Message::new(MessageType::FetchRequest, &serde_json::json!({"uri": "https://a.com/"})).unwrap()
    }

    #[tokio::test]
    async fn test_forwards_output_and_acknowledges() {
        let inbox = Arc::new(Recording::new("in"));
        let out_a = Arc::new(ChannelQueue::new("outa", 16));
        let out_b = Arc::new(ChannelQueue::new("outb", 16));
        let worker = Arc::new(Echo {
            completed: AtomicBool::new(false),
        });

        let manager = WorkerManager::new(
            "echo",
            worker.clone(),
            inbox.clone(),
            vec![out_a.clone() as Arc<dyn Queue>, out_b.clone()],
            3,
            Duration::from_millis(200),
        );
        manager.start().unwrap();

        for _ in 0..4 {
            inbox.put(&request(), 0).unwrap();
        }

        wait_for(|| inbox.acked.load(Ordering::SeqCst) == 4).await;
        manager.stop().await;

        assert_eq!(out_a.len(), Some(4));
        assert_eq!(out_b.len(), Some(4));
        assert!(worker.completed.load(Ordering::SeqCst));

        let snapshot = manager.metrics().snapshot();
        assert_eq!(snapshot.received, 4);
        assert_eq!(snapshot.succeeded, 4);
        assert_eq!(snapshot.forwarded, 8);
    }

    #[tokio::test]
    async fn test_handler_error_fails_transaction() {
        let inbox = Arc::new(Recording::new("in"));
        let out = Arc::new(ChannelQueue::new("out", 16));
        let manager = WorkerManager::new(
            "echo",
            Arc::new(Echo {
                completed: AtomicBool::new(false),
            }),
            inbox.clone(),
            vec![out.clone() as Arc<dyn Queue>],
            1,
            Duration::from_millis(200),
        );
        manager.start().unwrap();

        inbox.put(&Message::timer(), 0).unwrap();
        wait_for(|| inbox.nacked.load(Ordering::SeqCst) == 1).await;
        manager.stop().await;

        assert_eq!(out.len(), Some(0));
        assert_eq!(manager.metrics().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_full_outbox_fails_transaction() {
        let inbox = Arc::new(Recording::new("in"));
        let out = Arc::new(ChannelQueue::new("out", 1));
        let manager = WorkerManager::new(
            "echo",
            Arc::new(Echo {
                completed: AtomicBool::new(false),
            }),
            inbox.clone(),
            vec![out.clone() as Arc<dyn Queue>],
            1,
            Duration::from_millis(200),
        );
        manager.start().unwrap();

        inbox.put(&request(), 0).unwrap();
        inbox.put(&request(), 0).unwrap();
        wait_for(|| {
            inbox.acked.load(Ordering::SeqCst) + inbox.nacked.load(Ordering::SeqCst) == 2
        })
        .await;
        manager.stop().await;

        assert_eq!(inbox.acked.load(Ordering::SeqCst), 1);
        assert_eq!(inbox.nacked.load(Ordering::SeqCst), 1);
    }

    /// Sleeps inside the handler, then records that it finished
    struct Slow {
        finished: AtomicBool,
        delivered: AtomicBool,
    }

    #[async_trait]
    impl Worker for Slow {
        async fn on_message(&self, _message: &Message) -> Result<Vec<Message>> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn on_delivered(&self, _message: &Message, delivered: bool) {
            self.delivered.store(delivered, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_stop_lets_running_handler_finish() {
        let inbox = Arc::new(Recording::new("in"));
        let worker = Arc::new(Slow {
            finished: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
        });
        let manager = WorkerManager::new(
            "slow",
            worker.clone(),
            inbox.clone(),
            Vec::new(),
            1,
            Duration::from_millis(50),
        );
        manager.start().unwrap();

        inbox.put(&request(), 0).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.stop().await;
        assert!(!worker.finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(worker.finished.load(Ordering::SeqCst));
        assert!(worker.delivered.load(Ordering::SeqCst));
        assert_eq!(inbox.acked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_without_messages_returns_promptly() {
        let inbox = Arc::new(ChannelQueue::new("idle", 4));
        let manager = WorkerManager::new(
            "idle",
            Arc::new(Echo {
                completed: AtomicBool::new(false),
            }),
            inbox,
            Vec::new(),
            4,
            Duration::from_secs(5),
        );
        manager.start().unwrap();

        let started = std::time::Instant::now();
        manager.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
