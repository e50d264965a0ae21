use crate::metrics::PipelineMetrics;
use crate::queue::{Queue, TimerQueue};
use crate::worker::{Manager, Worker, WorkerManager};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Worker manager whose inbox is a periodic timer
///
/// Used for schedule-triggered stages such as the frontier publisher.
pub struct JobManager {
    timer: Arc<TimerQueue>,
    inner: WorkerManager,
}

impl JobManager {
    /// Creates a job ticking every `interval`
    ///
    /// # Arguments
    ///
    /// * `name` - Stage name; also names the timer queue
    /// * `worker` - The stage implementation, invoked once per tick
    /// * `interval` - Tick period
    /// * `outboxes` - Queues every handler output is put to
    /// * `count` - Number of concurrent executors
    /// * `grace` - How long `stop` waits for each executor
    pub fn new(
        name: &str,
        worker: Arc<dyn Worker>,
        interval: Duration,
        outboxes: Vec<Arc<dyn Queue>>,
        count: usize,
        grace: Duration,
    ) -> Self {
        let timer = Arc::new(TimerQueue::new(name, interval));
        let inbox: Arc<dyn Queue> = timer.clone();

        Self {
            timer,
            inner: WorkerManager::new(name, worker, inbox, outboxes, count, grace),
        }
    }
}

#[async_trait]
impl Manager for JobManager {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start(&self) -> Result<()> {
        self.timer.start()?;
        self.inner.start()
    }

    async fn stop(&self) {
        self.inner.stop().await;
        self.timer.stop().await;
    }

    fn metrics(&self) -> Arc<PipelineMetrics> {
        self.inner.metrics()
    }
}
