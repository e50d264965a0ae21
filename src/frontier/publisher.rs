use crate::maps::{Entry, KvMap, MultiHostMap, PersistentMap};
use crate::message::{FetchRequest, Message};
use crate::queue::Queue;
use crate::robots::RobotsPolicy;
use crate::worker::Worker;
use crate::{FrontierError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Emptiness bookkeeping, guarded so ticks cannot race a refill
struct PublisherState {
    first_pass: bool,
    empty_since: Option<Instant>,
}

/// The fields a deferred entry must carry
#[derive(Deserialize)]
struct Deferred {
    uri: String,
    #[serde(default)]
    origin: String,
}

/// Refills the fetch-input queue from deferred cross-domain discoveries
///
/// On every tick the watched queue is sampled. Once it has been empty for
/// longer than `rotate_after`, up to `batch_size` unvisited hosts are drained
/// from the URL store into the queue, then recorded as visited and removed.
/// The first tick always refills.
pub struct DfsPublisher {
    queue: Arc<dyn Queue>,
    url_store: Arc<MultiHostMap>,
    visited_hosts: Arc<PersistentMap>,
    robots: Arc<dyn RobotsPolicy>,
    rotate_after: Duration,
    batch_size: usize,
    state: Mutex<PublisherState>,
}

impl DfsPublisher {
    /// Creates a publisher
    ///
    /// # Arguments
    ///
    /// * `queue` - Fetch-input queue that is watched and refilled
    /// * `url_store` - Deferred discoveries, sharded by registrable domain
    /// * `visited_hosts` - Hosts already drained
    /// * `robots` - Policy applied to every republished URI
    /// * `rotate_after` - How long the queue must stay empty before a refill
    /// * `batch_size` - Hosts drained per refill
    pub fn new(
        queue: Arc<dyn Queue>,
        url_store: Arc<MultiHostMap>,
        visited_hosts: Arc<PersistentMap>,
        robots: Arc<dyn RobotsPolicy>,
        rotate_after: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            url_store,
            visited_hosts,
            robots,
            rotate_after,
            batch_size: batch_size.max(1),
            state: Mutex::new(PublisherState {
                first_pass: true,
                empty_since: None,
            }),
        }
    }

    /// Handles one timer tick
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - Number of requests published (zero when no refill was due)
    /// * `Err(FrontierError)` - The refill failed; it is retried on a later tick
    pub async fn on_tick(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        let now = Instant::now();
        let empty = self.queue.is_empty();
        let due = empty
            && state
                .empty_since
                .map_or(false, |since| now.duration_since(since) > self.rotate_after);
        let refill = state.first_pass || due;
        state.first_pass = false;

        if refill {
            let published = self.refill().await?;
            state.empty_since = None;
            return Ok(published);
        }

        if !empty {
            state.empty_since = None;
        } else if state.empty_since.is_none() {
            state.empty_since = Some(now);
        }

        Ok(0)
    }

    /// Drains up to `batch_size` unvisited hosts into the queue
    ///
    /// Entries are removed from a shard only once they were queued (or
    /// rejected by robots.txt). A host whose entries could not all be queued
    /// keeps the rest for a later refill and is not marked visited; the pass
    /// stops there since the queue is refusing writes.
    async fn refill(&self) -> Result<usize> {
        let store = Arc::clone(&self.url_store);
        let hosts = blocking(move || Ok(store.hosts()?)).await?;

        let mut drained = 0;
        let mut published = 0;

        for host in hosts {
            if drained >= self.batch_size {
                break;
            }

            if self.is_visited(&host).await? {
                tracing::debug!("Discarding deferred links for already drained host {}", host);
                self.remove_host(&host).await?;
                continue;
            }

            let store = Arc::clone(&self.url_store);
            let shard = host.clone();
            let entries = blocking(move || Ok(store.entries_for_host(&shard)?)).await?;
            let total = entries.len();

            let outcome = self.publish(&host, entries).await;
            published += outcome.published;

            if outcome.handled.len() == total {
                self.remove_host(&host).await?;
                self.mark_visited(&host).await?;
                drained += 1;
                continue;
            }

            let store = Arc::clone(&self.url_store);
            let shard = host.clone();
            let left =
                blocking(move || Ok(store.delete_many(&shard, &outcome.handled)?)).await?;
            tracing::warn!(
                "Queue {} refused entries for {}; {} kept for a later refill",
                self.queue.name(),
                host,
                left
            );
            break;
        }

        if drained > 0 || published > 0 {
            tracing::info!(
                "Refilled {} with {} requests from {} host(s)",
                self.queue.name(),
                published,
                drained
            );
        }

        Ok(published)
    }

    /// Queues the entries of one host, stopping at the first refused write
    async fn publish(&self, host: &str, entries: Vec<Entry>) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();

        for (key, value) in entries {
            let deferred: Deferred = match serde_json::from_slice(&value) {
                Ok(deferred) => deferred,
                Err(e) => {
                    tracing::warn!(
                        "Skipping malformed entry {} for {}: {}",
                        String::from_utf8_lossy(&key),
                        host,
                        e
                    );
                    outcome.handled.push(key);
                    continue;
                }
            };

            match self.robots.is_allowed(&deferred.uri).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("{} disallowed by robots.txt", deferred.uri);
                    outcome.handled.push(key);
                    continue;
                }
                Err(e) => tracing::warn!("Robots check failed for {}: {}", deferred.uri, e),
            }

            let message = FetchRequest::new(&deferred.uri, &deferred.origin, 0)
                .map_err(FrontierError::from)
                .and_then(|request| Ok(request.to_message()?));

            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("Skipping deferred link {}: {}", deferred.uri, e);
                    outcome.handled.push(key);
                    continue;
                }
            };

            match self.queue.put(&message, 0) {
                Ok(()) => {
                    outcome.published += 1;
                    outcome.handled.push(key);
                }
                Err(e) => {
                    tracing::warn!("Unable to queue {}: {}", deferred.uri, e);
                    break;
                }
            }
        }

        outcome
    }

    async fn is_visited(&self, host: &str) -> Result<bool> {
        let visited = Arc::clone(&self.visited_hosts);
        let host = host.to_string();
        blocking(move || Ok(visited.get(host.as_bytes())?.is_some())).await
    }

    async fn mark_visited(&self, host: &str) -> Result<()> {
        let visited = Arc::clone(&self.visited_hosts);
        let host = host.to_string();
        blocking(move || {
            visited.set(host.as_bytes(), chrono::Utc::now().to_rfc3339().as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn remove_host(&self, host: &str) -> Result<()> {
        let store = Arc::clone(&self.url_store);
        let host = host.to_string();
        blocking(move || {
            store.remove_host(&host)?;
            Ok(())
        })
        .await
    }
}

/// Keys of one host that left the shard's care, and how many were queued
#[derive(Default)]
struct PublishOutcome {
    handled: Vec<Vec<u8>>,
    published: usize,
}

async fn blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| FrontierError::Task(e.to_string()))?
}

#[async_trait]
impl Worker for DfsPublisher {
    async fn on_message(&self, _message: &Message) -> Result<Vec<Message>> {
        self.on_tick().await?;
        Ok(Vec::new())
    }
}
