//! Durable file queue
//!
//! Each entry is one JSON file named `{priority}-{unixSeconds}-{sequence}-{queueName}`.
//! Entries move through three states, all expressed in the file name:
//!
//! | Name | State |
//! |------|-------|
//! | `<name>.writing` | being written, invisible to consumers |
//! | `<name>` | ready |
//! | `<name>.claimed` | owned by exactly one in-flight consumer |
//!
//! Claiming is a rename from the ready name to the claimed name. The rename is
//! atomic, so it is the only mutual exclusion needed between threads and between
//! processes sharing the directory.

use crate::config::validation::is_valid_queue_name;
use crate::message::Message;
use crate::queue::{BackgroundTask, Queue, QueueError, QueueResult};
use async_trait::async_trait;
use rand::Rng;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch, Mutex};

/// Suffix of an entry owned by a consumer
pub const CLAIMED_SUFFIX: &str = ".claimed";

/// Suffix of an entry that is still being written
pub const WRITING_SUFFIX: &str = ".writing";

/// Sort key parsed from a ready entry name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryName {
    pub priority: u64,
    pub timestamp: u64,
    pub sequence: u64,
}

/// Parses a ready entry name
///
/// Returns `None` for anything that is not `digits-digits-digits-alnum`, which
/// excludes claimed and in-progress entries.
pub fn parse_entry_name(name: &str) -> Option<EntryName> {
    let mut parts = name.splitn(4, '-');
    let priority = parse_digits(parts.next()?)?;
    let timestamp = parse_digits(parts.next()?)?;
    let sequence = parse_digits(parts.next()?)?;
    let queue = parts.next()?;

    if !is_valid_queue_name(queue) {
        return None;
    }

    Some(EntryName {
        priority,
        timestamp,
        sequence,
    })
}

fn parse_digits(part: &str) -> Option<u64> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Crash-safe queue backed by a directory of JSON files
pub struct FileQueue {
    inner: Arc<FileQueueInner>,
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
    poller: BackgroundTask,
}

struct FileQueueInner {
    name: String,
    dir: PathBuf,
    dlq_dir: PathBuf,
    max_poll_delay: Duration,
    resilient: bool,
    sequence: AtomicU64,
}

impl FileQueue {
    /// Opens (creating if needed) a file queue
    ///
    /// # Arguments
    ///
    /// * `name` - Queue name, `[a-zA-Z0-9]+`
    /// * `dir` - Directory holding the entries
    /// * `dlq_dir` - Directory receiving malformed entries (defaults to `<dir>-dlq`)
    /// * `max_poll_delay` - Upper bound of the randomized poll delay
    /// * `resilient` - Log and skip malformed entries instead of exiting the process
    ///
    /// # Returns
    ///
    /// * `Ok(FileQueue)` - The queue, not yet started
    /// * `Err(QueueError)` - Invalid name or the directories could not be created
    pub fn new(
        name: &str,
        dir: impl Into<PathBuf>,
        dlq_dir: Option<PathBuf>,
        max_poll_delay: Duration,
        resilient: bool,
    ) -> QueueResult<Self> {
        if !is_valid_queue_name(name) {
            return Err(QueueError::InvalidName(name.to_string()));
        }

        let dir = dir.into();
        let dlq_dir = dlq_dir.unwrap_or_else(|| {
            let mut s = dir.clone().into_os_string();
            s.push("-dlq");
            PathBuf::from(s)
        });

        fs::create_dir_all(&dir).map_err(QueueError::io(&dir))?;
        fs::create_dir_all(&dlq_dir).map_err(QueueError::io(&dlq_dir))?;

        let sequence = highest_sequence(&dir)?;
        let (sender, receiver) = mpsc::channel(1);

        Ok(Self {
            inner: Arc::new(FileQueueInner {
                name: name.to_string(),
                dir,
                dlq_dir,
                max_poll_delay,
                resilient,
                sequence: AtomicU64::new(sequence),
            }),
            sender,
            receiver: Mutex::new(receiver),
            poller: BackgroundTask::new(),
        })
    }

    /// Directory holding the entries
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Directory receiving malformed entries
    pub fn dlq_dir(&self) -> &Path {
        &self.inner.dlq_dir
    }

    /// Claims the next ready entry without going through the poller
    ///
    /// # Returns
    ///
    /// * `Ok(Some(Message))` - A claimed message; the caller must end its transaction
    /// * `Ok(None)` - No ready entry
    /// * `Err(QueueError)` - The directory could not be read or the entry is malformed
    pub fn claim_next(&self) -> QueueResult<Option<Message>> {
        self.inner.next()
    }
}

/// Highest sequence number already used in `dir`, so a restarted queue never
/// reuses a name that is still on disk
fn highest_sequence(dir: &Path) -> QueueResult<u64> {
    let mut highest = 0;

    for entry in fs::read_dir(dir).map_err(QueueError::io(dir))? {
        let entry = entry.map_err(QueueError::io(dir))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let base = name
            .trim_end_matches(CLAIMED_SUFFIX)
            .trim_end_matches(WRITING_SUFFIX);

        if let Some(parsed) = parse_entry_name(base) {
            highest = highest.max(parsed.sequence);
        }
    }

    Ok(highest)
}

impl FileQueueInner {
    fn ready_entries(&self) -> QueueResult<Vec<String>> {
        let mut ready = Vec::new();

        for entry in fs::read_dir(&self.dir).map_err(QueueError::io(&self.dir))? {
            let entry = entry.map_err(QueueError::io(&self.dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if let Some(key) = parse_entry_name(&name) {
                ready.push((key, name));
            }
        }

        ready.sort();
        Ok(ready.into_iter().map(|(_, name)| name).collect())
    }

    fn next(&self) -> QueueResult<Option<Message>> {
        for name in self.ready_entries()? {
            let ready = self.dir.join(&name);
            let claimed = self.dir.join(format!("{}{}", name, CLAIMED_SUFFIX));

            // Losing the rename means another consumer owns the entry.
            if fs::rename(&ready, &claimed).is_err() {
                continue;
            }

            let bytes = fs::read(&claimed).map_err(|source| QueueError::Unreadable {
                path: claimed.clone(),
                source,
            })?;
            let mut message: Message = serde_json::from_slice(&bytes)
                .map_err(|source| QueueError::Malformed {
                    path: claimed.clone(),
                    source,
                })?;
            message.id = name;

            return Ok(Some(message));
        }

        Ok(None)
    }

    fn put(&self, message: &Message, priority: u32) -> QueueResult<String> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let name = format!("{}-{}-{}-{}", priority, timestamp, sequence, self.name);

        let mut envelope = message.clone();
        envelope.id = name.clone();
        let payload = serde_json::to_vec(&envelope)?;

        let final_path = self.dir.join(&name);
        let writing_path = self.dir.join(format!("{}{}", name, WRITING_SUFFIX));

        let mut file = fs::File::create(&writing_path).map_err(QueueError::io(&writing_path))?;
        file.write_all(&payload)
            .and_then(|_| file.sync_all())
            .map_err(QueueError::io(&writing_path))?;
        drop(file);

        fs::rename(&writing_path, &final_path).map_err(QueueError::io(&final_path))?;

        Ok(name)
    }

    fn release(&self, id: &str) -> QueueResult<()> {
        let claimed = self.dir.join(format!("{}{}", id, CLAIMED_SUFFIX));
        let ready = self.dir.join(id);
        fs::rename(&claimed, &ready).map_err(QueueError::io(&claimed))
    }

    /// Reacts to a fault raised while claiming
    ///
    /// Non-resilient queues exit the process. Resilient queues log the fault and
    /// move the claimed entry, if any, into the dead-letter directory.
    fn handle_fault(&self, err: QueueError) {
        if !self.resilient {
            tracing::error!("Queue {} hit a fatal fault: {}", self.name, err);
            std::process::exit(1);
        }

        tracing::warn!("Queue {} skipped an entry: {}", self.name, err);

        if let QueueError::Malformed { path, .. } | QueueError::Unreadable { path, .. } = &err {
            if let Err(e) = self.dead_letter(path) {
                tracing::error!("Queue {} failed to dead-letter entry: {}", self.name, e);
            }
        }
    }

    fn dead_letter(&self, claimed: &Path) -> QueueResult<()> {
        let name = claimed
            .file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(CLAIMED_SUFFIX).to_string())
            .unwrap_or_default();
        let target = self.dlq_dir.join(name);

        fs::rename(claimed, &target).map_err(QueueError::io(claimed))?;
        tracing::info!("Moved faulty entry to {}", target.display());
        Ok(())
    }

    fn poll_delay(&self) -> Duration {
        let max = self.max_poll_delay.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }
}

/// Background loop: claim the first ready entry and hand it to a consumer
async fn poll(
    inner: Arc<FileQueueInner>,
    sender: mpsc::Sender<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Queue {} poller started", inner.name);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let scan = {
            let inner = Arc::clone(&inner);
            tokio::task::spawn_blocking(move || inner.next()).await
        };

        let message = match scan {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => {
                if wait_or_shutdown(inner.poll_delay(), &mut shutdown).await {
                    break;
                }
                continue;
            }
            Ok(Err(e)) => {
                inner.handle_fault(e);
                if wait_or_shutdown(inner.poll_delay(), &mut shutdown).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                tracing::error!("Queue {} scan task failed: {}", inner.name, e);
                if wait_or_shutdown(inner.max_poll_delay, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        let id = message.id.clone();
        let delivered = tokio::select! {
            res = sender.send(message) => res.is_ok(),
            _ = shutdown.changed() => false,
        };

        if !delivered {
            if let Err(e) = inner.release(&id) {
                tracing::error!("Queue {} failed to release {}: {}", inner.name, id, e);
            }
            break;
        }
    }

    tracing::debug!("Queue {} poller stopped", inner.name);
}

/// Sleeps for `delay`; returns true if shutdown was requested meanwhile
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

#[async_trait]
impl Queue for FileQueue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn prepare(&self) -> QueueResult<()> {
        let dir = &self.inner.dir;
        let mut restored = 0;

        for entry in fs::read_dir(dir).map_err(QueueError::io(dir))? {
            let entry = entry.map_err(QueueError::io(dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if let Some(base) = name.strip_suffix(CLAIMED_SUFFIX) {
                let from = dir.join(&name);
                fs::rename(&from, dir.join(base)).map_err(QueueError::io(&from))?;
                restored += 1;
            }
        }

        if restored > 0 {
            tracing::info!(
                "Queue {} restored {} in-flight entries from a previous run",
                self.inner.name,
                restored
            );
        }

        Ok(())
    }

    fn start(&self) -> QueueResult<()> {
        let inner = Arc::clone(&self.inner);
        let sender = self.sender.clone();
        self.poller
            .spawn(move |shutdown| poll(inner, sender, shutdown));
        Ok(())
    }

    async fn stop(&self) {
        self.poller.stop().await;

        // Entries claimed by the poller but never received go back to ready.
        let Ok(mut receiver) = self.receiver.try_lock() else {
            tracing::warn!("Queue {} stopped while a consumer was waiting", self.inner.name);
            return;
        };
        while let Ok(message) = receiver.try_recv() {
            if let Err(e) = self.inner.release(&message.id) {
                tracing::error!("Queue {} failed to release {}: {}", self.inner.name, message.id, e);
            }
        }
    }

    async fn recv(&self) -> Option<Message> {
        self.receiver.lock().await.recv().await
    }

    fn put(&self, message: &Message, priority: u32) -> QueueResult<()> {
        let name = self.inner.put(message, priority)?;
        tracing::trace!("Queue {} accepted {}", self.inner.name, name);
        Ok(())
    }

    fn end_transaction(&self, message: &Message, success: bool) -> QueueResult<()> {
        if success {
            let claimed = self.inner.dir.join(format!("{}{}", message.id, CLAIMED_SUFFIX));
            fs::remove_file(&claimed).map_err(QueueError::io(&claimed))
        } else {
            self.inner.release(&message.id)
        }
    }

    fn len(&self) -> Option<usize> {
        match fs::read_dir(&self.inner.dir) {
            Ok(entries) => Some(entries.count()),
            Err(e) => {
                tracing::warn!(
                    "Failed to read queue directory {}: {}",
                    self.inner.dir.display(),
                    e
                );
                None
            }
        }
    }
}
