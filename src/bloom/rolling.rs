use crate::bloom::{Bloom, BloomError, BloomFilter, BloomResult, SaveTimer};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Bloom filter made of `count` generations, newest first
///
/// Writes go to generation 0. When it reports overflow or an exceeded error rate,
/// a fresh generation is pushed to the front (dropping the oldest beyond `count`)
/// and the write is retried once against it. Reads check every live generation.
///
/// One read/write lock covers the generation list, and a write holds it for the
/// whole transaction including any rotation, so readers never observe a
/// half-rotated state.
pub struct RollingBloomFilter {
    inner: Arc<RollingInner>,
    saver: Mutex<Option<SaveTimer>>,
}

struct RollingInner {
    generations: RwLock<VecDeque<BloomFilter>>,
    max_n: u64,
    p: f64,
    count: usize,
    path: Option<PathBuf>,
}

impl RollingBloomFilter {
    /// Creates the filter, restoring generation 0 from `path` when the file exists
    ///
    /// # Arguments
    ///
    /// * `max_n` - Capacity of each generation
    /// * `p` - Target false-positive rate of each generation
    /// * `count` - Number of live generations (at least 1)
    /// * `path` - Where generation 0 is persisted
    pub fn open(max_n: u64, p: f64, count: usize, path: Option<PathBuf>) -> BloomResult<Self> {
        let first = match &path {
            Some(path) if path.exists() => {
                let filter = BloomFilter::load(path)?;
                tracing::info!(
                    "Loaded bloom generation from {} (~{} elements)",
                    path.display(),
                    filter.len()
                );
                filter
            }
            _ => BloomFilter::new(max_n, p)?,
        };

        let mut generations = VecDeque::with_capacity(count.max(1));
        generations.push_front(first);

        Ok(Self {
            inner: Arc::new(RollingInner {
                generations: RwLock::new(generations),
                max_n,
                p,
                count: count.max(1),
                path,
            }),
            saver: Mutex::new(None),
        })
    }

    /// Saves generation 0 every `interval` on a background thread
    pub fn start_saving(&self, interval: Duration) {
        if self.inner.path.is_none() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let timer = SaveTimer::spawn(interval, move || inner.save());
        *self.saver.lock().unwrap_or_else(|e| e.into_inner()) = Some(timer);
    }

    /// Number of live generations
    pub fn generations(&self) -> usize {
        self.inner
            .generations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl RollingInner {
    fn rotate(&self, generations: &mut VecDeque<BloomFilter>) -> BloomResult<()> {
        generations.push_front(BloomFilter::new(self.max_n, self.p)?);
        generations.truncate(self.count);

        tracing::info!(
            "Rotated bloom filter; {} generations live",
            generations.len()
        );
        Ok(())
    }

    fn save(&self) -> BloomResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let generations = self.generations.read().unwrap_or_else(|e| e.into_inner());
        match generations.front() {
            Some(newest) => newest.save(path),
            None => Ok(()),
        }
    }
}

impl Bloom for RollingBloomFilter {
    fn contains(&self, value: &[u8]) -> bool {
        self.inner
            .generations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|generation| generation.contains(value))
    }

    fn set_many(&self, values: &[&[u8]]) -> BloomResult<()> {
        let mut generations = self
            .inner
            .generations
            .write()
            .unwrap_or_else(|e| e.into_inner());

        for value in values {
            let result = match generations.front_mut() {
                Some(newest) => newest.add(value),
                None => Err(BloomError::Overflow {
                    max_n: self.inner.max_n,
                }),
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_capacity() => {
                    tracing::debug!("Bloom generation full: {}", e);
                    self.inner.rotate(&mut generations)?;
                    if let Some(newest) = generations.front_mut() {
                        newest.add(value)?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn save(&self) -> BloomResult<()> {
        self.inner.save()
    }

    fn close(&self) -> BloomResult<()> {
        if let Some(timer) = self.saver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.stop();
        }
        self.inner.save()
    }
}
