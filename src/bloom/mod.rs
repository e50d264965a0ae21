//! Bloom filters for visited-URL deduplication
//!
//! [`BloomFilter`] is a single fixed-capacity generation. [`RollingBloomFilter`]
//! keeps a newest-first list of generations and rotates when the newest one is
//! full, so memory stays bounded while recent visits remain represented.

mod filter;
mod rolling;
mod saver;

pub use filter::BloomFilter;
pub use rolling::RollingBloomFilter;
pub use saver::SaveTimer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by bloom filters
#[derive(Debug, Error)]
pub enum BloomError {
    #[error("Bloom filter is at capacity ({max_n} elements)")]
    Overflow { max_n: u64 },

    #[error("Bloom filter error rate {current} exceeds target {target}")]
    ErrorRateExceeded { current: f64, target: f64 },

    #[error("Invalid bloom filter parameters: {0}")]
    InvalidParameters(String),

    #[error("Malformed bloom filter file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Bloom filter IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl BloomError {
    /// True for the recoverable capacity signals that trigger rotation
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            BloomError::Overflow { .. } | BloomError::ErrorRateExceeded { .. }
        )
    }

    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> BloomError + '_ {
        move |source| BloomError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type alias for bloom filter operations
pub type BloomResult<T> = std::result::Result<T, BloomError>;

/// Approximate-membership set shared between workers
pub trait Bloom: Send + Sync {
    /// True if `value` may have been inserted; false means it certainly was not
    fn contains(&self, value: &[u8]) -> bool;

    /// Inserts a batch of values as one transaction
    fn set_many(&self, values: &[&[u8]]) -> BloomResult<()>;

    /// Inserts a single value
    fn add(&self, value: &[u8]) -> BloomResult<()> {
        self.set_many(&[value])
    }

    /// Persists the filter if it has a path
    fn save(&self) -> BloomResult<()>;

    /// Stops background persistence and saves one last time
    fn close(&self) -> BloomResult<()>;
}

/// A single generation shared behind a lock, with optional persistence
///
/// Unlike [`RollingBloomFilter`], capacity errors are returned to the caller.
pub struct SharedBloomFilter {
    filter: Arc<RwLock<BloomFilter>>,
    path: Option<PathBuf>,
    saver: Mutex<Option<SaveTimer>>,
}

impl SharedBloomFilter {
    /// Creates the filter, loading it from `path` when the file exists
    pub fn open(max_n: u64, p: f64, path: Option<PathBuf>) -> BloomResult<Self> {
        let filter = match &path {
            Some(path) if path.exists() => {
                let filter = BloomFilter::load(path)?;
                tracing::info!(
                    "Loaded bloom filter from {} (~{} elements)",
                    path.display(),
                    filter.len()
                );
                filter
            }
            _ => BloomFilter::new(max_n, p)?,
        };

        Ok(Self {
            filter: Arc::new(RwLock::new(filter)),
            path,
            saver: Mutex::new(None),
        })
    }

    /// Saves the filter every `interval` on a background thread
    pub fn start_saving(&self, interval: Duration) {
        let Some(path) = self.path.clone() else {
            return;
        };
        let filter = Arc::clone(&self.filter);

        let timer = SaveTimer::spawn(interval, move || {
            let guard = filter.read().unwrap_or_else(|e| e.into_inner());
            guard.save(&path)
        });

        *self.saver.lock().unwrap_or_else(|e| e.into_inner()) = Some(timer);
    }
}

impl Bloom for SharedBloomFilter {
    fn contains(&self, value: &[u8]) -> bool {
        self.filter
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(value)
    }

    fn set_many(&self, values: &[&[u8]]) -> BloomResult<()> {
        self.filter
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add_many(values)
    }

    fn save(&self) -> BloomResult<()> {
        match &self.path {
            Some(path) => self
                .filter
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .save(path),
            None => Ok(()),
        }
    }

    fn close(&self) -> BloomResult<()> {
        if let Some(timer) = self.saver.lock().unwrap_or_else(|e| e.into_inner()).take() {
            timer.stop();
        }
        self.save()
    }
}
