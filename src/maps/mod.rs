//! Durable key/value stores for the frontier
//!
//! [`PersistentMap`] is one embedded SQLite store with a background compaction
//! loop. [`MultiHostMap`] routes URI keys to one [`PersistentMap`] shard per
//! registrable domain, opening the shard only for the duration of each operation.

mod keyed_mutex;
mod multi_host;
mod persistent;

pub use keyed_mutex::{KeyedGuard, KeyedMutex};
pub use multi_host::MultiHostMap;
pub use persistent::{MapSettings, PersistentMap};

use crate::UrlError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by persistent maps
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Map IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] UrlError),

    #[error("Map {0} is closed")]
    Closed(PathBuf),

    #[error("{} shard operations failed: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<MapError>),
}

fn join_errors(errors: &[MapError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for map operations
pub type MapResult<T> = std::result::Result<T, MapError>;

/// An owned key/value pair
pub type Entry = (Vec<u8>, Vec<u8>);

/// Durable byte-keyed map
pub trait KvMap: Send + Sync {
    /// Looks up a key
    fn get(&self, key: &[u8]) -> MapResult<Option<Vec<u8>>>;

    /// Inserts or replaces a key
    fn set(&self, key: &[u8], value: &[u8]) -> MapResult<()>;

    /// Inserts or replaces a batch of keys as few transactions as possible
    fn set_many(&self, pairs: &[Entry]) -> MapResult<()>;

    /// Visits every entry in key order until `visit` returns false
    fn iterate(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> MapResult<()>;

    /// Releases the underlying store
    fn close(&self) -> MapResult<()>;
}
