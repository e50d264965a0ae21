//! Storage for fetched bodies
//!
//! The fetcher writes each response body under a fresh id; downstream stages
//! read it back by that id.

mod filesystem;

pub use filesystem::FilesystemObjectStore;

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by object stores
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Empty object id")]
    EmptyKey,

    #[error("Invalid object id '{0}'")]
    InvalidKey(String),

    #[error("Object '{0}' already exists")]
    AlreadyExists(String),

    #[error("Object '{0}' not found")]
    NotFound(String),

    #[error("Object store IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Result type alias for object store operations
pub type ObjectStoreResult<T> = std::result::Result<T, ObjectStoreError>;

/// Write-once blob storage keyed by id
pub trait ObjectStore: Send + Sync {
    /// Stores everything `source` yields under `id`
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Hex SHA-256 digest of the stored bytes
    /// * `Err(ObjectStoreError)` - The id is taken or invalid, or the write failed
    fn put(&self, id: &str, source: &mut dyn Read) -> ObjectStoreResult<String>;

    /// Opens a stored object for reading
    fn get(&self, id: &str) -> ObjectStoreResult<File>;

    /// Removes a stored object
    fn delete(&self, id: &str) -> ObjectStoreResult<()>;
}
