//! Delver frontier: the crawl-frontier and job-durability core of a web crawler
//!
//! This crate provides a crash-safe on-disk work queue, a rolling bloom filter for
//! visited-URL deduplication, a domain-sharded persistent key/value store for deferred
//! discoveries, a fixed-size worker pool, and the depth-first accumulate/publish logic
//! that ties them into a self-sustaining crawl loop.

pub mod app;
pub mod bloom;
pub mod config;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod maps;
pub mod message;
pub mod metrics;
pub mod objectstore;
pub mod queue;
pub mod robots;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Bloom filter error: {0}")]
    Bloom(#[from] bloom::BloomError),

    #[error("Persistent map error: {0}")]
    Map(#[from] maps::MapError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] objectstore::ObjectStoreError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected message type {found:?}, expected {expected:?}")]
    UnexpectedMessage {
        expected: message::MessageType,
        found: message::MessageType,
    },

    #[error("Unknown resource '{0}'")]
    UnknownResource(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("{} errors occurred: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<FrontierError>),
}

impl FrontierError {
    /// Collapses a list of errors into a single result
    ///
    /// Returns `Ok(())` for an empty list, the error itself for a single entry,
    /// and `FrontierError::Multiple` otherwise.
    pub fn collect(mut errors: Vec<FrontierError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(FrontierError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[FrontierError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL: {0}")]
    MissingHost(String),

    #[error("Invalid shard identifier: {0}")]
    InvalidShard(String),
}

/// Result type alias for frontier operations
pub type Result<T> = std::result::Result<T, FrontierError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use message::{CompositeAnalysis, FetchRequest, FetchResponse, Message, MessageType};
pub use url::registrable_domain;
