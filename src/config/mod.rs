//! Configuration module
//!
//! This module handles loading, parsing, and validating the TOML configuration file
//! that declares resources (queues, bloom filters, maps, object stores) and the
//! pipeline stages wired between them.
//!
//! # Example
//!
//! ```no_run
//! use delver_frontier::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("delver.toml")).unwrap();
//! println!("{} resources, {} stages", config.resources.len(), config.stages.len());
//! ```

mod parser;
mod types;
pub mod validation;

// Re-export types
pub use types::{
    AccumulatorConfig, BloomFilterConfig, ChannelQueueConfig, Config, FileQueueConfig,
    HttpClientConfig, ManagerKind, ObjectStoreStageConfig, PathResourceConfig,
    PersistentMapConfig, PublisherConfig, ResourceConfig, RobotsConfig,
    RollingBloomFilterConfig, SeedConfig, TimerQueueConfig, WorkerConfig, WorkerKind,
    WorkersConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
