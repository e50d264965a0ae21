use crate::config::types::{
    BloomFilterConfig, Config, FileQueueConfig, ManagerKind, PersistentMapConfig, ResourceConfig,
    RollingBloomFilterConfig, WorkerConfig, WorkerKind,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_persistent_map_config(&config.persistent_map)?;
    validate_resources(&config.resources)?;
    validate_workers(config)?;
    Ok(())
}

/// Validates shared persistent map settings
fn validate_persistent_map_config(config: &PersistentMapConfig) -> Result<(), ConfigError> {
    if !(config.gc_discard_ratio > 0.0 && config.gc_discard_ratio <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "gc-discard-ratio must be in (0, 1], got {}",
            config.gc_discard_ratio
        )));
    }

    if config.gc_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "gc-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.default_prefetch_size == 0 {
        return Err(ConfigError::Validation(
            "default-prefetch-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates resource definitions and name uniqueness
fn validate_resources(resources: &[ResourceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for resource in resources {
        let name = resource.name();

        if name.is_empty() {
            return Err(ConfigError::Validation(
                "resource name cannot be empty".to_string(),
            ));
        }

        if !names.insert(name) {
            return Err(ConfigError::Validation(format!(
                "duplicate resource name '{}'",
                name
            )));
        }

        match resource {
            ResourceConfig::FileQueue(c) => validate_file_queue(c)?,
            ResourceConfig::ChannelQueue(c) => {
                if c.capacity == 0 {
                    return Err(ConfigError::Validation(format!(
                        "channel queue '{}' must have capacity >= 1",
                        c.name
                    )));
                }
            }
            ResourceConfig::TimerQueue(c) => {
                if c.interval_ms == 0 {
                    return Err(ConfigError::Validation(format!(
                        "timer queue '{}' must have interval-ms >= 1",
                        c.name
                    )));
                }
            }
            ResourceConfig::BloomFilter(c) => validate_bloom(c)?,
            ResourceConfig::RollingBloomFilter(c) => validate_rolling_bloom(c)?,
            ResourceConfig::PersistentMap(c)
            | ResourceConfig::MultiHostMap(c)
            | ResourceConfig::FilesystemObjectStore(c) => {
                if c.path.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "resource '{}' must have a path",
                        c.name
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Returns true if `name` is a valid queue name (`[a-zA-Z0-9]+`)
pub fn is_valid_queue_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

fn validate_file_queue(config: &FileQueueConfig) -> Result<(), ConfigError> {
    if !is_valid_queue_name(&config.name) {
        return Err(ConfigError::Validation(format!(
            "queue name '{}' must contain only ASCII letters and digits",
            config.name
        )));
    }

    if config.path.is_empty() {
        return Err(ConfigError::Validation(format!(
            "file queue '{}' must have a path",
            config.name
        )));
    }

    if config.max_poll_delay_ms == 0 {
        return Err(ConfigError::Validation(format!(
            "file queue '{}' must have max-poll-delay-ms >= 1",
            config.name
        )));
    }

    Ok(())
}

fn validate_bloom_params(name: &str, max_n: u64, p: f64) -> Result<(), ConfigError> {
    if max_n == 0 {
        return Err(ConfigError::Validation(format!(
            "bloom filter '{}' must have max-n >= 1",
            name
        )));
    }

    if !(p > 0.0 && p < 1.0) {
        return Err(ConfigError::Validation(format!(
            "bloom filter '{}' must have p in (0, 1), got {}",
            name, p
        )));
    }

    Ok(())
}

fn validate_bloom(config: &BloomFilterConfig) -> Result<(), ConfigError> {
    validate_bloom_params(&config.name, config.max_n, config.p)
}

fn validate_rolling_bloom(config: &RollingBloomFilterConfig) -> Result<(), ConfigError> {
    validate_bloom_params(&config.name, config.max_n, config.p)?;

    if config.count == 0 {
        return Err(ConfigError::Validation(format!(
            "rolling bloom filter '{}' must have count >= 1",
            config.name
        )));
    }

    Ok(())
}

/// Validates stage definitions and their resource references
fn validate_workers(config: &Config) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for worker in &config.stages {
        if !names.insert(worker.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate worker name '{}'",
                worker.name
            )));
        }

        if worker.count == Some(0) {
            return Err(ConfigError::Validation(format!(
                "worker '{}' must have count >= 1",
                worker.name
            )));
        }

        match worker.manager {
            ManagerKind::Worker => {
                let inbox = worker.inbox.as_deref().ok_or_else(|| {
                    ConfigError::Validation(format!("worker '{}' requires an inbox", worker.name))
                })?;
                require(config, worker, inbox, ResourceConfig::is_queue, "queue")?;
            }
            ManagerKind::Job => {
                if worker.interval_ms.unwrap_or(0) == 0 {
                    return Err(ConfigError::Validation(format!(
                        "job '{}' requires interval-ms >= 1",
                        worker.name
                    )));
                }
            }
        }

        for outbox in &worker.outbox {
            require(config, worker, outbox, ResourceConfig::is_queue, "queue")?;
        }

        validate_worker_kind(config, worker)?;
    }

    Ok(())
}

fn validate_worker_kind(config: &Config, worker: &WorkerConfig) -> Result<(), ConfigError> {
    match &worker.kind {
        WorkerKind::HttpFetcher(c) | WorkerKind::LinkExtractor(c) => require(
            config,
            worker,
            &c.object_store,
            |r| matches!(r, ResourceConfig::FilesystemObjectStore(_)),
            "object store",
        ),
        WorkerKind::DfsAccumulator(c) => {
            require(config, worker, &c.bloom, ResourceConfig::is_bloom, "bloom filter")?;
            require(
                config,
                worker,
                &c.url_store,
                |r| matches!(r, ResourceConfig::MultiHostMap(_)),
                "multi-host map",
            )
        }
        WorkerKind::DfsPublisher(c) => {
            require(
                config,
                worker,
                &c.url_store,
                |r| matches!(r, ResourceConfig::MultiHostMap(_)),
                "multi-host map",
            )?;
            require(
                config,
                worker,
                &c.visited_hosts,
                |r| matches!(r, ResourceConfig::PersistentMap(_)),
                "persistent map",
            )?;
            require(config, worker, &c.queue, ResourceConfig::is_queue, "queue")?;

            if c.batch_size == 0 {
                return Err(ConfigError::Validation(format!(
                    "worker '{}' must have batch-size >= 1",
                    worker.name
                )));
            }

            Ok(())
        }
        WorkerKind::FixedSeedPublisher(c) => {
            if c.seeds.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "worker '{}' must list at least one seed",
                    worker.name
                )));
            }

            for seed in &c.seeds {
                let url = Url::parse(seed).map_err(|e| {
                    ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
                })?;

                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ConfigError::Validation(format!(
                        "Seed URL '{}' must use http or https",
                        seed
                    )));
                }
            }

            Ok(())
        }
    }
}

/// Checks that `name` refers to an existing resource accepted by `accept`
fn require(
    config: &Config,
    worker: &WorkerConfig,
    name: &str,
    accept: impl Fn(&ResourceConfig) -> bool,
    expected: &str,
) -> Result<(), ConfigError> {
    match config.resource(name) {
        Some(resource) if accept(resource) => Ok(()),
        Some(_) => Err(ConfigError::Validation(format!(
            "worker '{}' references '{}', which is not a {}",
            worker.name, name, expected
        ))),
        None => Err(ConfigError::Validation(format!(
            "worker '{}' references unknown resource '{}'",
            worker.name, name
        ))),
    }
}
