use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
///
/// # Arguments
///
/// * `content` - TOML document
///
/// # Returns
///
/// * `Ok(Config)` - Parsed and validated configuration
/// * `Err(ConfigError)` - Malformed TOML or a validation failure
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ManagerKind, ResourceConfig, WorkerKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const PIPELINE: &str = r#"
default-save-interval-secs = 60

[workers]
worker-counts = 4

[http-client]
timeout-secs = 5
user-agent = "delver-test"

[persistent-map]
gc-interval-secs = 30

[[resource]]
type = "file-queue"
name = "fetch"
path = "/tmp/delver/fetch"
resilient = true

[[resource]]
type = "file-queue"
name = "extract"
path = "/tmp/delver/extract"

[[resource]]
type = "file-queue"
name = "accumulate"
path = "/tmp/delver/accumulate"

[[resource]]
type = "rolling-bloom-filter"
name = "visited"
path = "/tmp/delver/visited.bloom"
max-n = 10000000
p = 0.1
count = 3

[[resource]]
type = "multi-host-map"
name = "urls"
path = "/tmp/delver/urls"

[[resource]]
type = "persistent-map"
name = "hosts"
path = "/tmp/delver/hosts.db"

[[resource]]
type = "filesystem-object-store"
name = "bodies"
path = "/tmp/delver/bodies"

[[worker]]
name = "fetcher"
type = "http-fetcher"
inbox = "fetch"
outbox = ["extract"]
object-store = "bodies"

[[worker]]
name = "extractor"
type = "link-extractor"
count = 2
inbox = "extract"
outbox = ["accumulate"]
object-store = "bodies"

[[worker]]
name = "accumulator"
type = "dfs-accumulator"
inbox = "accumulate"
outbox = ["fetch"]
bloom = "visited"
url-store = "urls"
max-depth = 2

[[worker]]
name = "publisher"
manager = "job"
interval-ms = 1000
type = "dfs-publisher"
url-store = "urls"
visited-hosts = "hosts"
queue = "fetch"
rotate-after-secs = 10

[[worker]]
name = "seeds"
manager = "job"
interval-ms = 1000
outbox = ["fetch"]
type = "fixed-seed-publisher"
seeds = ["https://example.com/"]
"#;

    #[test]
    fn test_load_full_pipeline() {
        let file = create_temp_config(PIPELINE);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.default_save_interval_secs, 60);
        assert_eq!(config.workers.worker_counts, 4);
        assert_eq!(config.workers.termination_grace_ms, 2000);
        assert_eq!(config.http_client.user_agent, "delver-test");
        assert_eq!(config.http_client.max_retries, 1);
        assert_eq!(config.persistent_map.gc_interval_secs, 30);
        assert!((config.persistent_map.gc_discard_ratio - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.resources.len(), 7);
        assert_eq!(config.stages.len(), 5);

        match config.resource("fetch").unwrap() {
            ResourceConfig::FileQueue(q) => {
                assert!(q.resilient);
                assert_eq!(q.dlq_path, None);
            }
            other => panic!("unexpected resource {:?}", other),
        }

        match config.resource("visited").unwrap() {
            ResourceConfig::RollingBloomFilter(b) => {
                assert_eq!(b.max_n, 10_000_000);
                assert_eq!(b.count, 3);
            }
            other => panic!("unexpected resource {:?}", other),
        }

        let extractor = &config.stages[1];
        assert_eq!(extractor.count, Some(2));
        assert_eq!(extractor.manager, ManagerKind::Worker);
        assert!(matches!(extractor.kind, WorkerKind::LinkExtractor(_)));

        let publisher = &config.stages[3];
        assert_eq!(publisher.manager, ManagerKind::Job);
        match &publisher.kind {
            WorkerKind::DfsPublisher(p) => {
                assert_eq!(p.queue, "fetch");
                assert_eq!(p.batch_size, 1);
                assert!(p.respect_robots);
            }
            other => panic!("unexpected worker {:?}", other),
        }
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config = parse_config("").unwrap();
        assert!(config.workers.enabled);
        assert!(config.workers.worker_counts >= 8);
        assert_eq!(config.default_save_interval_secs, 120);
        assert_eq!(config.persistent_map.gc_err_threshold, 2);
        assert_eq!(config.robots.expiration_secs, 3600);
    }

    #[test]
    fn test_unknown_worker_type_rejected() {
        let result = parse_config(
            r#"
[[worker]]
name = "x"
type = "sentiment-analyzer"
inbox = "q"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/delver.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }

    #[test]
    fn test_load_config_with_hash() {
        let file = create_temp_config(PIPELINE);
        let (config, hash) = load_config_with_hash(file.path()).unwrap();
        assert_eq!(config.stages.len(), 5);
        assert_eq!(hash.len(), 64);
    }
}
