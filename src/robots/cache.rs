//! Per-host robots.txt cache
//!
//! Entries expire after a configured lifetime; a background sweep removes
//! expired entries so hosts that are never asked about again do not linger.

use crate::config::RobotsConfig;
use crate::robots::{ParsedRobots, RobotsPolicy};
use crate::{Result, UrlError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

/// Cached robots.txt data for one host
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub content: ParsedRobots,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(content: ParsedRobots) -> Self {
        Self {
            content,
            fetched_at: Utc::now(),
        }
    }

    /// Checks if the entry is older than `expiration`
    pub fn is_expired(&self, expiration: Duration) -> bool {
        Utc::now() - self.fetched_at > expiration
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }
}

type Entries = Arc<RwLock<HashMap<String, CachedRobots>>>;

/// Robots policy that fetches and caches robots.txt per scheme and host
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    expiration: Duration,
    clear_delay: std::time::Duration,
    entries: Entries,
    sweeper: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl RobotsCache {
    /// Creates a cache
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for robots.txt requests
    /// * `config` - Expiry, sweep interval and the user agent matched against rules
    pub fn new(client: Client, config: &RobotsConfig) -> Self {
        Self {
            client,
            user_agent: config.user_agent.clone(),
            expiration: Duration::seconds(config.expiration_secs as i64),
            clear_delay: std::time::Duration::from_secs(config.clear_expired_delay_secs.max(1)),
            entries: Arc::new(RwLock::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Starts the background sweep. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if sweeper.is_some() {
            return;
        }

        let (shutdown, mut signal) = watch::channel(false);
        let entries = Arc::clone(&self.entries);
        let expiration = self.expiration;
        let delay = self.clear_delay;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        let removed = clear_expired(&entries, expiration);
                        if removed > 0 {
                            tracing::debug!("Cleared {} expired robots.txt entries", removed);
                        }
                    }
                    _ = signal.changed() => break,
                }
            }
        });

        *sweeper = Some((shutdown, handle));
    }

    /// Stops the background sweep
    pub async fn stop(&self) {
        let sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((shutdown, handle)) = sweeper {
            let _ = shutdown.send(true);
            let _ = handle.await;
        }
    }

    /// Removes every expired entry, returning how many were removed
    pub fn clear_expired(&self) -> usize {
        clear_expired(&self.entries, self.expiration)
    }

    /// Number of cached hosts
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CachedRobots>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn cached(&self, key: &str) -> Option<ParsedRobots> {
        self.read()
            .get(key)
            .filter(|entry| !entry.is_expired(self.expiration))
            .map(|entry| entry.content.clone())
    }

    /// Fetches robots.txt; any transport failure means no restrictions
    async fn fetch(&self, robots_url: &str) -> ParsedRobots {
        let response = match self.client.get(robots_url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Failed to fetch {}: {}", robots_url, e);
                return ParsedRobots::AllowAll;
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => ParsedRobots::from_response(status, &body),
            Err(e) => {
                tracing::debug!("Failed to read {}: {}", robots_url, e);
                ParsedRobots::AllowAll
            }
        }
    }
}

fn clear_expired(entries: &Entries, expiration: Duration) -> usize {
    let mut entries = entries.write().unwrap_or_else(|e| e.into_inner());
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(expiration));
    before - entries.len()
}

#[async_trait]
impl RobotsPolicy for RobotsCache {
    async fn is_allowed(&self, uri: &str) -> Result<bool> {
        let url = Url::parse(uri)?;
        let host = url
            .host_str()
            .ok_or_else(|| UrlError::MissingHost(uri.to_string()))?;

        let key = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        let robots = match self.cached(&key) {
            Some(robots) => robots,
            None => {
                let robots = self.fetch(&format!("{}/robots.txt", key)).await;
                self.entries
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key, CachedRobots::new(robots.clone()));
                robots
            }
        };

        Ok(robots.is_allowed(uri, &self.user_agent))
    }
}
