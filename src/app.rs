//! Application assembly
//!
//! Builds every configured resource, then every stage with its manager, and
//! drives their lifecycle: prepare and start, wait for ctrl-c, stop and close.

use crate::bloom::{Bloom, RollingBloomFilter, SharedBloomFilter};
use crate::config::{validation, Config, ManagerKind, ResourceConfig, WorkerConfig, WorkerKind};
use crate::extractor::LinkExtractor;
use crate::fetcher::{build_http_client, HttpFetcher};
use crate::frontier::{DfsAccumulator, DfsPublisher, FixedSeedPublisher};
use crate::maps::{KvMap, MapSettings, MultiHostMap, PersistentMap};
use crate::objectstore::{FilesystemObjectStore, ObjectStore};
use crate::queue::{ChannelQueue, FileQueue, Queue, TimerQueue};
use crate::robots::{AllowAll, RobotsCache, RobotsPolicy};
use crate::worker::{JobManager, Manager, Worker, WorkerManager};
use crate::{FrontierError, Result};
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A built resource, resolved by name when stages are wired
pub enum Resource {
    Queue(Arc<dyn Queue>),
    Bloom {
        filter: Arc<SharedBloomFilter>,
        save_interval: Duration,
    },
    RollingBloom {
        filter: Arc<RollingBloomFilter>,
        save_interval: Duration,
    },
    PersistentMap(Arc<PersistentMap>),
    MultiHostMap(Arc<MultiHostMap>),
    ObjectStore(Arc<dyn ObjectStore>),
}

impl Resource {
    /// Builds one resource from its definition
    ///
    /// # Arguments
    ///
    /// * `config` - The resource definition
    /// * `settings` - Tuning for persistent maps
    /// * `default_save_interval` - Bloom save interval when the definition sets none
    pub fn build(
        config: &ResourceConfig,
        settings: MapSettings,
        default_save_interval: Duration,
    ) -> Result<Self> {
        let save_interval = |secs: Option<u64>| {
            secs.map(Duration::from_secs)
                .unwrap_or(default_save_interval)
        };

        let resource = match config {
            ResourceConfig::FileQueue(c) => Resource::Queue(Arc::new(FileQueue::new(
                &c.name,
                &c.path,
                c.dlq_path.as_ref().map(PathBuf::from),
                Duration::from_millis(c.max_poll_delay_ms),
                c.resilient,
            )?)),
            ResourceConfig::ChannelQueue(c) => {
                Resource::Queue(Arc::new(ChannelQueue::new(&c.name, c.capacity)))
            }
            ResourceConfig::TimerQueue(c) => Resource::Queue(Arc::new(TimerQueue::new(
                &c.name,
                Duration::from_millis(c.interval_ms),
            ))),
            ResourceConfig::BloomFilter(c) => Resource::Bloom {
                filter: Arc::new(SharedBloomFilter::open(
                    c.max_n,
                    c.p,
                    c.path.as_ref().map(PathBuf::from),
                )?),
                save_interval: save_interval(c.save_interval_secs),
            },
            ResourceConfig::RollingBloomFilter(c) => Resource::RollingBloom {
                filter: Arc::new(RollingBloomFilter::open(
                    c.max_n,
                    c.p,
                    c.count,
                    c.path.as_ref().map(PathBuf::from),
                )?),
                save_interval: save_interval(c.save_interval_secs),
            },
            ResourceConfig::PersistentMap(c) => {
                Resource::PersistentMap(Arc::new(PersistentMap::open(Path::new(&c.path), settings)?))
            }
            ResourceConfig::MultiHostMap(c) => {
                Resource::MultiHostMap(Arc::new(MultiHostMap::open(Path::new(&c.path), settings)?))
            }
            ResourceConfig::FilesystemObjectStore(c) => Resource::ObjectStore(Arc::new(
                FilesystemObjectStore::new(Path::new(&c.path))?,
            )),
        };

        Ok(resource)
    }
}

/// Every resource and stage of one configuration
pub struct Application {
    resources: BTreeMap<String, Resource>,
    managers: Vec<Box<dyn Manager>>,
    robots: Option<Arc<RobotsCache>>,
    workers_enabled: bool,
}

impl Application {
    /// Builds the application described by `config`
    ///
    /// Resources are created (directories, files and databases included) but
    /// nothing runs until [`Application::start`].
    ///
    /// # Returns
    ///
    /// * `Ok(Application)` - All resources and stages resolved
    /// * `Err(FrontierError)` - Invalid configuration or a resource failed to open
    pub fn from_config(config: &Config) -> Result<Self> {
        validation::validate(config)?;

        let settings = MapSettings::from(&config.persistent_map);
        let default_save_interval = Duration::from_secs(config.default_save_interval_secs);

        let mut resources = BTreeMap::new();
        for resource in &config.resources {
            tracing::debug!("Building {} {}", resource.kind(), resource.name());
            resources.insert(
                resource.name().to_string(),
                Resource::build(resource, settings, default_save_interval)?,
            );
        }

        let mut app = Self {
            resources,
            managers: Vec::new(),
            robots: None,
            workers_enabled: config.workers.enabled,
        };

        let mut client: Option<Client> = None;
        for stage in &config.stages {
            let manager = app.build_stage(config, stage, &mut client)?;
            app.managers.push(manager);
        }

        Ok(app)
    }

    fn build_stage(
        &mut self,
        config: &Config,
        stage: &WorkerConfig,
        client: &mut Option<Client>,
    ) -> Result<Box<dyn Manager>> {
        let worker: Arc<dyn Worker> = match &stage.kind {
            WorkerKind::HttpFetcher(c) => Arc::new(HttpFetcher::new(
                shared_client(client, config)?,
                self.object_store(&c.object_store)?,
                config.http_client.max_retries,
            )),
            WorkerKind::LinkExtractor(c) => {
                Arc::new(LinkExtractor::new(self.object_store(&c.object_store)?))
            }
            WorkerKind::DfsAccumulator(c) => Arc::new(DfsAccumulator::new(
                self.bloom(&c.bloom)?,
                self.multi_host_map(&c.url_store)?,
                c.max_depth,
            )),
            WorkerKind::DfsPublisher(c) => {
                let robots: Arc<dyn RobotsPolicy> = if c.respect_robots {
                    self.robots_cache(client, config)?
                } else {
                    Arc::new(AllowAll)
                };

                Arc::new(DfsPublisher::new(
                    self.queue(&c.queue)?,
                    self.multi_host_map(&c.url_store)?,
                    self.persistent_map(&c.visited_hosts)?,
                    robots,
                    Duration::from_secs(c.rotate_after_secs),
                    c.batch_size,
                ))
            }
            WorkerKind::FixedSeedPublisher(c) => Arc::new(FixedSeedPublisher::new(c.seeds.clone())),
        };

        let outboxes = stage
            .outbox
            .iter()
            .map(|name| self.queue(name))
            .collect::<Result<Vec<_>>>()?;
        let grace = Duration::from_millis(config.workers.termination_grace_ms);

        tracing::debug!(
            "Wiring {} ({}) with {} outbox(es)",
            stage.name,
            stage.kind.label(),
            outboxes.len()
        );

        let manager: Box<dyn Manager> = match stage.manager {
            ManagerKind::Worker => {
                let inbox_name = stage.inbox.as_deref().ok_or_else(|| {
                    FrontierError::UnknownResource(format!("inbox of {}", stage.name))
                })?;
                Box::new(WorkerManager::new(
                    &stage.name,
                    worker,
                    self.queue(inbox_name)?,
                    outboxes,
                    stage.count.unwrap_or(config.workers.worker_counts),
                    grace,
                ))
            }
            ManagerKind::Job => {
                let interval = stage.interval_ms.ok_or_else(|| {
                    FrontierError::UnknownResource(format!("interval of {}", stage.name))
                })?;
                Box::new(JobManager::new(
                    &stage.name,
                    worker,
                    Duration::from_millis(interval),
                    outboxes,
                    stage.count.unwrap_or(1),
                    grace,
                ))
            }
        };

        Ok(manager)
    }

    fn robots_cache(
        &mut self,
        client: &mut Option<Client>,
        config: &Config,
    ) -> Result<Arc<dyn RobotsPolicy>> {
        if let Some(robots) = &self.robots {
            return Ok(robots.clone());
        }

        let robots = Arc::new(RobotsCache::new(
            shared_client(client, config)?,
            &config.robots,
        ));
        self.robots = Some(robots.clone());
        Ok(robots)
    }

    fn resource(&self, name: &str) -> Result<&Resource> {
        self.resources
            .get(name)
            .ok_or_else(|| FrontierError::UnknownResource(name.to_string()))
    }

    fn wrong_kind(name: &str, expected: &str) -> FrontierError {
        FrontierError::UnknownResource(format!("{} is not a {}", name, expected))
    }

    /// Resolves a queue resource
    pub fn queue(&self, name: &str) -> Result<Arc<dyn Queue>> {
        match self.resource(name)? {
            Resource::Queue(queue) => Ok(queue.clone()),
            _ => Err(Self::wrong_kind(name, "queue")),
        }
    }

    /// Resolves a bloom filter resource, single or rolling
    pub fn bloom(&self, name: &str) -> Result<Arc<dyn Bloom>> {
        match self.resource(name)? {
            Resource::Bloom { filter, .. } => Ok(filter.clone()),
            Resource::RollingBloom { filter, .. } => Ok(filter.clone()),
            _ => Err(Self::wrong_kind(name, "bloom filter")),
        }
    }

    pub fn persistent_map(&self, name: &str) -> Result<Arc<PersistentMap>> {
        match self.resource(name)? {
            Resource::PersistentMap(map) => Ok(map.clone()),
            _ => Err(Self::wrong_kind(name, "persistent map")),
        }
    }

    pub fn multi_host_map(&self, name: &str) -> Result<Arc<MultiHostMap>> {
        match self.resource(name)? {
            Resource::MultiHostMap(map) => Ok(map.clone()),
            _ => Err(Self::wrong_kind(name, "multi-host map")),
        }
    }

    pub fn object_store(&self, name: &str) -> Result<Arc<dyn ObjectStore>> {
        match self.resource(name)? {
            Resource::ObjectStore(store) => Ok(store.clone()),
            _ => Err(Self::wrong_kind(name, "object store")),
        }
    }

    /// The stage managers in configuration order
    pub fn managers(&self) -> &[Box<dyn Manager>] {
        &self.managers
    }

    /// Recovers and starts queues, starts background persistence and, when
    /// workers are enabled, every manager. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        for (name, resource) in &self.resources {
            match resource {
                Resource::Queue(queue) => {
                    queue.prepare()?;
                    queue.start()?;
                }
                Resource::Bloom {
                    filter,
                    save_interval,
                } => filter.start_saving(*save_interval),
                Resource::RollingBloom {
                    filter,
                    save_interval,
                } => filter.start_saving(*save_interval),
                Resource::PersistentMap(map) => map.start_gc(),
                Resource::MultiHostMap(_) | Resource::ObjectStore(_) => {}
            }
            tracing::debug!("Started resource {}", name);
        }

        if let Some(robots) = &self.robots {
            robots.start();
        }

        if !self.workers_enabled {
            tracing::warn!("Workers are disabled; only resources were started");
            return Ok(());
        }

        for manager in &self.managers {
            manager.start()?;
        }

        tracing::info!(
            "Started {} resource(s) and {} stage(s)",
            self.resources.len(),
            self.managers.len()
        );
        Ok(())
    }

    /// Stops every manager, then every queue, then closes filters and maps
    ///
    /// Close failures do not stop the shutdown; they are returned together.
    pub async fn shutdown(&self) -> Result<()> {
        for manager in &self.managers {
            manager.stop().await;
        }

        if let Some(robots) = &self.robots {
            robots.stop().await;
        }

        let mut errors = Vec::new();
        for (name, resource) in &self.resources {
            let closed = match resource {
                Resource::Queue(queue) => {
                    queue.stop().await;
                    Ok(())
                }
                Resource::Bloom { filter, .. } => filter.close().map_err(FrontierError::from),
                Resource::RollingBloom { filter, .. } => {
                    filter.close().map_err(FrontierError::from)
                }
                Resource::PersistentMap(map) => map.close().map_err(FrontierError::from),
                Resource::MultiHostMap(map) => map.close().map_err(FrontierError::from),
                Resource::ObjectStore(_) => Ok(()),
            };

            if let Err(e) = closed {
                tracing::error!("Failed to close {}: {}", name, e);
                errors.push(e);
            }
        }

        tracing::info!("Shutdown complete");
        FrontierError::collect(errors)
    }

    /// Starts everything, runs until ctrl-c, then shuts down
    pub async fn run(&self) -> Result<()> {
        self.start()?;

        tracing::info!("Running; press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Interrupt received, shutting down");

        self.shutdown().await
    }
}

fn shared_client(client: &mut Option<Client>, config: &Config) -> Result<Client> {
    if let Some(client) = client {
        return Ok(client.clone());
    }

    let built = build_http_client(&config.http_client)?;
    *client = Some(built.clone());
    Ok(built)
}
