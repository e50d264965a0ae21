use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Bloom persistence interval used when a filter does not set its own (seconds)
    #[serde(
        rename = "default-save-interval-secs",
        default = "default_save_interval_secs"
    )]
    pub default_save_interval_secs: u64,

    #[serde(rename = "http-client", default)]
    pub http_client: HttpClientConfig,

    #[serde(default)]
    pub robots: RobotsConfig,

    #[serde(rename = "persistent-map", default)]
    pub persistent_map: PersistentMapConfig,

    #[serde(rename = "resource", default)]
    pub resources: Vec<ResourceConfig>,

    #[serde(rename = "worker", default)]
    pub stages: Vec<WorkerConfig>,
}

impl Config {
    /// Looks up a resource definition by name
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name() == name)
    }
}

fn default_save_interval_secs() -> u64 {
    120
}

/// Worker pool defaults
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// When false, resources are built but no worker is started
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Executor count for worker-managed stages that do not set `count`
    #[serde(rename = "worker-counts", default = "default_worker_counts")]
    pub worker_counts: usize,

    /// How long `stop` waits for each executor (milliseconds)
    #[serde(rename = "termination-grace-ms", default = "default_grace_ms")]
    pub termination_grace_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_counts: default_worker_counts(),
            termination_grace_ms: default_grace_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_worker_counts() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 8
}

fn default_grace_ms() -> u64 {
    2000
}

/// HTTP client settings for the fetch stage
#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    #[serde(rename = "timeout-secs", default = "default_http_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Additional attempts after the first failure
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    "delver".to_string()
}

fn default_max_retries() -> u32 {
    1
}

/// Robots.txt cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct RobotsConfig {
    /// Lifetime of a cached robots.txt (seconds)
    #[serde(rename = "expiration-secs", default = "default_hour")]
    pub expiration_secs: u64,

    /// Interval between sweeps of expired entries (seconds)
    #[serde(rename = "clear-expired-delay-secs", default = "default_hour")]
    pub clear_expired_delay_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            expiration_secs: default_hour(),
            clear_expired_delay_secs: default_hour(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_hour() -> u64 {
    3600
}

/// Compaction and read settings shared by every persistent map shard
#[derive(Debug, Clone, Deserialize)]
pub struct PersistentMapConfig {
    #[serde(rename = "gc-interval-secs", default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Free-page ratio at which a compaction pass rewrites the file
    #[serde(rename = "gc-discard-ratio", default = "default_gc_discard_ratio")]
    pub gc_discard_ratio: f64,

    /// Consecutive compaction failures after which the loop stops
    #[serde(rename = "gc-err-threshold", default = "default_gc_err_threshold")]
    pub gc_err_threshold: u32,

    /// Rows read per page while iterating
    #[serde(rename = "default-prefetch-size", default = "default_prefetch_size")]
    pub default_prefetch_size: usize,
}

impl Default for PersistentMapConfig {
    fn default() -> Self {
        Self {
            gc_interval_secs: default_gc_interval_secs(),
            gc_discard_ratio: default_gc_discard_ratio(),
            gc_err_threshold: default_gc_err_threshold(),
            default_prefetch_size: default_prefetch_size(),
        }
    }
}

fn default_gc_interval_secs() -> u64 {
    300
}

fn default_gc_discard_ratio() -> f64 {
    0.7
}

fn default_gc_err_threshold() -> u32 {
    2
}

fn default_prefetch_size() -> usize {
    100
}

/// A named resource shared between workers
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResourceConfig {
    FileQueue(FileQueueConfig),
    ChannelQueue(ChannelQueueConfig),
    TimerQueue(TimerQueueConfig),
    BloomFilter(BloomFilterConfig),
    RollingBloomFilter(RollingBloomFilterConfig),
    PersistentMap(PathResourceConfig),
    MultiHostMap(PathResourceConfig),
    FilesystemObjectStore(PathResourceConfig),
}

impl ResourceConfig {
    /// The unique name workers use to refer to this resource
    pub fn name(&self) -> &str {
        match self {
            ResourceConfig::FileQueue(c) => &c.name,
            ResourceConfig::ChannelQueue(c) => &c.name,
            ResourceConfig::TimerQueue(c) => &c.name,
            ResourceConfig::BloomFilter(c) => &c.name,
            ResourceConfig::RollingBloomFilter(c) => &c.name,
            ResourceConfig::PersistentMap(c)
            | ResourceConfig::MultiHostMap(c)
            | ResourceConfig::FilesystemObjectStore(c) => &c.name,
        }
    }

    /// The `type` tag of this resource
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceConfig::FileQueue(_) => "file-queue",
            ResourceConfig::ChannelQueue(_) => "channel-queue",
            ResourceConfig::TimerQueue(_) => "timer-queue",
            ResourceConfig::BloomFilter(_) => "bloom-filter",
            ResourceConfig::RollingBloomFilter(_) => "rolling-bloom-filter",
            ResourceConfig::PersistentMap(_) => "persistent-map",
            ResourceConfig::MultiHostMap(_) => "multi-host-map",
            ResourceConfig::FilesystemObjectStore(_) => "filesystem-object-store",
        }
    }

    /// Returns true for every queue flavour
    pub fn is_queue(&self) -> bool {
        matches!(
            self,
            ResourceConfig::FileQueue(_)
                | ResourceConfig::ChannelQueue(_)
                | ResourceConfig::TimerQueue(_)
        )
    }

    /// Returns true for single and rolling bloom filters
    pub fn is_bloom(&self) -> bool {
        matches!(
            self,
            ResourceConfig::BloomFilter(_) | ResourceConfig::RollingBloomFilter(_)
        )
    }
}

/// Durable file queue settings
#[derive(Debug, Clone, Deserialize)]
pub struct FileQueueConfig {
    pub name: String,

    /// Directory holding queue entries
    pub path: String,

    /// Directory receiving malformed entries (defaults to `<path>-dlq`)
    #[serde(rename = "dlq-path", default)]
    pub dlq_path: Option<String>,

    /// Upper bound of the randomized poll delay (milliseconds)
    #[serde(rename = "max-poll-delay-ms", default = "default_max_poll_delay_ms")]
    pub max_poll_delay_ms: u64,

    /// Log and skip malformed entries instead of exiting
    #[serde(default)]
    pub resilient: bool,
}

fn default_max_poll_delay_ms() -> u64 {
    500
}

/// In-memory queue settings
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelQueueConfig {
    pub name: String,

    #[serde(default = "default_channel_capacity")]
    pub capacity: usize,
}

fn default_channel_capacity() -> usize {
    1024
}

/// Periodic timer queue settings
#[derive(Debug, Clone, Deserialize)]
pub struct TimerQueueConfig {
    pub name: String,

    #[serde(rename = "interval-ms")]
    pub interval_ms: u64,
}

/// Single-generation bloom filter settings
#[derive(Debug, Clone, Deserialize)]
pub struct BloomFilterConfig {
    pub name: String,

    /// Persistence file; loaded at startup when present
    #[serde(default)]
    pub path: Option<String>,

    /// Capacity before the filter reports overflow
    #[serde(rename = "max-n")]
    pub max_n: u64,

    /// Target false-positive rate
    pub p: f64,

    #[serde(rename = "save-interval-secs", default)]
    pub save_interval_secs: Option<u64>,
}

/// Rolling bloom filter settings
#[derive(Debug, Clone, Deserialize)]
pub struct RollingBloomFilterConfig {
    pub name: String,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(rename = "max-n")]
    pub max_n: u64,

    pub p: f64,

    /// Number of live generations
    #[serde(default = "default_bloom_count")]
    pub count: usize,

    #[serde(rename = "save-interval-secs", default)]
    pub save_interval_secs: Option<u64>,
}

fn default_bloom_count() -> usize {
    3
}

/// Resources described by nothing more than a location on disk
#[derive(Debug, Clone, Deserialize)]
pub struct PathResourceConfig {
    pub name: String,
    pub path: String,
}

/// How a stage's executors are fed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManagerKind {
    /// Drain the configured inbox queue
    #[default]
    Worker,
    /// Run on a timer
    Job,
}

/// One pipeline stage
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub name: String,

    #[serde(default)]
    pub manager: ManagerKind,

    /// Executor count; defaults to `workers.worker-counts` (or 1 for jobs)
    #[serde(default)]
    pub count: Option<usize>,

    /// Inbox queue resource (worker manager only)
    #[serde(default)]
    pub inbox: Option<String>,

    /// Queue resources receiving the stage's output
    #[serde(default)]
    pub outbox: Vec<String>,

    /// Tick interval (job manager only)
    #[serde(rename = "interval-ms", default)]
    pub interval_ms: Option<u64>,

    #[serde(flatten)]
    pub kind: WorkerKind,
}

/// Closed set of stage implementations, selected by `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerKind {
    HttpFetcher(ObjectStoreStageConfig),
    LinkExtractor(ObjectStoreStageConfig),
    DfsAccumulator(AccumulatorConfig),
    DfsPublisher(PublisherConfig),
    FixedSeedPublisher(SeedConfig),
}

impl WorkerKind {
    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            WorkerKind::HttpFetcher(_) => "http-fetcher",
            WorkerKind::LinkExtractor(_) => "link-extractor",
            WorkerKind::DfsAccumulator(_) => "dfs-accumulator",
            WorkerKind::DfsPublisher(_) => "dfs-publisher",
            WorkerKind::FixedSeedPublisher(_) => "fixed-seed-publisher",
        }
    }
}

/// Stages that read or write fetched bodies
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreStageConfig {
    #[serde(rename = "object-store")]
    pub object_store: String,
}

/// Depth-first accumulator settings
#[derive(Debug, Clone, Deserialize)]
pub struct AccumulatorConfig {
    /// Bloom filter resource tracking visited URIs
    pub bloom: String,

    /// Multi-host map resource receiving cross-domain discoveries
    #[serde(rename = "url-store")]
    pub url_store: String,

    #[serde(rename = "max-depth")]
    pub max_depth: u32,
}

/// Frontier refill settings
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Multi-host map resource holding deferred discoveries
    #[serde(rename = "url-store")]
    pub url_store: String,

    /// Persistent map resource recording drained hosts
    #[serde(rename = "visited-hosts")]
    pub visited_hosts: String,

    /// Fetch-input queue that is watched and refilled
    pub queue: String,

    /// How long the queue must stay empty before a refill (seconds)
    #[serde(rename = "rotate-after-secs")]
    pub rotate_after_secs: u64,

    /// Hosts drained per refill
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Filter refilled URIs through robots.txt
    #[serde(rename = "respect-robots", default = "default_true")]
    pub respect_robots: bool,
}

fn default_batch_size() -> usize {
    1
}

/// Seed list for the fixed seed publisher
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub seeds: Vec<String>,
}
