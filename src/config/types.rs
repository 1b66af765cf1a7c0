use serde::Deserialize;

/// Main configuration structure for Gleaner
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub source: SourceConfig,
    pub rotator: RotatorConfig,
    pub output: OutputConfig,
    pub delivery: Option<DeliveryConfig>,
}

/// Crawl loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of queued entities handed to the harvester at once
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Posts inspected per entity and time filter
    #[serde(rename = "posts-per-entity", default = "default_posts_per_entity")]
    pub posts_per_entity: usize,

    /// Time filters used for the `top` listing of each entity
    #[serde(rename = "time-filters", default = "default_time_filters")]
    pub time_filters: Vec<String>,

    /// Search terms for the keyword discovery phase
    #[serde(rename = "search-terms", default)]
    pub search_terms: Vec<String>,

    /// Pages fetched per search term
    #[serde(rename = "search-pages", default = "default_search_pages")]
    pub search_pages: u32,

    /// Pages fetched from the popular and new listings
    #[serde(rename = "listing-pages", default = "default_listing_pages")]
    pub listing_pages: u32,

    /// Maximum entities whose sidebars are explored per run
    #[serde(rename = "related-limit", default = "default_related_limit")]
    pub related_limit: usize,

    /// Rotate the outbound identity after this many posts (0 disables)
    #[serde(rename = "rotate-after-posts", default)]
    pub rotate_after_posts: usize,
}

/// Entity acceptance rules applied to discovery results
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Only accept entities flagged as adult/restricted content
    #[serde(rename = "adult-only", default)]
    pub adult_only: bool,

    /// Accept entities with restricted visibility
    #[serde(rename = "include-restricted", default = "default_true")]
    pub include_restricted: bool,
}

/// Dedup store persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Entity operations between automatic saves
    #[serde(rename = "persist-interval", default = "default_persist_interval")]
    pub persist_interval: usize,
}

/// Export batching configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Maximum identities per chunk file
    #[serde(rename = "chunk-size", default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pending identities required before a non-forced export runs
    #[serde(default = "default_chunk_size")]
    pub threshold: usize,
}

/// Retry budgets for the recovery controller
#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Rotations allowed while fetching an entity's primary post listing
    #[serde(rename = "listing-rotations", default = "default_listing_rotations")]
    pub listing_rotations: u32,

    /// Rotations allowed while fetching a fallback post listing
    #[serde(rename = "fallback-rotations", default = "default_fallback_rotations")]
    pub fallback_rotations: u32,

    /// Rotations allowed while fetching a single post's comments
    #[serde(rename = "item-rotations", default = "default_item_rotations")]
    pub item_rotations: u32,

    /// Rotations allowed while fetching one discovery page
    #[serde(rename = "discovery-rotations", default = "default_discovery_rotations")]
    pub discovery_rotations: u32,

    /// Consecutive rotations without a new address before a phase is aborted
    #[serde(rename = "max-failed-rotations", default = "default_listing_rotations")]
    pub max_failed_rotations: u32,

    /// In-place retries for transient failures
    #[serde(rename = "transient-retries", default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Lower bound of the randomized transient backoff (milliseconds)
    #[serde(rename = "backoff-min-ms", default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,

    /// Upper bound of the randomized transient backoff (milliseconds)
    #[serde(rename = "backoff-max-ms", default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

/// Remote source client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the listing endpoints
    #[serde(rename = "base-url", default = "default_base_url")]
    pub base_url: String,

    /// Minimum delay between requests (milliseconds)
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agents to pick from; a new one is chosen on every rotation
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

/// Outbound identity rotation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RotatorConfig {
    /// Proxy all remote traffic goes through
    #[serde(rename = "proxy-url")]
    pub proxy_url: String,

    /// Endpoint echoing the caller's public address as `{"origin": "..."}`
    #[serde(rename = "ip-check-url", default = "default_ip_check_url")]
    pub ip_check_url: String,

    /// Command (argv) that makes the proxy obtain a new address
    #[serde(rename = "restart-command", default)]
    pub restart_command: Vec<String>,

    /// Seconds to wait after the restart command before probing
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Seconds to wait for the proxy to answer address checks again
    #[serde(rename = "health-timeout-secs", default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding dedup state, the checkpoint and exported chunks
    #[serde(rename = "data-dir")]
    pub data_dir: String,

    /// Path to the markdown run summary
    #[serde(rename = "summary-path")]
    pub summary_path: String,
}

/// Remote delivery target for exported chunks
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    pub host: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub user: String,

    #[serde(rename = "key-path")]
    pub key_path: Option<String>,

    #[serde(rename = "remote-dir", default = "default_remote_dir")]
    pub remote_dir: String,
}

impl DeliveryConfig {
    /// Delivery needs at least a host and a user
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty() && !self.user.is_empty()
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            adult_only: false,
            include_restricted: true,
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            persist_interval: default_persist_interval(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            threshold: default_chunk_size(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            listing_rotations: default_listing_rotations(),
            fallback_rotations: default_fallback_rotations(),
            item_rotations: default_item_rotations(),
            discovery_rotations: default_discovery_rotations(),
            max_failed_rotations: default_listing_rotations(),
            transient_retries: default_transient_retries(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_timeout_secs(),
            user_agents: default_user_agents(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

fn default_posts_per_entity() -> usize {
    500
}

fn default_time_filters() -> Vec<String> {
    vec!["all".to_string(), "year".to_string()]
}

fn default_search_pages() -> u32 {
    5
}

fn default_listing_pages() -> u32 {
    10
}

fn default_related_limit() -> usize {
    200
}

fn default_persist_interval() -> usize {
    100
}

fn default_chunk_size() -> usize {
    5000
}

fn default_listing_rotations() -> u32 {
    5
}

fn default_fallback_rotations() -> u32 {
    3
}

fn default_item_rotations() -> u32 {
    8
}

fn default_discovery_rotations() -> u32 {
    10
}

fn default_transient_retries() -> u32 {
    3
}

fn default_backoff_min_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    2000
}

fn default_base_url() -> String {
    "https://old.reddit.com".to_string()
}

fn default_request_delay_ms() -> u64 {
    3000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
    ]
}

fn default_ip_check_url() -> String {
    "https://httpbin.org/ip".to_string()
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_health_timeout_secs() -> u64 {
    60
}

fn default_ssh_port() -> u16 {
    22
}

fn default_remote_dir() -> String {
    "/data/users".to_string()
}
