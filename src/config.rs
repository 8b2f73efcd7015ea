use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Primary index backend configuration
    pub elasticsearch: ElasticsearchConfig,

    /// Result cache configuration
    pub redis: RedisConfig,

    /// Analytics store configuration
    #[serde(default)]
    pub clickhouse: ClickhouseConfig,

    /// Document store configuration
    #[serde(default)]
    pub docstore: DocstoreConfig,

    /// Change-event broker configuration
    pub kafka: KafkaConfig,

    /// Search orchestration tuning
    pub search: SearchSettings,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from embedded defaults, optional file, and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with compiled-in defaults
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: SEARCH_)
            .add_source(
                config::Environment::with_prefix("SEARCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Validate cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.elasticsearch.addresses.is_empty() {
            return Err(config::ConfigError::Message(
                "at least one elasticsearch address required".into(),
            ));
        }
        if self.redis.addresses.is_empty() {
            return Err(config::ConfigError::Message(
                "at least one redis address required".into(),
            ));
        }
        if self.search.default_page_size == 0 {
            return Err(config::ConfigError::Message(
                "default page size must be positive".into(),
            ));
        }
        if self.search.max_page_size == 0 || self.search.max_page_size > 1000 {
            return Err(config::ConfigError::Message(
                "max page size must be between 1 and 1000".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_io_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_io_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent in-flight requests (health and metrics exempt)
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl ServerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    pub addresses: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_es_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_es_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Buffered actions that trigger an immediate bulk flush
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,

    #[serde(default = "default_bulk_flush_interval")]
    pub bulk_flush_interval_secs: u64,

    /// Hard ceiling on the indexing buffer; overflow drops the oldest actions
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Bounded pool for background analytics writes and cache invalidation
    #[serde(default = "default_max_async_workers")]
    pub max_async_workers: usize,
}

impl ElasticsearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn bulk_flush_interval(&self) -> Duration {
        Duration::from_secs(self.bulk_flush_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub addresses: Vec<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default)]
    pub ttl: CacheTtlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_ttl_autocomplete")]
    pub autocomplete_secs: u64,

    #[serde(default = "default_ttl_trending")]
    pub trending_secs: u64,

    #[serde(default = "default_ttl_search_results")]
    pub search_results_secs: u64,

    #[serde(default = "default_ttl_facet_counts")]
    pub facet_counts_secs: u64,

    #[serde(default = "default_ttl_stale_fallback")]
    pub stale_fallback_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            autocomplete_secs: default_ttl_autocomplete(),
            trending_secs: default_ttl_trending(),
            search_results_secs: default_ttl_search_results(),
            facet_counts_secs: default_ttl_facet_counts(),
            stale_fallback_secs: default_ttl_stale_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickhouseConfig {
    #[serde(default = "default_clickhouse_url")]
    pub url: String,

    #[serde(default = "default_clickhouse_database")]
    pub database: String,

    #[serde(default = "default_clickhouse_user")]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl Default for ClickhouseConfig {
    fn default() -> Self {
        Self {
            url: default_clickhouse_url(),
            database: default_clickhouse_database(),
            username: default_clickhouse_user(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocstoreConfig {
    /// Empty base URL disables the document store (and hydration with it)
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_docstore_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_docstore_batch")]
    pub max_batch_size: usize,

    #[serde(default = "default_docstore_collection")]
    pub collection: String,
}

impl Default for DocstoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_ms: default_docstore_timeout_ms(),
            max_batch_size: default_docstore_batch(),
            collection: default_docstore_collection(),
        }
    }
}

impl DocstoreConfig {
    pub fn enabled(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,

    #[serde(default = "default_topic_changes")]
    pub topic_changes: String,

    #[serde(default = "default_topic_dlq")]
    pub topic_dlq: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Total handler attempts per message before the DLQ takes it
    #[serde(default = "default_kafka_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub slow_query: SlowQuerySettings,
}

impl SearchSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_breaker_timeout")]
    pub timeout_secs: u64,

    /// Probe calls admitted while half-open
    #[serde(default = "default_breaker_max_requests")]
    pub max_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout_secs: default_breaker_timeout(),
            max_requests: default_breaker_max_requests(),
        }
    }
}

impl CircuitBreakerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_initial_wait_ms")]
    pub initial_wait_ms: u64,

    #[serde(default = "default_retry_max_wait_ms")]
    pub max_wait_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_wait_ms: default_retry_initial_wait_ms(),
            max_wait_ms: default_retry_max_wait_ms(),
            multiplier: default_retry_multiplier(),
        }
    }
}

impl RetrySettings {
    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowQuerySettings {
    #[serde(default = "default_slow_warning_ms")]
    pub warning_ms: u64,

    #[serde(default = "default_slow_critical_ms")]
    pub critical_ms: u64,
}

impl Default for SlowQuerySettings {
    fn default() -> Self {
        Self {
            warning_ms: default_slow_warning_ms(),
            critical_ms: default_slow_critical_ms(),
        }
    }
}

impl SlowQuerySettings {
    pub fn warning(&self) -> Duration {
        Duration::from_millis(self.warning_ms)
    }

    pub fn critical(&self) -> Duration {
        Duration::from_millis(self.critical_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_io_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_in_flight() -> usize {
    1000
}

fn default_es_max_retries() -> u32 {
    3
}

fn default_es_request_timeout_ms() -> u64 {
    150
}

fn default_index_prefix() -> String {
    "search".to_string()
}

fn default_bulk_size() -> usize {
    5000
}

fn default_bulk_flush_interval() -> u64 {
    5
}

fn default_max_buffer_size() -> usize {
    50_000
}

fn default_max_async_workers() -> usize {
    128
}

fn default_pool_size() -> u32 {
    100
}

fn default_ttl_autocomplete() -> u64 {
    600
}

fn default_ttl_trending() -> u64 {
    60
}

fn default_ttl_search_results() -> u64 {
    120
}

fn default_ttl_facet_counts() -> u64 {
    300
}

fn default_ttl_stale_fallback() -> u64 {
    3600
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "search_analytics".to_string()
}

fn default_clickhouse_user() -> String {
    "default".to_string()
}

fn default_docstore_timeout_ms() -> u64 {
    2000
}

fn default_docstore_batch() -> usize {
    100
}

fn default_docstore_collection() -> String {
    "documents".to_string()
}

fn default_topic_changes() -> String {
    "docs.changes".to_string()
}

fn default_topic_dlq() -> String {
    "docs.changes.dlq".to_string()
}

fn default_consumer_group() -> String {
    "search-indexer".to_string()
}

fn default_kafka_max_retries() -> u32 {
    3
}

fn default_page_size() -> usize {
    20
}

fn default_max_page_size() -> usize {
    100
}

fn default_query_timeout_ms() -> u64 {
    200
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout() -> u64 {
    30
}

fn default_breaker_max_requests() -> u32 {
    100
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_initial_wait_ms() -> u64 {
    50
}

fn default_retry_max_wait_ms() -> u64 {
    500
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_slow_warning_ms() -> u64 {
    200
}

fn default_slow_critical_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "search-orchestrator".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.search.default_page_size, 20);
        assert_eq!(cfg.search.max_page_size, 100);
        assert_eq!(cfg.search.query_timeout(), Duration::from_millis(200));
        assert_eq!(cfg.elasticsearch.index_prefix, "search");
        assert_eq!(cfg.elasticsearch.bulk_size, 5000);
        assert_eq!(cfg.elasticsearch.max_buffer_size, 50_000);
        assert_eq!(cfg.redis.ttl.stale_fallback_secs, 3600);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_backends() {
        let mut cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        cfg.elasticsearch.addresses.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_docstore_disabled_by_default() {
        let cfg = DocstoreConfig::default();
        assert!(!cfg.enabled());
    }

    #[test]
    fn test_default_tuning_values() {
        let retry = RetrySettings::default();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.initial_wait(), Duration::from_millis(50));
        assert_eq!(retry.max_wait(), Duration::from_millis(500));

        let breaker = CircuitBreakerSettings::default();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.max_requests, 100);

        let slow = SlowQuerySettings::default();
        assert_eq!(slow.warning(), Duration::from_millis(200));
        assert_eq!(slow.critical(), Duration::from_millis(500));
    }
}
