//! Prometheus metrics for the search read path and the indexing write path.
//!
//! All metrics live in a dedicated registry (namespace `search_orchestrator`)
//! and are exported through [`gather_metrics`] for the `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "search_orchestrator";

lazy_static! {
    /// Registry holding every metric this crate emits
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Search request duration in seconds
    ///
    /// Labels: intent, source, status
    pub static ref SEARCH_REQUEST_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "search_request_duration_seconds",
            "Search request duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.15, 0.2, 0.5, 1.0, 2.5]),
        &["intent", "source", "status"]
    ).expect("Failed to create SEARCH_REQUEST_DURATION metric");

    /// Total number of search requests
    ///
    /// Labels: intent, status
    pub static ref SEARCH_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("search_requests_total", "Total number of search requests")
            .namespace(NAMESPACE),
        &["intent", "status"]
    ).expect("Failed to create SEARCH_REQUESTS_TOTAL metric");

    /// Result cache hits
    pub static ref CACHE_HITS: Counter = Counter::with_opts(
        Opts::new("cache_hits_total", "Total number of result cache hits")
            .namespace(NAMESPACE)
    ).expect("Failed to create CACHE_HITS metric");

    /// Result cache misses
    pub static ref CACHE_MISSES: Counter = Counter::with_opts(
        Opts::new("cache_misses_total", "Total number of result cache misses")
            .namespace(NAMESPACE)
    ).expect("Failed to create CACHE_MISSES metric");

    /// Index backend query duration in seconds
    ///
    /// Labels: index, status
    pub static ref INDEX_QUERY_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "index_query_duration_seconds",
            "Primary index query duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.15, 0.2, 0.5, 1.0]),
        &["index", "status"]
    ).expect("Failed to create INDEX_QUERY_DURATION metric");

    /// Analytics store query duration in seconds
    ///
    /// Labels: query_type, status
    pub static ref ANALYTICS_QUERY_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "analytics_query_duration_seconds",
            "Analytics store query duration in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["query_type", "status"]
    ).expect("Failed to create ANALYTICS_QUERY_DURATION metric");

    /// Wall-clock lag between event production and consumption
    pub static ref INDEXING_LAG: Gauge = Gauge::with_opts(
        Opts::new("indexing_lag_seconds", "Current indexing pipeline lag in seconds")
            .namespace(NAMESPACE)
    ).expect("Failed to create INDEXING_LAG metric");

    /// Indexing events processed
    ///
    /// Labels: operation, status
    pub static ref INDEXING_EVENTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("indexing_events_total", "Total number of indexing events processed")
            .namespace(NAMESPACE),
        &["operation", "status"]
    ).expect("Failed to create INDEXING_EVENTS_TOTAL metric");

    /// Circuit breaker state (0=closed, 1=half-open, 2=open)
    ///
    /// Labels: name
    pub static ref CIRCUIT_BREAKER_STATE: GaugeVec = GaugeVec::new(
        Opts::new("circuit_breaker_state", "Circuit breaker state (0=closed, 1=half-open, 2=open)")
            .namespace(NAMESPACE),
        &["name"]
    ).expect("Failed to create CIRCUIT_BREAKER_STATE metric");

    /// Slow queries detected
    ///
    /// Labels: severity, query_type
    pub static ref SLOW_QUERY_TOTAL: CounterVec = CounterVec::new(
        Opts::new("slow_query_total", "Total number of slow queries")
            .namespace(NAMESPACE),
        &["severity", "query_type"]
    ).expect("Failed to create SLOW_QUERY_TOTAL metric");

    /// Fallback chain invocations
    ///
    /// Labels: level
    pub static ref SEARCH_FALLBACK_TOTAL: CounterVec = CounterVec::new(
        Opts::new("search_fallback_total", "Total number of search fallback invocations")
            .namespace(NAMESPACE),
        &["level"]
    ).expect("Failed to create SEARCH_FALLBACK_TOTAL metric");

    /// Background tasks dropped because the async worker pool was full
    pub static ref ASYNC_TASKS_DROPPED: Counter = Counter::with_opts(
        Opts::new("async_tasks_dropped_total", "Background tasks dropped due to a full worker pool")
            .namespace(NAMESPACE)
    ).expect("Failed to create ASYNC_TASKS_DROPPED metric");
}

/// Register all metrics into the registry. Idempotent in practice: a second
/// call returns an AlreadyReg error which callers may ignore.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = &*PROMETHEUS_REGISTRY;

    registry.register(Box::new(SEARCH_REQUEST_DURATION.clone()))?;
    registry.register(Box::new(SEARCH_REQUESTS_TOTAL.clone()))?;
    registry.register(Box::new(CACHE_HITS.clone()))?;
    registry.register(Box::new(CACHE_MISSES.clone()))?;
    registry.register(Box::new(INDEX_QUERY_DURATION.clone()))?;
    registry.register(Box::new(ANALYTICS_QUERY_DURATION.clone()))?;
    registry.register(Box::new(INDEXING_LAG.clone()))?;
    registry.register(Box::new(INDEXING_EVENTS_TOTAL.clone()))?;
    registry.register(Box::new(CIRCUIT_BREAKER_STATE.clone()))?;
    registry.register(Box::new(SLOW_QUERY_TOTAL.clone()))?;
    registry.register(Box::new(SEARCH_FALLBACK_TOTAL.clone()))?;
    registry.register(Box::new(ASYNC_TASKS_DROPPED.clone()))?;

    Ok(())
}

/// Export all registered metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = PROMETHEUS_REGISTRY.gather();
    encoder.encode_to_string(&families).unwrap_or_default()
}
