//! Backend capability traits and their concrete clients.
//!
//! Each backend is exposed to the orchestrator through a narrow capability
//! trait. A backend that fails to configure at startup simply removes its
//! capability; the orchestrator branches on the missing capability to degrade
//! cleanly instead of erroring.

pub mod clickhouse;
pub mod docstore;
pub mod elasticsearch;

use crate::error::Result;
use crate::models::{ChangeEvent, Facet, IndexAction, SearchResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Outcome of one query against the primary index
#[derive(Debug, Clone, Default)]
pub struct IndexSearchOutcome {
    pub hits: Vec<SearchResult>,
    pub total: i64,
    pub took_ms: i64,
    pub shards_hit: usize,
    pub timed_out: bool,
    /// First phrase-suggester option, when the index proposed one
    pub spell_correct: Option<String>,
}

/// Outcome of an aggregation against the analytics store
#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    pub facets: HashMap<String, Vec<Facet>>,
    pub total: i64,
    pub took_ms: i64,
}

/// Read capability of the primary index
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Execute a query document against an index expression
    async fn search(&self, index: &str, query: &Value) -> Result<IndexSearchOutcome>;

    /// Execute a completion-suggest document, returning suggestion texts
    async fn suggest(&self, index: &str, query: &Value) -> Result<Vec<String>>;
}

/// Write capability of the primary index
#[async_trait]
pub trait BulkIndexer: Send + Sync {
    /// Submit a batch of index/delete actions in one bulk request
    async fn bulk_index(&self, actions: &[IndexAction]) -> Result<()>;

    /// Resolve the target index for a document type and region
    fn resolve_index(&self, doc_type: &str, region: &str) -> String;
}

/// Read/write capability of the columnar analytics store
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn query_facets(
        &self,
        category: &str,
        filters: &HashMap<String, Value>,
    ) -> Result<AggregationOutcome>;

    async fn query_analytics(
        &self,
        text: &str,
        filters: &HashMap<String, Value>,
    ) -> Result<AggregationOutcome>;

    /// Very simple popularity-ordered match used by the degraded read tier
    async fn fallback_search(&self, text: &str, limit: usize) -> Result<Vec<SearchResult>>;

    /// Record a document change in the analytics changelog
    async fn insert_document_event(&self, event: &ChangeEvent) -> Result<()>;
}

/// Batched lookup capability of the source-of-truth document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one batch of documents by id; the caller controls batch sizing
    async fn get_batch(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Map<String, Value>>>;
}

/// Liveness probe for a backend component
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<()>;
}
