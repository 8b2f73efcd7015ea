//! HTTP client for the primary inverted index.
//!
//! Every search call runs inside `CircuitBreaker(Retry(execute))`; failures
//! surface as `BackendUnavailable` so the orchestrator's fallback chain can
//! take over.

use crate::backends::{BulkIndexer, IndexSearchOutcome, SearchIndex};
use crate::config::{ElasticsearchConfig, SearchSettings};
use crate::error::{AppError, Result};
use crate::models::{IndexAction, IndexActionType, SearchResult};
use crate::observability::metrics::INDEX_QUERY_DURATION;
use crate::resilience::{retry, BreakerError, CircuitBreaker, RetryError};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct ElasticsearchClient {
    client: reqwest::Client,
    base_url: String,
    index_prefix: String,
    breaker: CircuitBreaker,
    retry_cfg: crate::config::RetrySettings,
    shutdown: CancellationToken,
}

impl ElasticsearchClient {
    pub fn new(
        cfg: &ElasticsearchConfig,
        search_cfg: &SearchSettings,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout() * 4)
            .build()
            .map_err(|e| AppError::Configuration(format!("elasticsearch http client: {e}")))?;

        let address = cfg
            .addresses
            .first()
            .ok_or_else(|| AppError::Configuration("no elasticsearch address".into()))?;
        let base_url = match (&cfg.username, &cfg.password) {
            (Some(user), Some(pass)) if !user.is_empty() => {
                let rest = address
                    .strip_prefix("http://")
                    .or_else(|| address.strip_prefix("https://"))
                    .unwrap_or(address);
                let scheme = if address.starts_with("https://") { "https" } else { "http" };
                format!("{scheme}://{user}:{pass}@{rest}")
            }
            _ => address.clone(),
        };

        info!(addresses = ?cfg.addresses, "elasticsearch client created");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_prefix: cfg.index_prefix.clone(),
            breaker: CircuitBreaker::new("elasticsearch-primary", &search_cfg.circuit_breaker),
            retry_cfg: search_cfg.retry.clone(),
            shutdown,
        })
    }

    /// Verify the cluster is reachable
    pub async fn ping(&self) -> Result<()> {
        let resp = self.client.get(&self.base_url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AppError::Transient(format!(
                "elasticsearch ping status {}",
                resp.status()
            )))
        }
    }

    /// Cluster health color: green, yellow, or red
    pub async fn cluster_health(&self) -> Result<String> {
        let url = format!("{}/_cluster/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::Transient(format!(
                "es health status {}",
                resp.status()
            )));
        }
        #[derive(Deserialize)]
        struct Health {
            status: String,
        }
        let health: Health = resp.json().await?;
        Ok(health.status)
    }

    async fn guarded_search(&self, index: &str, query: &Value) -> Result<EsSearchResponse> {
        let start = Instant::now();

        let outcome = self
            .breaker
            .call(|| async {
                retry(&self.retry_cfg, &self.shutdown, || {
                    self.execute_search(index, query)
                })
                .await
                .map_err(|e| match e {
                    RetryError::Cancelled(cause) => AppError::Cancelled(cause),
                    RetryError::Exhausted { attempts, source } => AppError::BackendUnavailable(
                        format!("{attempts} attempts exhausted: {source}"),
                    ),
                })
            })
            .await;

        let status = if outcome.is_ok() { "success" } else { "error" };
        INDEX_QUERY_DURATION
            .with_label_values(&[index, status])
            .observe(start.elapsed().as_secs_f64());

        outcome.map_err(|e| match e {
            BreakerError::Open(name) => {
                AppError::BackendUnavailable(format!("circuit '{name}' open"))
            }
            BreakerError::Inner(err) => err,
        })
    }

    async fn execute_search(&self, index: &str, query: &Value) -> Result<EsSearchResponse> {
        let url = format!(
            "{}/{}/_search?track_total_hits=true",
            self.base_url, index
        );
        let resp = self.client.post(&url).json(query).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Transient(format!(
                "es search status={status} body={body}"
            )));
        }

        Ok(resp.json::<EsSearchResponse>().await?)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchClient {
    async fn search(&self, index: &str, query: &Value) -> Result<IndexSearchOutcome> {
        let es_resp = self.guarded_search(index, query).await?;
        Ok(es_resp.into_outcome())
    }

    async fn suggest(&self, index: &str, query: &Value) -> Result<Vec<String>> {
        let es_resp = self.guarded_search(index, query).await?;
        let mut texts = Vec::new();
        if let Some(entries) = es_resp.suggest.get("autocomplete") {
            for entry in entries {
                for option in &entry.options {
                    texts.push(option.text.clone());
                }
            }
        }
        Ok(texts)
    }
}

#[async_trait]
impl BulkIndexer for ElasticsearchClient {
    async fn bulk_index(&self, actions: &[IndexAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }

        let mut body = String::new();
        for action in actions {
            let mut meta = serde_json::Map::new();
            let mut inner = serde_json::Map::new();
            inner.insert("_index".to_string(), Value::String(action.index.clone()));
            inner.insert("_id".to_string(), Value::String(action.id.clone()));
            if let Some(routing) = &action.routing {
                if !routing.is_empty() {
                    inner.insert("routing".to_string(), Value::String(routing.clone()));
                }
            }
            meta.insert(action.action.as_str().to_string(), Value::Object(inner));

            body.push_str(&serde_json::to_string(&meta)?);
            body.push('\n');

            if action.action != IndexActionType::Delete {
                if let Some(doc) = &action.body {
                    body.push_str(&serde_json::to_string(doc)?);
                    body.push('\n');
                }
            }
        }

        let url = format!("{}/_bulk", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Transient(format!(
                "bulk request status={status} body={text}"
            )));
        }

        let bulk: BulkResponse = resp.json().await?;
        if bulk.errors {
            let mut messages = Vec::new();
            for item in bulk.items {
                for (_, result) in item {
                    if let Some(error) = result.error {
                        messages.push(format!("id={}: {}", result.id, error.reason));
                    }
                }
            }
            return Err(AppError::Transient(format!(
                "bulk indexing had errors: {}",
                messages.join("; ")
            )));
        }

        Ok(())
    }

    fn resolve_index(&self, doc_type: &str, region: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            self.index_prefix,
            doc_type,
            region,
            Utc::now().format("%Y.%m")
        )
    }
}

// Wire types

#[derive(Debug, Default, Deserialize)]
struct EsSearchResponse {
    #[serde(default)]
    took: i64,
    #[serde(default)]
    timed_out: bool,
    #[serde(default, rename = "_shards")]
    shards: EsShards,
    #[serde(default)]
    hits: EsHits,
    #[serde(default)]
    suggest: HashMap<String, Vec<EsSuggestEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct EsShards {
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Default, Deserialize)]
struct EsHits {
    #[serde(default)]
    total: EsTotal,
    #[serde(default)]
    hits: Vec<EsHit>,
}

#[derive(Debug, Default, Deserialize)]
struct EsTotal {
    #[serde(default)]
    value: i64,
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default, rename = "_score")]
    score: Option<f64>,
    #[serde(default, rename = "_source")]
    source: Option<HashMap<String, Value>>,
    #[serde(default)]
    highlight: Option<HashMap<String, Vec<String>>>,
}

#[derive(Debug, Default, Deserialize)]
struct EsSuggestEntry {
    #[serde(default)]
    options: Vec<EsSuggestOption>,
}

#[derive(Debug, Default, Deserialize)]
struct EsSuggestOption {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(default, rename = "_id")]
    id: String,
    #[serde(default)]
    error: Option<BulkItemError>,
}

#[derive(Debug, Deserialize)]
struct BulkItemError {
    #[serde(default)]
    reason: String,
}

impl EsSearchResponse {
    fn into_outcome(self) -> IndexSearchOutcome {
        let hits = self
            .hits
            .hits
            .into_iter()
            .map(|h| {
                let mut result = SearchResult {
                    id: h.id,
                    score: h.score.unwrap_or_default(),
                    ..Default::default()
                };
                if let Some(source) = h.source {
                    if let Some(Value::String(v)) = source.get("title") {
                        result.title = v.clone();
                    }
                    if let Some(Value::String(v)) = source.get("description") {
                        result.description = v.clone();
                    }
                    if let Some(Value::String(v)) = source.get("category") {
                        result.category = v.clone();
                    }
                    if let Some(Value::String(v)) = source.get("region") {
                        result.region = v.clone();
                    }
                    if let Some(v) = source.get("popularity_score").and_then(Value::as_f64) {
                        result.popularity_score = v;
                    }
                    if let Some(Value::Array(tags)) = source.get("tags") {
                        result.tags = tags
                            .iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect();
                    }
                }
                if let Some(highlight) = h.highlight {
                    result.highlights = highlight;
                }
                result
            })
            .collect();

        let spell_correct = self
            .suggest
            .get("spell_suggest")
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.options.first())
            .map(|opt| opt.text.clone())
            .filter(|t| !t.is_empty());

        IndexSearchOutcome {
            hits,
            total: self.hits.total.value,
            took_ms: self.took,
            shards_hit: self.shards.total,
            timed_out: self.timed_out,
            spell_correct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_response_parsing() {
        let raw = json!({
            "took": 12,
            "timed_out": false,
            "_shards": {"total": 3, "successful": 3, "skipped": 0, "failed": 0},
            "hits": {
                "total": {"value": 2, "relation": "eq"},
                "hits": [
                    {
                        "_index": "search-general-us-east-2025.06",
                        "_id": "a",
                        "_score": 2.5,
                        "_source": {
                            "title": "Gaming Laptop",
                            "description": "Fast",
                            "category": "laptops",
                            "region": "us-east",
                            "popularity_score": 8.5,
                            "tags": ["gaming", "portable"]
                        },
                        "highlight": {"title": ["<em>Gaming</em> Laptop"]}
                    },
                    {"_id": "b", "_score": 1.0}
                ]
            }
        });

        let resp: EsSearchResponse = serde_json::from_value(raw).unwrap();
        let outcome = resp.into_outcome();

        assert_eq!(outcome.total, 2);
        assert_eq!(outcome.took_ms, 12);
        assert_eq!(outcome.shards_hit, 3);
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].title, "Gaming Laptop");
        assert_eq!(outcome.hits[0].tags, vec!["gaming", "portable"]);
        assert_eq!(outcome.hits[0].highlights["title"][0], "<em>Gaming</em> Laptop");
        assert_eq!(outcome.hits[1].id, "b");
    }

    #[test]
    fn test_spell_suggestion_parsing() {
        let raw = json!({
            "took": 3,
            "hits": {"total": {"value": 0}, "hits": []},
            "suggest": {
                "spell_suggest": [
                    {"text": "gamng laptop", "options": [{"text": "gaming laptop"}]}
                ]
            }
        });

        let resp: EsSearchResponse = serde_json::from_value(raw).unwrap();
        let outcome = resp.into_outcome();
        assert_eq!(outcome.spell_correct.as_deref(), Some("gaming laptop"));
    }

    #[test]
    fn test_bulk_response_error_collection() {
        let raw = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 200}},
                {"index": {"_id": "b", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}}
            ]
        });

        let bulk: BulkResponse = serde_json::from_value(raw).unwrap();
        assert!(bulk.errors);
        let with_error: Vec<_> = bulk
            .items
            .iter()
            .flat_map(|i| i.values())
            .filter(|r| r.error.is_some())
            .collect();
        assert_eq!(with_error.len(), 1);
        assert_eq!(with_error[0].id, "b");
    }
}
