//! Document store client and result hydration.
//!
//! The index stores a minimal searchable projection; the document store
//! remains the source of truth for everything else. The hydrator enriches
//! result rows with full document fields when the caller asks for them.

use crate::backends::{DocumentStore, HealthCheck};
use crate::config::DocstoreConfig;
use crate::error::{AppError, Result};
use crate::models::SearchResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// HTTP client for the document service's batch-get endpoint
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BatchGetResponse {
    #[serde(default)]
    docs: HashMap<String, Map<String, Value>>,
}

impl HttpDocumentStore {
    pub fn new(cfg: &DocstoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| AppError::Configuration(format!("docstore http client: {e}")))?;

        info!(base_url = %cfg.base_url, "document store client created");

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get_batch(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Map<String, Value>>> {
        let url = format!("{}/v1/{}/_mget", self.base_url, collection);
        let resp = self
            .client
            .post(&url)
            .json(&json!({"ids": ids}))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::Transient(format!(
                "docstore batch get status {}",
                resp.status()
            )));
        }

        let body: BatchGetResponse = resp.json().await?;
        Ok(body.docs)
    }
}

#[async_trait]
impl HealthCheck for HttpDocumentStore {
    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(AppError::Transient(format!(
                "docstore health status {}",
                resp.status()
            )))
        }
    }
}

/// Batched result hydration over any [`DocumentStore`].
///
/// Ids are chunked into batches of at most `max_batch_size`; each batch gets
/// its own deadline so sequential batches don't starve each other. Any batch
/// error aborts the whole hydration, leaving the caller with the unhydrated
/// rows it started from.
pub struct Hydrator {
    store: Arc<dyn DocumentStore>,
    max_batch_size: usize,
    batch_timeout: Duration,
}

impl Hydrator {
    pub fn new(store: Arc<dyn DocumentStore>, max_batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            store,
            max_batch_size: max_batch_size.max(1),
            batch_timeout,
        }
    }

    pub async fn hydrate(&self, results: &mut [SearchResult], collection: &str) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
        let mut docs: HashMap<String, Map<String, Value>> = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(self.max_batch_size) {
            let batch = tokio::time::timeout(
                self.batch_timeout,
                self.store.get_batch(collection, chunk),
            )
            .await
            .map_err(|_| AppError::Timeout(format!("docstore batch of {}", chunk.len())))??;
            docs.extend(batch);
        }

        for result in results.iter_mut() {
            if let Some(doc) = docs.get(&result.id) {
                for (k, v) in doc {
                    result.fields.insert(k.clone(), v.clone());
                }
            }
        }

        Ok(())
    }
}
