//! Columnar analytics store client: facet counts, aggregate queries, the
//! degraded fallback search, and the write side used by the slow-query
//! detector and the indexing changelog.

use crate::backends::{AggregationOutcome, AnalyticsStore, HealthCheck};
use crate::config::ClickhouseConfig;
use crate::error::Result;
use crate::models::{AnalyticsEvent, ChangeEvent, Facet, SearchResult};
use crate::observability::metrics::ANALYTICS_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

pub struct ClickhouseClient {
    client: clickhouse::Client,
}

#[derive(Debug, Row, Deserialize)]
struct FacetRow {
    facet_name: String,
    facet_value: String,
    cnt: u64,
}

#[derive(Debug, Row, Deserialize)]
struct AnalyticsRow {
    category: String,
    total: u64,
    #[allow(dead_code)]
    avg_score: f64,
}

#[derive(Debug, Row, Deserialize)]
struct FallbackRow {
    document_id: String,
    title: String,
    description: String,
    category: String,
    region: String,
    popularity_score: f64,
}

#[derive(Debug, Row, Serialize)]
struct QueryPerformanceRow {
    event_type: String,
    query_hash: String,
    query_type: String,
    duration_ms: f64,
    total_hits: i64,
    shards_hit: i32,
    timed_out: bool,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    timestamp: DateTime<Utc>,
    trace_id: String,
    source: String,
}

#[derive(Debug, Row, Serialize)]
struct ChangelogRow {
    document_id: String,
    collection: String,
    operation: String,
    region: String,
    #[serde(with = "clickhouse::serde::chrono::datetime")]
    timestamp: DateTime<Utc>,
    version: i64,
}

impl ClickhouseClient {
    pub fn new(cfg: &ClickhouseConfig) -> Self {
        let client = clickhouse::Client::default()
            .with_url(&cfg.url)
            .with_database(&cfg.database)
            .with_user(&cfg.username)
            .with_password(&cfg.password);

        info!(url = %cfg.url, database = %cfg.database, "clickhouse client created");

        Self { client }
    }

    /// Verify the connection with a trivial query
    pub async fn ping(&self) -> Result<()> {
        let _: u8 = self.client.query("SELECT 1").fetch_one().await?;
        Ok(())
    }

    /// Create the analytics tables when they do not exist yet
    pub async fn ensure_tables(&self) -> Result<()> {
        let tables = [
            "CREATE TABLE IF NOT EXISTS query_performance (
                event_type String,
                query_hash String,
                query_type String,
                duration_ms Float64,
                total_hits Int64,
                shards_hit Int32,
                timed_out Bool,
                timestamp DateTime,
                trace_id String,
                source String
            ) ENGINE = MergeTree()
            PARTITION BY toYYYYMM(timestamp)
            ORDER BY (timestamp, query_hash)",
            "CREATE TABLE IF NOT EXISTS search_documents (
                document_id String,
                title String,
                description String,
                category String,
                region String,
                popularity_score Float64,
                created_at DateTime,
                updated_at DateTime
            ) ENGINE = ReplacingMergeTree(updated_at)
            PARTITION BY toYYYYMM(created_at)
            ORDER BY (document_id)",
            "CREATE TABLE IF NOT EXISTS search_documents_changelog (
                document_id String,
                collection String,
                operation String,
                region String,
                timestamp DateTime,
                version Int64
            ) ENGINE = MergeTree()
            PARTITION BY toYYYYMM(timestamp)
            ORDER BY (timestamp, document_id)",
            "CREATE TABLE IF NOT EXISTS search_facets (
                category String,
                facet_name String,
                facet_value String,
                count UInt64,
                updated_at DateTime
            ) ENGINE = SummingMergeTree(count)
            PARTITION BY category
            ORDER BY (category, facet_name, facet_value)",
        ];

        for ddl in tables {
            self.client.query(ddl).execute().await?;
        }

        info!("clickhouse tables ensured");
        Ok(())
    }

    fn observe(query_type: &str, start: Instant, ok: bool) {
        let status = if ok { "success" } else { "error" };
        ANALYTICS_QUERY_DURATION
            .with_label_values(&[query_type, status])
            .observe(start.elapsed().as_secs_f64());
    }
}

#[async_trait]
impl AnalyticsStore for ClickhouseClient {
    async fn query_facets(
        &self,
        category: &str,
        _filters: &HashMap<String, Value>,
    ) -> Result<AggregationOutcome> {
        let start = Instant::now();

        let fetch = self
            .client
            .query(
                "SELECT facet_name, facet_value, count() AS cnt
                 FROM search_facets
                 WHERE category = ?
                 GROUP BY facet_name, facet_value
                 ORDER BY cnt DESC
                 LIMIT 100",
            )
            .bind(category)
            .fetch_all::<FacetRow>()
            .await;

        Self::observe("facets", start, fetch.is_ok());
        let rows = fetch?;

        let mut facets: HashMap<String, Vec<Facet>> = HashMap::new();
        for row in rows {
            facets.entry(row.facet_name).or_default().push(Facet {
                value: row.facet_value,
                count: row.cnt as i64,
            });
        }

        Ok(AggregationOutcome {
            facets,
            total: 0,
            took_ms: start.elapsed().as_millis() as i64,
        })
    }

    async fn query_analytics(
        &self,
        text: &str,
        _filters: &HashMap<String, Value>,
    ) -> Result<AggregationOutcome> {
        let start = Instant::now();

        let fetch = self
            .client
            .query(
                "SELECT category, count() AS total, avg(popularity_score) AS avg_score
                 FROM search_documents
                 WHERE match(title, ?) OR match(description, ?)
                 GROUP BY category
                 ORDER BY total DESC
                 LIMIT 50",
            )
            .bind(text)
            .bind(text)
            .fetch_all::<AnalyticsRow>()
            .await;

        Self::observe("analytics", start, fetch.is_ok());
        let rows = fetch?;

        let mut facets: HashMap<String, Vec<Facet>> = HashMap::new();
        let mut total = 0i64;
        for row in rows {
            total += row.total as i64;
            facets.entry("category".to_string()).or_default().push(Facet {
                value: row.category,
                count: row.total as i64,
            });
        }

        Ok(AggregationOutcome {
            facets,
            total,
            took_ms: start.elapsed().as_millis() as i64,
        })
    }

    async fn fallback_search(&self, text: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let start = Instant::now();

        let fetch = self
            .client
            .query(
                "SELECT document_id, title, description, category, region, popularity_score
                 FROM search_documents
                 WHERE match(title, ?) OR match(description, ?)
                 ORDER BY popularity_score DESC
                 LIMIT ?",
            )
            .bind(text)
            .bind(text)
            .bind(limit as u64)
            .fetch_all::<FallbackRow>()
            .await;

        Self::observe("fallback", start, fetch.is_ok());
        let rows = fetch?;

        Ok(rows
            .into_iter()
            .map(|row| SearchResult {
                id: row.document_id,
                title: row.title,
                description: row.description,
                category: row.category,
                region: row.region,
                popularity_score: row.popularity_score,
                ..Default::default()
            })
            .collect())
    }

    async fn insert_document_event(&self, event: &ChangeEvent) -> Result<()> {
        let mut insert = self.client.insert("search_documents_changelog")?;
        insert
            .write(&ChangelogRow {
                document_id: event.document_id.clone(),
                collection: event.collection.clone(),
                operation: event.event_type.as_str().to_string(),
                region: event.region.clone(),
                timestamp: event.timestamp,
                version: event.version,
            })
            .await?;
        insert.end().await?;
        Ok(())
    }
}

#[async_trait]
impl crate::observability::QueryPerformanceWriter for ClickhouseClient {
    async fn write_query_performance(&self, event: &AnalyticsEvent) -> Result<()> {
        let mut insert = self.client.insert("query_performance")?;
        insert
            .write(&QueryPerformanceRow {
                event_type: event.event_type.clone(),
                query_hash: event.query_hash.clone(),
                query_type: event.query_type.clone(),
                duration_ms: event.duration_ms,
                total_hits: event.total_hits,
                shards_hit: event.shards_hit as i32,
                timed_out: event.timed_out,
                timestamp: event.timestamp,
                trace_id: event.trace_id.clone(),
                source: event.source.clone(),
            })
            .await?;
        insert.end().await?;
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for ClickhouseClient {
    async fn health_check(&self) -> Result<()> {
        self.ping().await
    }
}
