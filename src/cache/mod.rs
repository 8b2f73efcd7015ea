//! Result cache backed by Redis.
//!
//! Key layout:
//!   `sr:<hash>`        search results (per-intent TTL)
//!   `sr:stale:<hash>`  stale copy of the same results (long TTL)
//!   `ac:<hash>`        autocomplete suggestions
//!   `trend:<region>`   trending queries
//!   `fc:<category>`    facet counts
//!
//! `<hash>` is the hex form of the first 8 bytes of the SHA-256 of the
//! canonical request string, so identical requests always share an entry no
//! matter how their filter maps were built.

use crate::backends::HealthCheck;
use crate::config::{CacheTtlConfig, RedisConfig};
use crate::error::{AppError, Result};
use crate::models::{Intent, SearchRequest, SearchResponse};
use crate::observability::metrics::{CACHE_HITS, CACHE_MISSES};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Full cache capability consumed by the orchestrator and the HTTP handlers
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get_search_results(&self, req: &SearchRequest) -> Result<Option<SearchResponse>>;
    async fn set_search_results(&self, req: &SearchRequest, resp: &SearchResponse) -> Result<()>;
    async fn get_stale_results(&self, req: &SearchRequest) -> Result<Option<SearchResponse>>;
    async fn get_autocomplete(&self, prefix: &str) -> Result<Option<Vec<String>>>;
    async fn set_autocomplete(&self, prefix: &str, suggestions: &[String]) -> Result<()>;
    async fn get_trending(&self, region: &str) -> Result<Option<Vec<String>>>;
    async fn set_trending(&self, region: &str, queries: &[String]) -> Result<()>;
    async fn invalidate_keys(&self, keys: &[String]) -> Result<()>;
}

/// Narrow invalidation-only view handed to the indexing pipeline, so the
/// indexer cannot grow a dependency on the read-path cache surface.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate_keys(&self, keys: &[String]) -> Result<()>;
}

/// Deterministic request fingerprint: 8-byte SHA-256 prefix, hex-encoded
pub fn fingerprint(req: &SearchRequest) -> String {
    let raw = format!(
        "{}:{}:{}:{}",
        req.query,
        canonical_filters(&req.filters),
        req.page,
        req.page_size
    );
    hash_string(&raw)
}

/// Canonical filter serialization: keys sorted lexicographically, joined as
/// `key=value` with commas. Empty map produces the empty string.
pub fn canonical_filters(filters: &std::collections::HashMap<String, Value>) -> String {
    if filters.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = filters.keys().collect();
    keys.sort();

    let mut out = String::new();
    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(&scalar_string(&filters[*k]));
    }
    out
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn hash_string(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn search_key(req: &SearchRequest) -> String {
    format!("sr:{}", fingerprint(req))
}

pub fn stale_key(req: &SearchRequest) -> String {
    format!("sr:stale:{}", fingerprint(req))
}

pub fn autocomplete_key(prefix: &str) -> String {
    format!("ac:{}", hash_string(prefix))
}

pub fn trending_key(region: &str) -> String {
    format!("trend:{region}")
}

pub fn facet_key(category: &str) -> String {
    format!("fc:{category}")
}

/// Redis-backed implementation of [`ResultCache`]
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    ttl: CacheTtlConfig,
}

impl RedisCache {
    /// Connect and verify the connection with a PING
    pub async fn new(cfg: &RedisConfig) -> Result<Self> {
        let url = Self::connection_url(cfg);
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Configuration(format!("redis client: {e}")))?;

        let connection = ConnectionManager::new(client).await?;

        let mut probe = connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut probe).await?;

        info!(addresses = ?cfg.addresses, "redis cache connected");

        Ok(Self {
            connection,
            ttl: cfg.ttl.clone(),
        })
    }

    fn connection_url(cfg: &RedisConfig) -> String {
        let addr = cfg
            .addresses
            .first()
            .map(String::as_str)
            .unwrap_or("localhost:6379");
        match &cfg.password {
            Some(pw) if !pw.is_empty() => format!("redis://:{pw}@{addr}/{}", cfg.db),
            _ => format!("redis://{addr}/{}", cfg.db),
        }
    }

    fn ttl_for_intent(&self, intent: &str) -> u64 {
        match intent {
            i if i == Intent::Autocomplete.as_str() => self.ttl.autocomplete_secs,
            i if i == Intent::Analytics.as_str() || i == Intent::Faceted.as_str() => {
                self.ttl.facet_counts_secs
            }
            _ => self.ttl.search_results_secs,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            None => {
                CACHE_MISSES.inc();
                Ok(None)
            }
            Some(payload) => {
                CACHE_HITS.inc();
                let value = serde_json::from_str(&payload)?;
                Ok(Some(value))
            }
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(key, payload, ttl_secs).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn get_search_results(&self, req: &SearchRequest) -> Result<Option<SearchResponse>> {
        self.get_json(&search_key(req)).await
    }

    /// Write the fresh entry, then the stale copy. A fresh-write failure
    /// aborts; a stale-write failure is logged and swallowed because the
    /// fresh value is still useful.
    async fn set_search_results(&self, req: &SearchRequest, resp: &SearchResponse) -> Result<()> {
        let ttl = self.ttl_for_intent(&resp.metadata.intent);
        self.set_json(&search_key(req), resp, ttl).await?;

        if let Err(e) = self
            .set_json(&stale_key(req), resp, self.ttl.stale_fallback_secs)
            .await
        {
            warn!(error = %e, "stale cache write failed");
        }
        Ok(())
    }

    async fn get_stale_results(&self, req: &SearchRequest) -> Result<Option<SearchResponse>> {
        self.get_json(&stale_key(req)).await
    }

    async fn get_autocomplete(&self, prefix: &str) -> Result<Option<Vec<String>>> {
        self.get_json(&autocomplete_key(prefix)).await
    }

    async fn set_autocomplete(&self, prefix: &str, suggestions: &[String]) -> Result<()> {
        self.set_json(&autocomplete_key(prefix), &suggestions, self.ttl.autocomplete_secs)
            .await
    }

    async fn get_trending(&self, region: &str) -> Result<Option<Vec<String>>> {
        self.get_json(&trending_key(region)).await
    }

    async fn set_trending(&self, region: &str, queries: &[String]) -> Result<()> {
        self.set_json(&trending_key(region), &queries, self.ttl.trending_secs)
            .await
    }

    /// Delete exact keys in one round-trip. Never pattern-based: SCAN over a
    /// large keyspace is O(N) and is prohibited here.
    async fn invalidate_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let result: std::result::Result<(), redis::RedisError> = conn.del(keys).await;
        if let Err(e) = &result {
            warn!(key_count = keys.len(), error = %e, "cache delete error");
        }
        result.map_err(Into::into)
    }
}

#[async_trait]
impl CacheInvalidator for RedisCache {
    async fn invalidate_keys(&self, keys: &[String]) -> Result<()> {
        ResultCache::invalidate_keys(self, keys).await
    }
}

#[async_trait]
impl HealthCheck for RedisCache {
    async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn request(query: &str, filters: HashMap<String, Value>, page: usize, size: usize) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            filters,
            page,
            page_size: size,
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_is_filter_order_independent() {
        let mut a = HashMap::new();
        a.insert("category".to_string(), json!("laptops"));
        a.insert("brand".to_string(), json!("acme"));

        let mut b = HashMap::new();
        b.insert("brand".to_string(), json!("acme"));
        b.insert("category".to_string(), json!("laptops"));

        let r1 = request("gaming laptop", a, 0, 20);
        let r2 = request("gaming laptop", b, 0, 20);
        assert_eq!(fingerprint(&r1), fingerprint(&r2));
    }

    #[test]
    fn test_fingerprint_varies_with_pagination() {
        let r1 = request("laptop", HashMap::new(), 0, 20);
        let r2 = request("laptop", HashMap::new(), 1, 20);
        let r3 = request("laptop", HashMap::new(), 0, 50);
        assert_ne!(fingerprint(&r1), fingerprint(&r2));
        assert_ne!(fingerprint(&r1), fingerprint(&r3));
    }

    #[test]
    fn test_fingerprint_is_16_hex_chars() {
        let r = request("laptop", HashMap::new(), 0, 20);
        let fp = fingerprint(&r);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_canonical_filters_sorted_and_joined() {
        let mut filters = HashMap::new();
        filters.insert("b".to_string(), json!("two"));
        filters.insert("a".to_string(), json!(1));
        filters.insert("c".to_string(), json!(true));

        assert_eq!(canonical_filters(&filters), "a=1,b=two,c=true");
    }

    #[test]
    fn test_canonical_filters_empty_map() {
        assert_eq!(canonical_filters(&HashMap::new()), "");
    }

    #[test]
    fn test_key_prefixes() {
        let r = request("laptop", HashMap::new(), 0, 20);
        assert!(search_key(&r).starts_with("sr:"));
        assert!(!search_key(&r).starts_with("sr:stale:"));
        assert!(stale_key(&r).starts_with("sr:stale:"));
        assert!(autocomplete_key("lap").starts_with("ac:"));
        assert_eq!(trending_key("us-east"), "trend:us-east");
        assert_eq!(facet_key("laptops"), "fc:laptops");
    }

    #[test]
    fn test_search_and_stale_keys_share_fingerprint() {
        let r = request("laptop", HashMap::new(), 0, 20);
        let sk = search_key(&r);
        let st = stale_key(&r);
        assert_eq!(sk.strip_prefix("sr:").unwrap(), st.strip_prefix("sr:stale:").unwrap());
    }
}
