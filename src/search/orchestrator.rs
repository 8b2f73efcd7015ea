use crate::backends::{AnalyticsStore, SearchIndex};
use crate::cache::ResultCache;
use crate::config::SearchSettings;
use crate::error::{AppError, Result};
use crate::models::{
    Intent, ParsedQuery, ResponseMetadata, SearchRequest, SearchResponse, SearchResult,
};
use crate::observability::metrics::{
    SEARCH_FALLBACK_TOTAL, SEARCH_REQUESTS_TOTAL, SEARCH_REQUEST_DURATION,
};
use crate::observability::{SlowQueryDetector, SlowQuerySample};
use crate::search::{IntentClassifier, QueryBuilder, QueryParser};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::backends::docstore::Hydrator;

/// Request-scoped search state machine.
///
/// Sequences parse, classify, cache lookup, routed execution, hydration, and
/// cache set. When the primary path fails it walks the fallback chain: stale
/// cache, degraded analytics search, static popular results. The orchestrator
/// holds no per-request state and is freely shared across request tasks.
pub struct Orchestrator {
    index: Arc<dyn SearchIndex>,
    analytics: Option<Arc<dyn AnalyticsStore>>,
    cache: Arc<dyn ResultCache>,
    hydrator: Option<Hydrator>,
    doc_collection: String,
    parser: QueryParser,
    classifier: IntentClassifier,
    builder: QueryBuilder,
    slow_query: Arc<SlowQueryDetector>,
    cfg: SearchSettings,
    index_prefix: String,

    /// Pre-loaded popular results by region, the last fallback tier
    static_fallback: RwLock<HashMap<String, Vec<SearchResult>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Arc<dyn SearchIndex>,
        analytics: Option<Arc<dyn AnalyticsStore>>,
        cache: Arc<dyn ResultCache>,
        hydrator: Option<Hydrator>,
        doc_collection: String,
        slow_query: Arc<SlowQueryDetector>,
        cfg: SearchSettings,
        index_prefix: String,
    ) -> Self {
        Self {
            index,
            analytics,
            cache,
            hydrator,
            doc_collection,
            parser: QueryParser::new(),
            classifier: IntentClassifier::new(),
            builder: QueryBuilder::new(),
            slow_query,
            cfg,
            index_prefix,
            static_fallback: RwLock::new(HashMap::new()),
        }
    }

    pub async fn search(&self, mut req: SearchRequest) -> Result<SearchResponse> {
        let start = Instant::now();

        // Normalize pagination before it reaches the cache key or the builder
        if req.page_size == 0 {
            req.page_size = self.cfg.default_page_size;
        }
        req.page_size = req.page_size.clamp(1, self.cfg.max_page_size);

        let parsed = self.parser.parse(&req.query);
        let intent = self.classifier.classify(&parsed);
        debug!(query = %req.query, intent = %intent, "query classified");

        // Cache lookup is never blocked on backend health
        if !req.force_fresh {
            match self.cache.get_search_results(&req).await {
                Ok(Some(mut cached)) => {
                    cached.metadata.cache_hit = true;
                    cached.took_ms = start.elapsed().as_millis() as i64;
                    SEARCH_REQUESTS_TOTAL
                        .with_label_values(&[intent.as_str(), "cache_hit"])
                        .inc();
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "cache lookup error"),
            }
        }

        let mut resp = match self.search_with_fallback(&req, &parsed, intent).await {
            Ok(resp) => resp,
            Err(e) => {
                SEARCH_REQUESTS_TOTAL
                    .with_label_values(&[intent.as_str(), "error"])
                    .inc();
                SEARCH_REQUEST_DURATION
                    .with_label_values(&[intent.as_str(), "error", "error"])
                    .observe(start.elapsed().as_secs_f64());
                return Err(e);
            }
        };

        resp.took_ms = start.elapsed().as_millis() as i64;
        resp.page = req.page;
        resp.page_size = req.page_size;
        resp.metadata.request_id = req.request_id.clone();
        resp.metadata.intent = intent.as_str().to_string();

        if let Err(e) = self.cache.set_search_results(&req, &resp).await {
            warn!(error = %e, "cache set error");
        }

        SEARCH_REQUESTS_TOTAL
            .with_label_values(&[intent.as_str(), "success"])
            .inc();
        SEARCH_REQUEST_DURATION
            .with_label_values(&[intent.as_str(), &resp.source, "success"])
            .observe(start.elapsed().as_secs_f64());

        self.slow_query.intercept(SlowQuerySample {
            query: &req.query,
            query_type: intent.as_str(),
            duration: start.elapsed(),
            total_hits: resp.total,
            shards_hit: resp.metadata.shards_hit,
            timed_out: resp.metadata.timed_out,
            trace_id: &req.request_id,
        });

        Ok(resp)
    }

    /// Completion-suggest lookup used by the autocomplete endpoint
    pub async fn autocomplete(&self, prefix: &str, size: usize) -> Result<Vec<String>> {
        let query = self.builder.build_autocomplete_query(prefix, size);
        let index = format!("{}-*", self.index_prefix);
        self.index.suggest(&index, &query).await
    }

    async fn search_with_fallback(
        &self,
        req: &SearchRequest,
        parsed: &ParsedQuery,
        intent: Intent,
    ) -> Result<SearchResponse> {
        // Level 1: primary search
        let primary_err = match self.primary_search(req, parsed, intent).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };
        warn!(error = %primary_err, "primary search failed, trying fallback");
        SEARCH_FALLBACK_TOTAL
            .with_label_values(&["primary_failed"])
            .inc();

        // Level 2: stale cache
        match self.cache.get_stale_results(req).await {
            Ok(Some(mut stale)) => {
                stale.metadata.stale = true;
                stale.source = "stale_cache".to_string();
                stale.metadata.source = "stale_cache".to_string();
                SEARCH_FALLBACK_TOTAL
                    .with_label_values(&["stale_cache"])
                    .inc();
                return Ok(stale);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "stale cache lookup failed"),
        }

        // Level 3: degraded analytics search
        if let Some(analytics) = &self.analytics {
            match analytics
                .fallback_search(&parsed.normalized, req.page_size)
                .await
            {
                Ok(results) if !results.is_empty() => {
                    SEARCH_FALLBACK_TOTAL
                        .with_label_values(&["clickhouse"])
                        .inc();
                    return Ok(SearchResponse {
                        total: results.len() as i64,
                        results,
                        source: "degraded".to_string(),
                        metadata: ResponseMetadata {
                            source: "degraded_clickhouse".to_string(),
                            ..Default::default()
                        },
                        ..Default::default()
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "analytics fallback failed"),
            }
        }

        // Level 4: static popular results
        let static_results = self.get_static_fallback(req.region.as_deref());
        if !static_results.is_empty() {
            SEARCH_FALLBACK_TOTAL.with_label_values(&["static"]).inc();
            return Ok(SearchResponse {
                total: static_results.len() as i64,
                results: static_results,
                source: "static_fallback".to_string(),
                metadata: ResponseMetadata {
                    source: "static_fallback".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        Err(AppError::BackendUnavailable(format!(
            "all search paths exhausted: primary error: {primary_err}"
        )))
    }

    async fn primary_search(
        &self,
        req: &SearchRequest,
        parsed: &ParsedQuery,
        intent: Intent,
    ) -> Result<SearchResponse> {
        let deadline = self.cfg.query_timeout();
        let fut = async {
            match intent {
                Intent::Fulltext | Intent::Autocomplete => self.fulltext_search(req, parsed).await,
                Intent::Analytics => self.analytics_search(req, parsed).await,
                Intent::Faceted => self.faceted_search(req, parsed).await,
            }
        };

        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| AppError::Timeout(format!("primary search after {deadline:?}")))?
    }

    async fn fulltext_search(
        &self,
        req: &SearchRequest,
        parsed: &ParsedQuery,
    ) -> Result<SearchResponse> {
        let query = self.builder.build_search_query(parsed, req);

        let index = match req.region.as_deref().filter(|r| !r.is_empty()) {
            Some(region) => format!("{}-*-{}-*", self.index_prefix, region),
            None => format!("{}-*", self.index_prefix),
        };

        let outcome = self.index.search(&index, &query).await?;
        let mut results = outcome.hits;

        // Hydrate extra fields from the document store when requested
        if !req.fields.is_empty() {
            if let Some(hydrator) = &self.hydrator {
                if let Err(e) = hydrator.hydrate(&mut results, &self.doc_collection).await {
                    warn!(error = %e, "hydration failed, returning unhydrated results");
                }
            }
        }

        Ok(SearchResponse {
            results,
            total: outcome.total,
            source: "primary".to_string(),
            metadata: ResponseMetadata {
                source: "elasticsearch".to_string(),
                shards_hit: outcome.shards_hit,
                timed_out: outcome.timed_out,
                spell_correct: outcome.spell_correct.unwrap_or_default(),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn analytics_search(
        &self,
        req: &SearchRequest,
        parsed: &ParsedQuery,
    ) -> Result<SearchResponse> {
        let Some(analytics) = &self.analytics else {
            return self.fulltext_search(req, parsed).await;
        };

        match analytics.query_analytics(&parsed.normalized, &req.filters).await {
            Ok(agg) => Ok(SearchResponse {
                total: agg.total,
                facets: agg.facets,
                source: "analytics".to_string(),
                metadata: ResponseMetadata {
                    source: "clickhouse".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }),
            Err(e) => {
                warn!(error = %e, "analytics query failed, falling back to fulltext");
                self.fulltext_search(req, parsed).await
            }
        }
    }

    /// Fan out to the index and the analytics store in parallel. The index
    /// leg is fatal on failure; missing facet counts only cost the facets.
    async fn faceted_search(
        &self,
        req: &SearchRequest,
        parsed: &ParsedQuery,
    ) -> Result<SearchResponse> {
        let category = req
            .filters
            .get("category")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let facets_fut = async {
            match &self.analytics {
                Some(analytics) => analytics.query_facets(&category, &req.filters).await,
                None => Err(AppError::BackendUnavailable("analytics store not configured".into())),
            }
        };

        let (es_res, facet_res) = tokio::join!(self.fulltext_search(req, parsed), facets_fut);

        let mut resp = es_res?;
        match facet_res {
            Ok(agg) => resp.facets = agg.facets,
            Err(e) => warn!(error = %e, "facet counts failed"),
        }

        resp.source = "faceted".to_string();
        resp.metadata.source = "elasticsearch+clickhouse".to_string();
        Ok(resp)
    }

    pub fn set_static_fallback(&self, region: impl Into<String>, results: Vec<SearchResult>) {
        self.static_fallback.write().insert(region.into(), results);
    }

    fn get_static_fallback(&self, region: Option<&str>) -> Vec<SearchResult> {
        let map = self.static_fallback.read();
        if let Some(region) = region {
            if let Some(results) = map.get(region) {
                return results.clone();
            }
        }
        map.get("default").cloned().unwrap_or_default()
    }
}
