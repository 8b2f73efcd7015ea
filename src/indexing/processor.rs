use crate::backends::{AnalyticsStore, BulkIndexer};
use crate::cache::{facet_key, trending_key, CacheInvalidator};
use crate::error::{AppError, Result};
use crate::models::{ChangeEvent, ChangeEventType, IndexAction, IndexActionType};
use crate::observability::metrics::{ASYNC_TASKS_DROPPED, INDEXING_EVENTS_TOTAL};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Document fields copied into the searchable projection; everything else
/// stays in the document store.
const SEARCHABLE_FIELDS: [&str; 8] = [
    "title",
    "description",
    "category",
    "tags",
    "region",
    "created_at",
    "popularity_score",
    "geo_point",
];

const FLUSH_DEADLINE: Duration = Duration::from_secs(30);
const ANALYTICS_WRITE_DEADLINE: Duration = Duration::from_secs(5);
const INVALIDATION_DEADLINE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct IndexingSettings {
    /// Buffered actions that trigger an immediate flush
    pub bulk_size: usize,
    pub flush_interval: Duration,
    /// Hard ceiling on the live buffer; overflow drops the oldest actions
    pub max_buffer_size: usize,
    /// Slots for background analytics writes and cache invalidation
    pub max_async_workers: usize,
}

impl IndexingSettings {
    pub fn from_config(cfg: &crate::config::ElasticsearchConfig) -> Self {
        Self {
            bulk_size: cfg.bulk_size.max(1),
            flush_interval: cfg.bulk_flush_interval(),
            max_buffer_size: cfg.max_buffer_size.max(1),
            max_async_workers: cfg.max_async_workers.max(1),
        }
    }
}

/// Long-lived background actor transforming change events into bulk index
/// actions. Flushes when the buffer reaches `bulk_size`, on every tick of
/// `flush_interval`, and once more during [`StreamProcessor::stop`].
pub struct StreamProcessor {
    indexer: Arc<dyn BulkIndexer>,
    analytics: Option<Arc<dyn AnalyticsStore>>,
    invalidator: Arc<dyn CacheInvalidator>,
    settings: IndexingSettings,

    buffer: Mutex<Vec<IndexAction>>,
    async_workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl StreamProcessor {
    /// Create the processor and start its periodic flush loop
    pub fn start(
        indexer: Arc<dyn BulkIndexer>,
        analytics: Option<Arc<dyn AnalyticsStore>>,
        invalidator: Arc<dyn CacheInvalidator>,
        settings: IndexingSettings,
    ) -> Arc<Self> {
        let processor = Arc::new(Self {
            indexer,
            analytics,
            invalidator,
            async_workers: Arc::new(Semaphore::new(settings.max_async_workers)),
            buffer: Mutex::new(Vec::with_capacity(settings.bulk_size)),
            settings,
            shutdown: CancellationToken::new(),
            flush_task: Mutex::new(None),
            dropped: AtomicU64::new(0),
        });

        let looped = processor.clone();
        let handle = tokio::spawn(async move {
            looped.flush_loop().await;
        });
        *processor.flush_task.lock() = Some(handle);

        processor
    }

    /// Handle one change event: transform, buffer, flush when full, and
    /// dispatch the analytics changelog write and cache invalidation as
    /// bounded background tasks.
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        let action = self.transform_event(event)?;

        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.push(action);
            self.cap_buffer(&mut buffer);
            buffer.len() >= self.settings.bulk_size
        };

        if should_flush {
            if let Err(e) = self.flush().await {
                error!(error = %e, "flush on full buffer failed");
            }
        }

        if let Some(analytics) = &self.analytics {
            let analytics = analytics.clone();
            let event = event.clone();
            self.async_do(async move {
                let write = analytics.insert_document_event(&event);
                match tokio::time::timeout(ANALYTICS_WRITE_DEADLINE, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(
                        doc_id = %event.document_id,
                        error = %e,
                        "analytics changelog insert failed"
                    ),
                    Err(_) => warn!(doc_id = %event.document_id, "analytics changelog insert timed out"),
                }
            });
        }

        let invalidator = self.invalidator.clone();
        let keys = build_invalidation_keys(event);
        let doc_id = event.document_id.clone();
        self.async_do(async move {
            let delete = invalidator.invalidate_keys(&keys);
            match tokio::time::timeout(INVALIDATION_DEADLINE, delete).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(doc_id = %doc_id, error = %e, "cache invalidation failed"),
                Err(_) => warn!(doc_id = %doc_id, "cache invalidation timed out"),
            }
        });

        Ok(())
    }

    /// Run `task` on a worker slot. A full pool drops the task and logs: the
    /// hot path must not stall behind a slow sidecar.
    fn async_do<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.async_workers.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    let _permit = permit;
                    task.await;
                });
            }
            Err(_) => {
                ASYNC_TASKS_DROPPED.inc();
                warn!("async worker pool full, dropping background task");
            }
        }
    }

    fn transform_event(&self, event: &ChangeEvent) -> Result<IndexAction> {
        let doc_type = event
            .document
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("general");
        let region = if event.region.is_empty() {
            event
                .document
                .get("region")
                .and_then(Value::as_str)
                .unwrap_or_default()
        } else {
            &event.region
        };

        let index = self.indexer.resolve_index(doc_type, region);
        let routing = (!event.region.is_empty()).then(|| event.region.clone());

        let (action, body) = match event.event_type {
            ChangeEventType::Create | ChangeEventType::Update => (
                IndexActionType::Index,
                Some(extract_search_fields(&event.document)),
            ),
            ChangeEventType::Delete => (IndexActionType::Delete, None),
        };

        Ok(IndexAction {
            action,
            index,
            id: event.document_id.clone(),
            routing,
            body,
            timestamp: event.timestamp,
        })
    }

    async fn flush_loop(&self) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "periodic flush failed");
                    }
                }
                _ = self.shutdown.cancelled() => return,
            }
        }
    }

    /// Snapshot the buffer under the lock, submit the batch outside it. A
    /// failed batch is prepended back so nothing is lost silently; the
    /// recombined buffer is capped by dropping its oldest entries.
    pub async fn flush(&self) -> Result<()> {
        let batch = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let start = Instant::now();
        let submitted = batch.len();
        let outcome = tokio::time::timeout(FLUSH_DEADLINE, self.indexer.bulk_index(&batch))
            .await
            .map_err(|_| AppError::Timeout("bulk flush".into()))
            .and_then(|r| r);

        if let Err(e) = outcome {
            {
                let mut buffer = self.buffer.lock();
                let mut combined = batch;
                combined.append(&mut buffer);
                *buffer = combined;
                self.cap_buffer(&mut buffer);
            }

            INDEXING_EVENTS_TOTAL
                .with_label_values(&["bulk", "error"])
                .inc();
            return Err(AppError::Transient(format!("bulk index flush: {e}")));
        }

        INDEXING_EVENTS_TOTAL
            .with_label_values(&["bulk", "success"])
            .inc_by(submitted as f64);
        info!(
            count = submitted,
            duration_ms = start.elapsed().as_millis() as u64,
            "bulk flush completed"
        );

        Ok(())
    }

    /// Enforce the buffer ceiling by dropping the oldest entries
    fn cap_buffer(&self, buffer: &mut Vec<IndexAction>) {
        if buffer.len() > self.settings.max_buffer_size {
            let overflow = buffer.len() - self.settings.max_buffer_size;
            buffer.drain(..overflow);
            self.dropped.fetch_add(overflow as u64, Ordering::Relaxed);
            error!(
                dropped = overflow,
                buffer_size = self.settings.max_buffer_size,
                "buffer overflow, dropping oldest events"
            );
        }
    }

    /// Total actions dropped to overflow since start
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Current buffer length
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Stop the flush loop and flush whatever is still buffered
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        let handle = self.flush_task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.flush().await
    }
}

/// Exact cache keys invalidated by a change event. Never wildcard patterns:
/// SCAN over a production keyspace is O(N).
pub fn build_invalidation_keys(event: &ChangeEvent) -> Vec<String> {
    let mut keys = Vec::new();

    if !event.region.is_empty() {
        keys.push(trending_key(&event.region));
    }

    if let Some(category) = event.document.get("category").and_then(Value::as_str) {
        keys.push(facet_key(category));
    }

    keys
}

fn extract_search_fields(doc: &Map<String, Value>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    for name in SEARCHABLE_FIELDS {
        if let Some(value) = doc.get(name) {
            fields.insert(name.to_string(), value.clone());
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct FakeIndexer {
        fail: std::sync::atomic::AtomicBool,
        batches: Mutex<Vec<usize>>,
    }

    impl FakeIndexer {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail: std::sync::atomic::AtomicBool::new(fail),
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BulkIndexer for FakeIndexer {
        async fn bulk_index(&self, actions: &[IndexAction]) -> Result<()> {
            self.batches.lock().push(actions.len());
            if self.fail.load(Ordering::SeqCst) {
                Err(AppError::Transient("bulk down".into()))
            } else {
                Ok(())
            }
        }

        fn resolve_index(&self, doc_type: &str, region: &str) -> String {
            format!("search-{doc_type}-{region}-2025.06")
        }
    }

    struct NoopInvalidator {
        keys: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CacheInvalidator for NoopInvalidator {
        async fn invalidate_keys(&self, keys: &[String]) -> Result<()> {
            self.keys.lock().push(keys.to_vec());
            Ok(())
        }
    }

    fn settings(bulk_size: usize, max_buffer_size: usize) -> IndexingSettings {
        IndexingSettings {
            bulk_size,
            flush_interval: Duration::from_secs(3600),
            max_buffer_size,
            max_async_workers: 8,
        }
    }

    fn event(id: &str, event_type: ChangeEventType) -> ChangeEvent {
        let mut document = Map::new();
        if event_type != ChangeEventType::Delete {
            document.insert("type".to_string(), json!("product"));
            document.insert("title".to_string(), json!(format!("Item {id}")));
            document.insert("category".to_string(), json!("laptops"));
            document.insert("internal_cost".to_string(), json!(99.5));
        }
        ChangeEvent {
            event_type,
            document_id: id.to_string(),
            collection: "documents".to_string(),
            document,
            region: "us-east".to_string(),
            timestamp: Utc::now(),
            version: 1,
        }
    }

    fn processor(
        indexer: Arc<FakeIndexer>,
        invalidator: Arc<NoopInvalidator>,
        settings: IndexingSettings,
    ) -> Arc<StreamProcessor> {
        StreamProcessor::start(indexer, None, invalidator, settings)
    }

    #[tokio::test]
    async fn test_transform_create_whitelists_fields() {
        let indexer = FakeIndexer::new(false);
        let sp = processor(
            indexer,
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(100, 1000),
        );

        let action = sp.transform_event(&event("d1", ChangeEventType::Create)).unwrap();
        assert_eq!(action.action, IndexActionType::Index);
        assert_eq!(action.index, "search-product-us-east-2025.06");
        assert_eq!(action.routing.as_deref(), Some("us-east"));

        let body = action.body.unwrap();
        assert!(body.contains_key("title"));
        assert!(body.contains_key("category"));
        assert!(body.contains_key("updated_at"));
        // Non-searchable content never reaches the index
        assert!(!body.contains_key("internal_cost"));

        sp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_transform_delete_has_no_body() {
        let indexer = FakeIndexer::new(false);
        let sp = processor(
            indexer,
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(100, 1000),
        );

        let action = sp.transform_event(&event("d2", ChangeEventType::Delete)).unwrap();
        assert_eq!(action.action, IndexActionType::Delete);
        assert!(action.body.is_none());
        // Missing document type falls back to the default
        assert_eq!(action.index, "search-general-us-east-2025.06");

        sp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_triggered_at_bulk_size() {
        let indexer = FakeIndexer::new(false);
        let sp = processor(
            indexer.clone(),
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(2, 1000),
        );

        sp.handle_event(&event("a", ChangeEventType::Create)).await.unwrap();
        assert_eq!(sp.buffered(), 1);
        sp.handle_event(&event("b", ChangeEventType::Create)).await.unwrap();
        assert_eq!(sp.buffered(), 0);
        assert_eq!(*indexer.batches.lock(), vec![2]);

        sp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_batch() {
        let indexer = FakeIndexer::new(true);
        let sp = processor(
            indexer.clone(),
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(2, 1000),
        );

        sp.handle_event(&event("a", ChangeEventType::Create)).await.unwrap();
        sp.handle_event(&event("b", ChangeEventType::Create)).await.unwrap();
        // Flush ran and failed; the batch is back in the buffer
        assert_eq!(sp.buffered(), 2);

        // Recovery drains it
        indexer.fail.store(false, Ordering::SeqCst);
        sp.flush().await.unwrap();
        assert_eq!(sp.buffered(), 0);

        sp.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_buffer_never_exceeds_ceiling_and_drops_oldest() {
        let indexer = FakeIndexer::new(true);
        let sp = processor(
            indexer,
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(2, 4),
        );

        for i in 0..10 {
            sp.handle_event(&event(&format!("e{i}"), ChangeEventType::Create))
                .await
                .unwrap();
            assert!(sp.buffered() <= 4, "buffer exceeded ceiling at event {i}");
        }

        assert_eq!(sp.dropped_total(), 6);

        let ids: Vec<String> = sp.buffer.lock().iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids, vec!["e6", "e7", "e8", "e9"]);

        sp.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_invalidation_keys_are_exact() {
        let e = event("d3", ChangeEventType::Update);
        let keys = build_invalidation_keys(&e);
        assert_eq!(keys, vec!["trend:us-east", "fc:laptops"]);
        assert!(keys.iter().all(|k| !k.contains('*')));
    }

    #[tokio::test]
    async fn test_invalidation_skips_missing_parts() {
        let mut e = event("d4", ChangeEventType::Delete);
        e.region = String::new();
        assert!(build_invalidation_keys(&e).is_empty());
    }

    #[tokio::test]
    async fn test_invalidation_dispatched_on_handle() {
        let indexer = FakeIndexer::new(false);
        let invalidator = Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) });
        let sp = processor(indexer, invalidator.clone(), settings(100, 1000));

        sp.handle_event(&event("d5", ChangeEventType::Create)).await.unwrap();

        // Background task; give it a moment
        for _ in 0..20 {
            if !invalidator.keys.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let seen = invalidator.keys.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], vec!["trend:us-east", "fc:laptops"]);

        sp.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining_buffer() {
        let indexer = FakeIndexer::new(false);
        let sp = processor(
            indexer.clone(),
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(100, 1000),
        );

        sp.handle_event(&event("a", ChangeEventType::Create)).await.unwrap();
        sp.handle_event(&event("b", ChangeEventType::Create)).await.unwrap();
        sp.stop().await.unwrap();

        assert_eq!(*indexer.batches.lock(), vec![2]);
        assert_eq!(sp.buffered(), 0);
    }

    #[tokio::test]
    async fn test_identical_creates_produce_identical_actions() {
        let indexer = FakeIndexer::new(false);
        let sp = processor(
            indexer,
            Arc::new(NoopInvalidator { keys: Mutex::new(Vec::new()) }),
            settings(100, 1000),
        );

        let e = event("same", ChangeEventType::Create);
        let mut a = sp.transform_event(&e).unwrap();
        let mut b = sp.transform_event(&e).unwrap();

        // updated_at is stamped at transform time; compare modulo it
        a.body.as_mut().unwrap().remove("updated_at");
        b.body.as_mut().unwrap().remove("updated_at");
        assert_eq!(a, b);

        sp.stop().await.unwrap();
    }
}
