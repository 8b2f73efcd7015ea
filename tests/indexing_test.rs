//! End-to-end indexing pipeline scenarios: buffer overflow under a failing
//! bulk backend, and DLQ delivery with a single offset-commit decision.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use search_orchestrator::backends::BulkIndexer;
use search_orchestrator::cache::CacheInvalidator;
use search_orchestrator::error::{AppError, Result};
use search_orchestrator::indexing::{
    process_payload, DeadLetterSink, EventHandler, IndexingSettings, MessageOutcome,
    StreamProcessor,
};
use search_orchestrator::models::{ChangeEvent, ChangeEventType};
use serde_json::{json, Map};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct FailingIndexer {
    fail: AtomicBool,
}

#[async_trait]
impl BulkIndexer for FailingIndexer {
    async fn bulk_index(&self, _actions: &[search_orchestrator::models::IndexAction]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(AppError::Transient("bulk index down".into()))
        } else {
            Ok(())
        }
    }

    fn resolve_index(&self, doc_type: &str, region: &str) -> String {
        format!("search-{doc_type}-{region}-2025.06")
    }
}

#[derive(Default)]
struct RecordingInvalidator {
    keys: Mutex<Vec<String>>,
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate_keys(&self, keys: &[String]) -> Result<()> {
        self.keys.lock().extend_from_slice(keys);
        Ok(())
    }
}

fn change_event(id: &str) -> ChangeEvent {
    let mut document = Map::new();
    document.insert("title".to_string(), json!(format!("Item {id}")));
    document.insert("category".to_string(), json!("laptops"));
    ChangeEvent {
        event_type: ChangeEventType::Create,
        document_id: id.to_string(),
        collection: "documents".to_string(),
        document,
        region: "us-east".to_string(),
        timestamp: Utc::now(),
        version: 1,
    }
}

#[tokio::test]
async fn bulk_overflow_keeps_newest_and_counts_drops() {
    let indexer = Arc::new(FailingIndexer {
        fail: AtomicBool::new(true),
    });
    let processor = StreamProcessor::start(
        indexer,
        None,
        Arc::new(RecordingInvalidator::default()),
        IndexingSettings {
            bulk_size: 2,
            flush_interval: Duration::from_secs(3600),
            max_buffer_size: 4,
            max_async_workers: 8,
        },
    );

    for i in 0..10 {
        processor
            .handle_event(&change_event(&format!("e{i}")))
            .await
            .unwrap();
        assert!(processor.buffered() <= 4, "ceiling breached at event {i}");
    }

    assert_eq!(processor.dropped_total(), 6);
    assert_eq!(processor.buffered(), 4);
}

#[tokio::test]
async fn recovered_backend_drains_requeued_batches() {
    let indexer = Arc::new(FailingIndexer {
        fail: AtomicBool::new(true),
    });
    let processor = StreamProcessor::start(
        indexer.clone(),
        None,
        Arc::new(RecordingInvalidator::default()),
        IndexingSettings {
            bulk_size: 10,
            flush_interval: Duration::from_secs(3600),
            max_buffer_size: 100,
            max_async_workers: 8,
        },
    );

    for i in 0..3 {
        processor
            .handle_event(&change_event(&format!("e{i}")))
            .await
            .unwrap();
    }
    assert!(processor.flush().await.is_err());
    assert_eq!(processor.buffered(), 3);

    indexer.fail.store(false, Ordering::SeqCst);
    processor.stop().await.unwrap();
    assert_eq!(processor.buffered(), 0);
}

// Consumer-side scenario: handler exhaustion leads to exactly one DLQ write
// and a commit-worthy outcome.

struct AlwaysFailingHandler {
    calls: AtomicU32,
}

#[async_trait]
impl EventHandler for AlwaysFailingHandler {
    async fn handle_event(&self, _event: &ChangeEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Transient("processor down".into()))
    }
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<Vec<(String, String)>>>,
}

#[async_trait]
impl DeadLetterSink for RecordingSink {
    async fn publish(
        &self,
        _key: Option<&[u8]>,
        _payload: &[u8],
        headers: Vec<(String, String)>,
    ) -> Result<()> {
        self.published.lock().push(headers);
        Ok(())
    }
}

#[tokio::test]
async fn handler_exhaustion_dead_letters_once_with_headers() {
    let handler = AlwaysFailingHandler {
        calls: AtomicU32::new(0),
    };
    let sink = RecordingSink::default();
    let payload = serde_json::to_vec(&json!({
        "type": "UPDATE",
        "document_id": "doc-9",
        "collection": "documents",
        "document": {"title": "Widget"},
        "region": "us-east",
        "timestamp": Utc::now().to_rfc3339(),
        "version": 4
    }))
    .unwrap();

    let outcome = process_payload(
        &handler,
        &sink,
        2,
        "docs.changes",
        1,
        77,
        Some(b"doc-9"),
        &payload,
    )
    .await;

    // Terminal failure: committed only after the DLQ publish
    assert!(matches!(outcome, MessageOutcome::DeadLettered { .. }));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

    let published = sink.published.lock();
    assert_eq!(published.len(), 1);
    let headers: std::collections::HashMap<_, _> = published[0].iter().cloned().collect();
    assert!(headers.contains_key("dlq_reason"));
    assert_eq!(headers["original_topic"], "docs.changes");
    assert_eq!(headers["original_partition"], "1");
    assert_eq!(headers["original_offset"], "77");
}

#[tokio::test]
async fn processor_feeds_targeted_invalidation() {
    let indexer = Arc::new(FailingIndexer {
        fail: AtomicBool::new(false),
    });
    let invalidator = Arc::new(RecordingInvalidator::default());
    let processor = StreamProcessor::start(
        indexer,
        None,
        invalidator.clone(),
        IndexingSettings {
            bulk_size: 100,
            flush_interval: Duration::from_secs(3600),
            max_buffer_size: 100,
            max_async_workers: 8,
        },
    );

    processor.handle_event(&change_event("d1")).await.unwrap();

    for _ in 0..20 {
        if !invalidator.keys.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let keys = invalidator.keys.lock().clone();
    assert_eq!(keys, vec!["trend:us-east".to_string(), "fc:laptops".to_string()]);
    assert!(keys.iter().all(|k| !k.ends_with('*')));

    processor.stop().await.unwrap();
}
