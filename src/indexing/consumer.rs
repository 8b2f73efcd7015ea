use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use crate::models::ChangeEvent;
use crate::observability::metrics::{INDEXING_EVENTS_TOTAL, INDEXING_LAG};
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processor capability consumed by the broker loop
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &ChangeEvent) -> Result<()>;
}

#[async_trait]
impl EventHandler for crate::indexing::StreamProcessor {
    async fn handle_event(&self, event: &ChangeEvent) -> Result<()> {
        // Delegates to the inherent method of the same name
        crate::indexing::StreamProcessor::handle_event(self, event).await
    }
}

/// Sideline sink for messages that could not be processed
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(
        &self,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: Vec<(String, String)>,
    ) -> Result<()>;
}

/// Terminal disposition of one consumed message. Either way the offset is
/// committed: after a DLQ publish, redelivery buys nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Handled,
    DeadLettered { reason: String },
}

const HANDLER_BACKOFF_BASE: Duration = Duration::from_millis(100);
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Run the handler up to `max_retries` attempts with doubling backoff
/// (100ms, 200ms, 400ms, ...). Returns the last error on exhaustion.
pub async fn deliver_with_retry(
    handler: &dyn EventHandler,
    event: &ChangeEvent,
    max_retries: u32,
) -> Result<()> {
    let attempts = max_retries.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match handler.handle_event(event).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(
                    doc_id = %event.document_id,
                    attempt = attempt + 1,
                    error = %e,
                    "handler error, retrying"
                );
                last_err = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(HANDLER_BACKOFF_BASE * (1 << attempt)).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AppError::Internal("handler retry without attempts".into())))
}

/// Diagnostic headers attached to every DLQ message
pub fn dlq_headers(
    reason: &str,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Vec<(String, String)> {
    vec![
        ("dlq_reason".to_string(), reason.to_string()),
        ("original_topic".to_string(), topic.to_string()),
        ("original_partition".to_string(), partition.to_string()),
        ("original_offset".to_string(), offset.to_string()),
    ]
}

/// Decide the fate of one raw message: parse, track lag, deliver with
/// retries, dead-letter on terminal failure. The caller commits the offset
/// for every outcome.
pub async fn process_payload(
    handler: &dyn EventHandler,
    dlq: &dyn DeadLetterSink,
    max_retries: u32,
    topic: &str,
    partition: i32,
    offset: i64,
    key: Option<&[u8]>,
    payload: &[u8],
) -> MessageOutcome {
    let event: ChangeEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            error!(partition, offset, error = %e, "unparseable change event");
            let reason = "unmarshal-error".to_string();
            if let Err(e) = dlq
                .publish(key, payload, dlq_headers(&reason, topic, partition, offset))
                .await
            {
                error!(offset, error = %e, "failed to publish to DLQ");
            }
            INDEXING_EVENTS_TOTAL
                .with_label_values(&["unknown", "dlq"])
                .inc();
            return MessageOutcome::DeadLettered { reason };
        }
    };

    let lag = (Utc::now() - event.timestamp).num_milliseconds().max(0) as f64 / 1000.0;
    INDEXING_LAG.set(lag);

    match deliver_with_retry(handler, &event, max_retries).await {
        Ok(()) => {
            INDEXING_EVENTS_TOTAL
                .with_label_values(&[event.event_type.as_str(), "success"])
                .inc();
            MessageOutcome::Handled
        }
        Err(e) => {
            error!(
                doc_id = %event.document_id,
                error = %e,
                "handler failed after retries, sending to DLQ"
            );
            let reason = format!("handler error after retries: {e}");
            if let Err(e) = dlq
                .publish(key, payload, dlq_headers(&reason, topic, partition, offset))
                .await
            {
                error!(offset, error = %e, "failed to publish to DLQ");
            }
            INDEXING_EVENTS_TOTAL
                .with_label_values(&[event.event_type.as_str(), "dlq"])
                .inc();
            MessageOutcome::DeadLettered { reason }
        }
    }
}

/// Kafka producer for the DLQ topic
pub struct KafkaDeadLetterSink {
    producer: FutureProducer,
    topic: String,
}

#[async_trait]
impl DeadLetterSink for KafkaDeadLetterSink {
    async fn publish(
        &self,
        key: Option<&[u8]>,
        payload: &[u8],
        headers: Vec<(String, String)>,
    ) -> Result<()> {
        let mut owned = OwnedHeaders::new();
        for (name, value) in &headers {
            owned = owned.insert(Header {
                key: name,
                value: Some(value.as_str()),
            });
        }

        let mut record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&self.topic).payload(payload).headers(owned);
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| AppError::Transient(format!("dlq publish: {e}")))?;
        Ok(())
    }
}

/// Pulls change events one at a time, feeds them to the stream processor,
/// and commits the offset exactly once per message after the outcome is
/// decided.
pub struct ChangeConsumer {
    consumer: StreamConsumer,
    dlq: KafkaDeadLetterSink,
    handler: Arc<dyn EventHandler>,
    cfg: KafkaConfig,
}

impl ChangeConsumer {
    pub fn new(cfg: &KafkaConfig, handler: Arc<dyn EventHandler>) -> Result<Self> {
        let brokers = cfg.brokers.join(",");

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &cfg.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| AppError::Configuration(format!("kafka consumer: {e}")))?;

        consumer
            .subscribe(&[cfg.topic_changes.as_str()])
            .map_err(|e| AppError::Configuration(format!("kafka subscribe: {e}")))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| AppError::Configuration(format!("kafka dlq producer: {e}")))?;

        info!(
            brokers = %brokers,
            topic = %cfg.topic_changes,
            group = %cfg.consumer_group,
            "kafka consumer created"
        );

        Ok(Self {
            consumer,
            dlq: KafkaDeadLetterSink {
                producer,
                topic: cfg.topic_dlq.clone(),
            },
            handler,
            cfg: cfg.clone(),
        })
    }

    /// Consume until the token fires. Fetch errors back off for a second
    /// rather than spinning against a flaky broker.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("kafka consumer started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("kafka consumer shutting down");
                    return;
                }
                msg = self.consumer.recv() => msg,
            };

            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    error!(error = %e, "fetching kafka message");
                    tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let start = std::time::Instant::now();
            let topic = message.topic().to_string();
            let partition = message.partition();
            let offset = message.offset();

            let outcome = process_payload(
                self.handler.as_ref(),
                &self.dlq,
                self.cfg.max_retries,
                &topic,
                partition,
                offset,
                message.key(),
                message.payload().unwrap_or_default(),
            )
            .await;

            if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                error!(offset, error = %e, "committing kafka message");
            }

            debug!(
                partition,
                offset,
                outcome = ?outcome,
                duration_ms = start.elapsed().as_millis() as u64,
                "message processed"
            );
        }
    }
}
