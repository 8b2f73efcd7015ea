use crate::models::AnalyticsEvent;
use crate::observability::metrics::SLOW_QUERY_TOTAL;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Sink for query-performance records. Implemented by the analytics store;
/// the detector only sees this narrow capability.
#[async_trait]
pub trait QueryPerformanceWriter: Send + Sync {
    async fn write_query_performance(&self, event: &AnalyticsEvent) -> crate::error::Result<()>;
}

/// Latency classification against the warn/critical thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// One observed query execution
#[derive(Debug, Clone)]
pub struct SlowQuerySample<'a> {
    pub query: &'a str,
    pub query_type: &'a str,
    pub duration: Duration,
    pub total_hits: i64,
    pub shards_hit: usize,
    pub timed_out: bool,
    pub trace_id: &'a str,
}

const ANALYTICS_WRITE_DEADLINE: Duration = Duration::from_secs(2);

/// Stateless, re-entrant slow-query detector. Queries at or under the warning
/// threshold exit on the fast path with no logging and no analytics write.
pub struct SlowQueryDetector {
    warning_threshold: Duration,
    critical_threshold: Duration,
    analytics_writer: Option<Arc<dyn QueryPerformanceWriter>>,
}

impl SlowQueryDetector {
    pub fn new(
        warning_threshold: Duration,
        critical_threshold: Duration,
        analytics_writer: Option<Arc<dyn QueryPerformanceWriter>>,
    ) -> Self {
        Self {
            warning_threshold,
            critical_threshold,
            analytics_writer,
        }
    }

    /// Classify a sample and, for outliers, count it, log it, and ship it to
    /// the analytics store on a detached task with a bounded deadline.
    pub fn intercept(&self, sample: SlowQuerySample<'_>) {
        if sample.duration <= self.warning_threshold {
            return;
        }

        let severity = self.classify_severity(sample.duration);
        let query_hash = hash_query_for_log(sample.query);

        SLOW_QUERY_TOTAL
            .with_label_values(&[severity.as_str(), sample.query_type])
            .inc();

        warn!(
            trace_id = %sample.trace_id,
            query_hash = %query_hash,
            query_type = %sample.query_type,
            duration_ms = sample.duration.as_millis() as u64,
            total_hits = sample.total_hits,
            shards_hit = sample.shards_hit,
            timed_out = sample.timed_out,
            severity = severity.as_str(),
            "slow query detected"
        );

        if let Some(writer) = &self.analytics_writer {
            let writer = writer.clone();
            let trace_id = sample.trace_id.to_string();
            let event = AnalyticsEvent {
                event_type: "query_performance".to_string(),
                query_hash,
                query_type: sample.query_type.to_string(),
                duration_ms: sample.duration.as_secs_f64() * 1000.0,
                total_hits: sample.total_hits,
                shards_hit: sample.shards_hit,
                timed_out: sample.timed_out,
                timestamp: Utc::now(),
                trace_id: trace_id.clone(),
                source: "orchestrator".to_string(),
            };

            tokio::spawn(async move {
                let write = writer.write_query_performance(&event);
                match tokio::time::timeout(ANALYTICS_WRITE_DEADLINE, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(trace_id = %trace_id, error = %e, "failed to write query analytics");
                    }
                    Err(_) => {
                        error!(trace_id = %trace_id, "query analytics write timed out");
                    }
                }
            });
        }
    }

    /// Monotone non-decreasing in duration
    pub fn classify_severity(&self, duration: Duration) -> Severity {
        if duration > self.critical_threshold {
            Severity::Critical
        } else if duration > self.warning_threshold {
            Severity::Warning
        } else {
            Severity::Normal
        }
    }
}

fn hash_query_for_log(query: &str) -> String {
    let mut h: u64 = 0;
    for c in query.chars() {
        h = h.wrapping_mul(31).wrapping_add(c as u64);
    }
    format!("{h:016x}")
}
