//! Metrics registry and slow-query detection.

pub mod metrics;
mod slow_query;

pub use metrics::{gather_metrics, init_metrics};
pub use slow_query::{QueryPerformanceWriter, Severity, SlowQueryDetector, SlowQuerySample};
