//! Indexing write path: the bulk-buffered stream processor and the broker
//! consumer that feeds it.

mod consumer;
mod processor;

pub use consumer::{
    deliver_with_retry, dlq_headers, process_payload, ChangeConsumer, DeadLetterSink, EventHandler,
    MessageOutcome,
};
pub use processor::{build_invalidation_keys, IndexingSettings, StreamProcessor};
