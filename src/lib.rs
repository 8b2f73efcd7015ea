//! Search orchestration core for a high-scale search service.
//!
//! The read path parses, classifies, and routes queries across the primary
//! index, the analytics store, the result cache, and the document store,
//! degrading through a five-level fallback chain instead of failing. The
//! write path consumes change events from a broker and keeps the primary
//! index in step with bulk-buffered writes, targeted cache invalidation, and
//! a dead-letter queue.

pub mod api;
pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod indexing;
pub mod models;
pub mod observability;
pub mod resilience;
pub mod search;
