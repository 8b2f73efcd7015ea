//! Core data model: search requests and responses, parsed queries, and the
//! change/index/analytics events flowing through the indexing pipeline.

mod events;
mod search;

pub use events::{AnalyticsEvent, ChangeEvent, ChangeEventType, IndexAction, IndexActionType};
pub use search::{
    Facet, Intent, ParsedQuery, ResponseMetadata, SearchRequest, SearchResponse, SearchResult,
    SortOrder,
};
