use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Coarse classification of what the caller is asking for; drives routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Fulltext,
    Autocomplete,
    Analytics,
    Faceted,
}

impl Intent {
    /// Stable string form, part of the cache key space and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Fulltext => "fulltext",
            Intent::Autocomplete => "autocomplete",
            Intent::Analytics => "analytics",
            Intent::Faceted => "faceted",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Relevance,
    Newest,
    Popular,
}

impl SortOrder {
    /// Parse a query-string sort value; unknown values leave sort unset
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relevance" => Some(SortOrder::Relevance),
            "newest" => Some(SortOrder::Newest),
            "popular" => Some(SortOrder::Popular),
            _ => None,
        }
    }
}

/// A single search request as received from the HTTP surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default)]
    pub filters: HashMap<String, Value>,

    #[serde(default)]
    pub page: usize,

    #[serde(default)]
    pub page_size: usize,

    #[serde(default)]
    pub sort: Option<SortOrder>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub force_fresh: bool,

    /// Extra document fields to hydrate from the document store
    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(default)]
    pub request_id: String,
}

/// A ranked search response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
    pub took_ms: i64,
    pub source: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub facets: HashMap<String, Vec<Facet>>,

    pub metadata: ResponseMetadata,
}

/// A single result row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub popularity_score: f64,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub highlights: HashMap<String, Vec<String>>,

    /// Populated by the hydrator only when the caller asked for extra fields
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, Value>,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// A facet value with its count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub value: String,
    pub count: i64,
}

/// Per-response diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub request_id: String,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub cache_hit: bool,

    #[serde(default)]
    pub stale: bool,

    #[serde(default)]
    pub intent: String,

    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub shards_hit: usize,

    #[serde(default)]
    pub timed_out: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spell_correct: String,
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

/// Output of the query parser; consumed by the classifier and the builder,
/// discarded at response time.
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub original: String,
    pub normalized: String,
    pub tokens: Vec<String>,
    pub fields: HashMap<String, String>,
    pub has_wildcard: bool,
    pub has_quotes: bool,
    pub is_phrase: bool,
}
