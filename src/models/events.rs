use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document mutation emitted by the source-of-truth store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub event_type: ChangeEventType,

    pub document_id: String,

    pub collection: String,

    /// Full document body; empty for deletes
    #[serde(default)]
    pub document: Map<String, Value>,

    #[serde(default)]
    pub region: String,

    pub timestamp: DateTime<Utc>,

    /// Monotonically increasing per document
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEventType {
    #[serde(rename = "CREATE")]
    Create,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::Create => "CREATE",
            ChangeEventType::Update => "UPDATE",
            ChangeEventType::Delete => "DELETE",
        }
    }
}

/// A single bulk-index operation against the primary index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAction {
    pub action: IndexActionType,

    pub index: String,

    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,

    /// Whitelisted searchable projection; absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, Value>>,

    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexActionType {
    Index,
    Delete,
}

impl IndexActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexActionType::Index => "index",
            IndexActionType::Delete => "delete",
        }
    }
}

/// A query-performance record shipped to the analytics store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub query_hash: String,
    pub query_type: String,
    pub duration_ms: f64,
    pub total_hits: i64,
    pub shards_hit: usize,
    pub timed_out: bool,
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    #[serde(default)]
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_event_wire_format() {
        let payload = json!({
            "type": "CREATE",
            "document_id": "doc-1",
            "collection": "documents",
            "document": {"title": "Widget", "region": "us-east"},
            "region": "us-east",
            "timestamp": "2025-06-01T12:00:00Z",
            "version": 3
        });

        let event: ChangeEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.event_type, ChangeEventType::Create);
        assert_eq!(event.document_id, "doc-1");
        assert_eq!(event.document["title"], "Widget");
        assert_eq!(event.version, 3);
    }

    #[test]
    fn test_delete_event_has_empty_document() {
        let payload = json!({
            "type": "DELETE",
            "document_id": "doc-2",
            "collection": "documents",
            "timestamp": "2025-06-01T12:00:00Z"
        });

        let event: ChangeEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.event_type, ChangeEventType::Delete);
        assert!(event.document.is_empty());
    }

    #[test]
    fn test_index_action_delete_omits_body() {
        let action = IndexAction {
            action: IndexActionType::Delete,
            index: "search-general-us-east-2025.06".into(),
            id: "doc-2".into(),
            routing: None,
            body: None,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "delete");
        assert!(json.get("body").is_none());
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let payload = json!({
            "type": "UPSERT",
            "document_id": "doc-3",
            "collection": "documents",
            "timestamp": "2025-06-01T12:00:00Z"
        });
        assert!(serde_json::from_value::<ChangeEvent>(payload).is_err());
    }
}
