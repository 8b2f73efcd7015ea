use crate::models::{ParsedQuery, SearchRequest, SortOrder};
use serde_json::{json, Map, Value};

/// Deep pagination guard: `from + size` may never exceed this window.
const MAX_RESULT_WINDOW: usize = 10_000;

const SEARCH_FIELDS: [&str; 3] = ["title^3", "description^2", "tags"];

/// Builds the query documents sent to the primary index.
pub struct QueryBuilder;

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the full search query document: shaped must clause, exact-term
    /// filters, region boost, popularity rescore, pagination, highlighting,
    /// spell suggest, and optional sort.
    pub fn build_search_query(&self, parsed: &ParsedQuery, req: &SearchRequest) -> Value {
        let mut bool_query = Map::new();

        let must = if parsed.is_phrase {
            json!([{
                "multi_match": {
                    "query": parsed.normalized,
                    "type": "phrase",
                    "fields": SEARCH_FIELDS,
                }
            }])
        } else if parsed.has_wildcard {
            json!([{
                "query_string": {
                    "query": parsed.normalized,
                    "fields": SEARCH_FIELDS,
                    "default_operator": "AND",
                }
            }])
        } else {
            json!([{
                "multi_match": {
                    "query": parsed.normalized,
                    "type": "best_fields",
                    "fields": SEARCH_FIELDS,
                    "fuzziness": "AUTO",
                    "tie_breaker": 0.3,
                }
            }])
        };
        bool_query.insert("must".to_string(), must);

        // Exact-term filters: parsed field:value pairs first, then
        // request-level filters.
        let mut filters: Vec<Value> = Vec::new();
        let mut field_names: Vec<&String> = parsed.fields.keys().collect();
        field_names.sort();
        for name in field_names {
            filters.push(json!({"term": {(name.as_str()): parsed.fields[name]}}));
        }
        let mut filter_names: Vec<&String> = req.filters.keys().collect();
        filter_names.sort();
        for name in filter_names {
            filters.push(json!({"term": {(name.as_str()): req.filters[name]}}));
        }
        if !filters.is_empty() {
            bool_query.insert("filter".to_string(), Value::Array(filters));
        }

        if let Some(region) = req.region.as_deref().filter(|r| !r.is_empty()) {
            bool_query.insert(
                "should".to_string(),
                json!([{
                    "term": {
                        "region": {"value": region, "boost": 1.5}
                    }
                }]),
            );
        }

        let (from, size) = bounded_pagination(req.page, req.page_size);

        let mut query = json!({
            "query": {
                "script_score": {
                    "query": {"bool": bool_query},
                    "script": {
                        "source": "_score * (1 + Math.log1p(doc['popularity_score'].value))"
                    }
                }
            },
            "from": from,
            "size": size,
            "highlight": {
                "fields": {
                    "title": {},
                    "description": {"fragment_size": 150},
                },
                "pre_tags": ["<em>"],
                "post_tags": ["</em>"],
            },
            "suggest": {
                "text": parsed.original,
                "spell_suggest": {
                    "phrase": {
                        "field": "title.suggest",
                        "size": 1,
                        "gram_size": 3,
                        "confidence": 1.0,
                    }
                }
            },
        });

        match req.sort {
            Some(SortOrder::Newest) => {
                query["sort"] = json!([
                    {"created_at": {"order": "desc"}},
                    {"_score": {"order": "desc"}},
                ]);
            }
            Some(SortOrder::Popular) => {
                query["sort"] = json!([
                    {"popularity_score": {"order": "desc"}},
                    {"_score": {"order": "desc"}},
                ]);
            }
            // Relevance and unset leave the default score ordering
            _ => {}
        }

        query
    }

    /// Completion-suggester document for the autocomplete path
    pub fn build_autocomplete_query(&self, prefix: &str, size: usize) -> Value {
        json!({
            "size": 0,
            "suggest": {
                "autocomplete": {
                    "prefix": prefix,
                    "completion": {
                        "field": "title.autocomplete",
                        "size": size,
                        "skip_duplicates": true,
                        "fuzzy": {"fuzziness": "AUTO"},
                    }
                }
            }
        })
    }
}

/// Clamp `(page, page_size)` so that `from + size <= MAX_RESULT_WINDOW`,
/// capping the offset rather than failing the request.
fn bounded_pagination(page: usize, page_size: usize) -> (usize, usize) {
    let size = page_size.min(MAX_RESULT_WINDOW);
    let from = page.saturating_mul(size).min(MAX_RESULT_WINDOW - size);
    (from, size)
}
