use crate::models::{Intent, ParsedQuery};
use std::collections::HashSet;

/// Leading tokens that route a query to the analytics store
const ANALYTICS_KEYWORDS: [&str; 12] = [
    "count",
    "total",
    "average",
    "avg",
    "sum",
    "stats",
    "trending",
    "report",
    "analytics",
    "aggregate",
    "histogram",
    "breakdown",
];

/// Leading tokens (or field names) that route a query to the faceted path
const FACETED_KEYWORDS: [&str; 3] = ["filter", "facet", "group"];

const AUTOCOMPLETE_MAX_LEN: usize = 3;

/// Maps a parsed query to an intent with ordered first-match-wins rules.
///
/// Only the leading token is inspected for the keyword rules: `popular
/// laptops` is a fulltext query even though `popular` could read as an
/// analytics word elsewhere in a sentence.
pub struct IntentClassifier {
    analytics_keywords: HashSet<&'static str>,
    faceted_keywords: HashSet<&'static str>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {
            analytics_keywords: ANALYTICS_KEYWORDS.iter().copied().collect(),
            faceted_keywords: FACETED_KEYWORDS.iter().copied().collect(),
        }
    }

    pub fn classify(&self, parsed: &ParsedQuery) -> Intent {
        if parsed.normalized.is_empty() {
            return Intent::Fulltext;
        }

        // Short queries are prefix lookups
        if parsed.tokens.len() <= 1 && parsed.normalized.len() <= AUTOCOMPLETE_MAX_LEN {
            return Intent::Autocomplete;
        }

        if let Some(first) = parsed.tokens.first() {
            if self.analytics_keywords.contains(first.as_str()) {
                return Intent::Analytics;
            }
            if self.faceted_keywords.contains(first.as_str()) {
                return Intent::Faceted;
            }
        }

        if parsed
            .fields
            .keys()
            .any(|k| self.faceted_keywords.contains(k.to_lowercase().as_str()))
        {
            return Intent::Faceted;
        }

        Intent::Fulltext
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::QueryParser;

    fn classify(q: &str) -> Intent {
        let parsed = QueryParser::new().parse(q);
        IntentClassifier::new().classify(&parsed)
    }

    #[test]
    fn test_empty_query_is_fulltext() {
        assert_eq!(classify(""), Intent::Fulltext);
        assert_eq!(classify("   "), Intent::Fulltext);
    }

    #[test]
    fn test_short_query_is_autocomplete() {
        assert_eq!(classify("la"), Intent::Autocomplete);
        assert_eq!(classify("x"), Intent::Autocomplete);
    }

    #[test]
    fn test_four_chars_is_not_autocomplete() {
        assert_eq!(classify("lapt"), Intent::Fulltext);
    }

    #[test]
    fn test_leading_analytics_keyword() {
        assert_eq!(classify("count laptops sold"), Intent::Analytics);
        assert_eq!(classify("trending searches today"), Intent::Analytics);
        assert_eq!(classify("breakdown of categories"), Intent::Analytics);
    }

    #[test]
    fn test_analytics_keyword_must_lead() {
        // `popular` and `total` appearing later must not reroute the query
        assert_eq!(classify("popular laptops"), Intent::Fulltext);
        assert_eq!(classify("laptops total price"), Intent::Fulltext);
    }

    #[test]
    fn test_leading_faceted_keyword() {
        assert_eq!(classify("filter laptops red"), Intent::Faceted);
        assert_eq!(classify("group results category"), Intent::Faceted);
    }

    #[test]
    fn test_faceted_field_key() {
        assert_eq!(classify("laptops filter:price"), Intent::Faceted);
        assert_eq!(classify("laptops facet:brand"), Intent::Faceted);
    }

    #[test]
    fn test_non_faceted_field_key_stays_fulltext() {
        assert_eq!(classify("gaming laptops brand:acme"), Intent::Fulltext);
    }

    #[test]
    fn test_default_is_fulltext() {
        assert_eq!(classify("mechanical keyboard deals"), Intent::Fulltext);
    }
}
