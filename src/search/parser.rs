use crate::models::ParsedQuery;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    /// Matches explicit field:value syntax. The field name must start at a
    /// word boundary with a letter and be at least two characters, which
    /// keeps time-like patterns (10:30) out.
    static ref FIELD_PATTERN: Regex =
        Regex::new(r"(?:^|\s)([a-zA-Z][a-zA-Z_]+):(\S+)").expect("field pattern");

    static ref QUOTE_PATTERN: Regex = Regex::new(r#""([^"]+)""#).expect("quote pattern");

    static ref MULTI_SPACE: Regex = Regex::new(r"\s+").expect("whitespace pattern");
}

/// URI-scheme prefixes that must not be treated as field:value queries
const EXCLUDED_SCHEMES: [&str; 5] = ["http", "https", "ftp", "ftps", "mailto"];

/// Stop words removed during tokenization
const STOP_WORDS: [&str; 25] = [
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
    "it", "this", "that", "are", "was", "be", "has", "had", "do", "does",
];

/// Pure query parser: same input, same output, no state beyond the word sets.
pub struct QueryParser {
    stop_words: HashSet<&'static str>,
    excluded_schemes: HashSet<&'static str>,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser {
    pub fn new() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().copied().collect(),
            excluded_schemes: EXCLUDED_SCHEMES.iter().copied().collect(),
        }
    }

    pub fn parse(&self, raw_query: &str) -> ParsedQuery {
        let mut parsed = ParsedQuery {
            original: raw_query.to_string(),
            ..Default::default()
        };

        let mut query = raw_query.trim().to_string();
        if query.is_empty() {
            return parsed;
        }

        // Extract field:value pairs, skipping URL-like schemes
        let scan = query.clone();
        for caps in FIELD_PATTERN.captures_iter(&scan) {
            let field = caps[1].trim().to_string();
            if self.excluded_schemes.contains(field.to_lowercase().as_str()) {
                continue;
            }
            parsed.fields.insert(field, caps[2].to_string());
        }
        // Strip only the accepted pairs from the residual query
        for (field, value) in &parsed.fields {
            query = query.replacen(&format!("{field}:{value}"), "", 1);
        }

        // Quoted spans mark a phrase query
        if QUOTE_PATTERN.is_match(&query) {
            parsed.has_quotes = true;
            parsed.is_phrase = true;
        }

        parsed.has_wildcard = query.contains('*') || query.contains('?');

        // Normalize: lowercase, collapse whitespace runs, trim
        let normalized = query.to_lowercase();
        let normalized = MULTI_SPACE.replace_all(&normalized, " ");
        parsed.normalized = normalized.trim().to_string();

        // Tokenize, trimming edge punctuation but keeping wildcard characters
        for word in parsed.normalized.split_whitespace() {
            let cleaned = word
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '*' && c != '?');
            if !cleaned.is_empty() && !self.stop_words.contains(cleaned) {
                parsed.tokens.push(cleaned.to_string());
            }
        }

        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(q: &str) -> ParsedQuery {
        QueryParser::new().parse(q)
    }

    #[test]
    fn test_empty_query() {
        let p = parse("");
        assert!(p.normalized.is_empty());
        assert!(p.tokens.is_empty());
        assert!(p.fields.is_empty());

        let p = parse("   ");
        assert!(p.normalized.is_empty());
    }

    #[test]
    fn test_basic_tokenization_removes_stop_words() {
        let p = parse("the best laptop for gaming");
        assert_eq!(p.normalized, "the best laptop for gaming");
        assert_eq!(p.tokens, vec!["best", "laptop", "gaming"]);
    }

    #[test]
    fn test_field_value_extraction() {
        let p = parse("laptop category:electronics brand:acme");
        assert_eq!(p.fields.get("category").map(String::as_str), Some("electronics"));
        assert_eq!(p.fields.get("brand").map(String::as_str), Some("acme"));
        assert_eq!(p.tokens, vec!["laptop"]);
    }

    #[test]
    fn test_url_schemes_are_not_fields() {
        let p = parse("docs https://example.com/page");
        assert!(p.fields.is_empty());
        // The URL stays in the residual query
        assert!(p.normalized.contains("https://example.com/page"));
    }

    #[test]
    fn test_single_letter_prefix_is_not_a_field() {
        let p = parse("meet at 10:30 a:b");
        assert!(!p.fields.contains_key("a"));
        assert!(!p.fields.contains_key("10"));
    }

    #[test]
    fn test_quoted_phrase_detection() {
        let p = parse(r#""gaming laptop" cheap"#);
        assert!(p.has_quotes);
        assert!(p.is_phrase);

        let p = parse("gaming laptop");
        assert!(!p.is_phrase);
    }

    #[test]
    fn test_wildcard_detection_and_preservation() {
        let p = parse("lap* top?");
        assert!(p.has_wildcard);
        assert_eq!(p.tokens, vec!["lap*", "top?"]);
    }

    #[test]
    fn test_wildcard_in_field_value_only_is_not_residual() {
        let p = parse("laptop color:re*d");
        assert_eq!(p.fields.get("color").map(String::as_str), Some("re*d"));
        assert!(!p.has_wildcard);
    }

    #[test]
    fn test_normalization_collapses_whitespace() {
        let p = parse("  Gaming   LAPTOP \t deals ");
        assert_eq!(p.normalized, "gaming laptop deals");
    }

    #[test]
    fn test_punctuation_trimmed_from_tokens() {
        let p = parse("laptop, (cheap) deals!");
        assert_eq!(p.tokens, vec!["laptop", "cheap", "deals"]);
    }

    #[test]
    fn test_parser_is_idempotent_on_normalized() {
        let parser = QueryParser::new();
        for q in ["Gaming  Laptop", "the \"best\" deal", "cat:toys red*"] {
            let once = parser.parse(q);
            let twice = parser.parse(&once.normalized);
            assert_eq!(once.normalized, twice.normalized, "query: {q}");
        }
    }

    #[test]
    fn test_tokens_match_normalized_words() {
        let p = parse("The Quick Brown Fox!");
        // Tokens are the non-stop-word, punctuation-stripped lowercase words
        assert_eq!(p.tokens, vec!["quick", "brown", "fox"]);
    }
}
