//! Two-stage text filter: organization gate, then OR-combined keyword search.
//!
//! The organization substring check runs first; keyword search and snippet
//! extraction only happen for texts that pass it. All comparisons are
//! case-insensitive. Offsets are in characters, not bytes, so the context
//! window clamps cleanly on multi-byte text.

use crate::config::FilterConfig;

/// Characters of context kept on each side of a keyword hit.
const SNIPPET_RADIUS: usize = 250;

/// One keyword hit with its context snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub keyword: String,
    pub snippet: String,
}

/// Find keyword hits in a text blob for one filter.
///
/// Returns an empty list when the filter's organization substring is absent.
/// Otherwise, each keyword contributes at most one hit (its first occurrence),
/// in the keyword set's configured order.
pub fn find_hits(text: &str, filter: &FilterConfig) -> Vec<Hit> {
    let chars: Vec<char> = text.chars().collect();
    let lower = lowercase_chars(&chars);

    let organization = lowercase_str(&filter.organization_contains);
    if find_sub(&lower, &organization).is_none() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for keyword in &filter.keywords_any {
        let needle = lowercase_str(keyword);
        if let Some(idx) = find_sub(&lower, &needle) {
            let start = idx.saturating_sub(SNIPPET_RADIUS);
            let end = (idx + SNIPPET_RADIUS).min(chars.len());
            let snippet: String = chars[start..end].iter().collect();
            hits.push(Hit {
                keyword: keyword.clone(),
                snippet: snippet.trim().to_string(),
            });
        }
    }
    hits
}

/// Per-character lowercase, keeping a 1:1 index mapping with the original
/// so hit positions can slice the original text.
fn lowercase_chars(chars: &[char]) -> Vec<char> {
    chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect()
}

fn lowercase_str(s: &str) -> Vec<char> {
    let chars: Vec<char> = s.chars().collect();
    lowercase_chars(&chars)
}

/// First occurrence of `needle` in `haystack`, as a character offset.
fn find_sub(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(organization: &str, keywords: &[&str]) -> FilterConfig {
        FilterConfig {
            name: "test".to_string(),
            section: "DO1".to_string(),
            organization_contains: organization.to_string(),
            keywords_any: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn no_organization_means_no_hits() {
        let f = filter("Transit Agency", &["authorization"]);
        let hits = find_hits("the authorization was granted to someone else", &f);
        assert!(hits.is_empty());
    }

    #[test]
    fn keyword_hit_is_case_insensitive() {
        let f = filter("transit agency", &["AUTHORIZATION"]);
        let hits = find_hits("The Transit Agency published an authorization today.", &f);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].keyword, "AUTHORIZATION");
        assert!(hits[0].snippet.contains("authorization"));
    }

    #[test]
    fn snippet_clamps_at_text_start() {
        let f = filter("agency", &["agency"]);
        let text = "agency decree text";
        let hits = find_hits(text, &f);
        assert_eq!(hits.len(), 1);
        // Hit at position 0: window is [0, min(len, 250)], the whole text.
        assert_eq!(hits[0].snippet, text);
    }

    #[test]
    fn snippet_clamps_at_text_end() {
        let f = filter("agency", &["decree"]);
        let prefix = "x".repeat(300);
        let text = format!("{} agency decree", prefix);
        let hits = find_hits(&text, &f);
        assert_eq!(hits.len(), 1);
        let snippet = &hits[0].snippet;
        assert!(snippet.ends_with("decree"));
        // 250 chars before the hit plus the tail of the text.
        assert!(text.contains(snippet));
        assert!(snippet.chars().count() <= 2 * SNIPPET_RADIUS);
    }

    #[test]
    fn first_occurrence_only_per_keyword() {
        let f = filter("agency", &["decree"]);
        let text = "agency decree one, then decree two";
        let hits = find_hits(text, &f);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn hits_follow_configured_keyword_order() {
        let f = filter("agency", &["second", "first"]);
        let text = "agency: first thing mentioned, second thing mentioned";
        let hits = find_hits(text, &f);
        let keywords: Vec<&str> = hits.iter().map(|h| h.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["second", "first"]);
    }

    #[test]
    fn snippet_is_substring_of_original_text() {
        let f = filter("agency", &["concession"]);
        let body = "padding ".repeat(100);
        let text = format!("{}the agency granted a concession here{}", body, body);
        let hits = find_hits(&text, &f);
        assert_eq!(hits.len(), 1);
        assert!(text.contains(&hits[0].snippet));
        assert!(hits[0].snippet.contains("concession"));
    }

    #[test]
    fn multiple_keywords_each_reported_once() {
        let f = filter("agency", &["decree", "concession", "missing"]);
        let text = "agency issued a decree and a concession";
        let hits = find_hits(text, &f);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].keyword, "decree");
        assert_eq!(hits[1].keyword, "concession");
    }
}
