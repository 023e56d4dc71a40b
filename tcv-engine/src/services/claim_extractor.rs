//! Claim candidate extraction
//!
//! Picks the sentences of the content that assert something checkable:
//! figures (digits, percentages, currency) or absolute language ("always",
//! "guaranteed", "#1"). Tier 3 asks providers whether the content supports
//! each candidate; only candidates traced to an audit call are surfaced.

use crate::tiers::{is_heading, split_sentences, words};

/// Candidates per assessment; longer content is sampled from the top
pub const MAX_CANDIDATES: usize = 40;

const ABSOLUTE_WORDS: &[&str] = &[
    "always", "never", "guaranteed", "guarantee", "guarantees", "proven", "every", "everyone",
    "nobody", "best", "only", "unbeatable", "perfect", "instantly", "forever", "100%",
];

const ABSOLUTE_PHRASES: &[&str] = &["#1", "number one", "no one", "all customers", "risk-free", "zero risk"];

/// True when the text uses absolute language
pub fn is_absolute(text: &str) -> bool {
    let lower = text.to_lowercase();
    if ABSOLUTE_PHRASES.iter().any(|p| lower.contains(p)) || lower.contains("100%") {
        return true;
    }
    words(&lower)
        .iter()
        .any(|w| ABSOLUTE_WORDS.contains(&w.as_str()))
}

fn has_figure(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit() || matches!(c, '%' | '$' | '€' | '£'))
}

/// Checkable sentences in document order, deduplicated
pub fn extract_claims(content: &str) -> Vec<String> {
    let mut claims: Vec<String> = Vec::new();
    for sentence in split_sentences(content) {
        if is_heading(sentence) || words(sentence).len() < 3 {
            continue;
        }
        if !(has_figure(sentence) || is_absolute(sentence)) {
            continue;
        }
        if claims.iter().any(|c| c == sentence) {
            continue;
        }
        claims.push(sentence.to_string());
        if claims.len() == MAX_CANDIDATES {
            break;
        }
    }
    claims
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_figures_and_absolutes() {
        let content = "# Results\nLoad time dropped by 40% in March. \
                       We love our customers. Our support is always available. \
                       Plans start at $9 per month.";
        assert_eq!(
            extract_claims(content),
            vec![
                "Load time dropped by 40% in March.",
                "Our support is always available.",
                "Plans start at $9 per month."
            ]
        );
    }

    #[test]
    fn test_absolute_detection() {
        assert!(is_absolute("We are the #1 choice for teams"));
        assert!(is_absolute("Guaranteed uptime"));
        assert!(is_absolute("100% satisfaction"));
        assert!(!is_absolute("Most teams see faster builds"));
    }

    #[test]
    fn test_duplicates_and_fragments_skipped() {
        let content = "Up 5%. Revenue grew 12% in 2024. Revenue grew 12% in 2024.";
        assert_eq!(extract_claims(content), vec!["Revenue grew 12% in 2024."]);
    }
}
