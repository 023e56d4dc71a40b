//! Tier evaluators
//!
//! - [`tier1`]: lexical/regex checks, synchronous, zero cost
//! - [`tier2`]: statistical/structural checks, synchronous, zero cost
//! - [`tier3`]: LLM-backed checks, batched, rate-limited, audited
//!
//! Which tier a rule runs in is ruleset configuration. Tiers 1 and 2 share
//! one dispatcher over the deterministic validation types, so a phrase rule
//! assigned to tier 2 (or a statistical rule assigned to tier 1) still runs.

pub mod tier1;
pub mod tier2;
pub mod tier3;

use std::time::Instant;

use crate::services::rule_store::CompiledRule;
use crate::types::{Tier, TierResult, ValidationType, Violation};

/// Violations and optional named metric produced by one deterministic rule
#[derive(Debug, Default)]
pub(crate) struct RuleOutcome {
    pub violations: Vec<Violation>,
    pub metric: Option<(&'static str, f64)>,
}

/// Run one deterministic rule over content
pub(crate) fn check_rule(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    match compiled.rule.validation_type {
        ValidationType::Phrase | ValidationType::Regex => tier1::lexical_matches(compiled, content),
        ValidationType::UnsupportedMetric => tier2::unsupported_metrics(compiled, content),
        ValidationType::SentenceLength => tier2::sentence_length(compiled, content),
        ValidationType::RepetitionRatio => tier2::repetition_ratio(compiled, content),
        ValidationType::FaqBlock => tier2::faq_block(compiled, content),
        ValidationType::HeadingHierarchy => tier2::heading_hierarchy(compiled, content),
        ValidationType::VoiceConsistency => tier2::voice_consistency(compiled, content),
        // Rejected at ruleset compile time for tiers 1 and 2
        ValidationType::LlmCheck => RuleOutcome::default(),
    }
}

/// Run every rule, collecting violations and metrics into a tier result
pub(crate) fn run_deterministic(tier: Tier, rules: &[&CompiledRule], content: &str) -> TierResult {
    let start = Instant::now();
    let mut result = TierResult::empty(tier);

    for compiled in rules {
        let outcome = check_rule(compiled, content);
        result.rules_checked += 1;
        if outcome.violations.is_empty() {
            result.rules_passed += 1;
        } else {
            tracing::debug!(
                tier = tier.number(),
                rule_id = %compiled.rule.rule_id,
                violations = outcome.violations.len(),
                "Rule violated"
            );
        }
        if let Some((name, value)) = outcome.metric {
            result.sub_scores.insert(name.to_string(), value);
        }
        result.violations.extend(outcome.violations);
    }

    result.latency_ms = start.elapsed().as_millis() as u64;
    result
}

/// Split text into sentences, returning slices of the input
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace (or the end of
/// the text) and at every line break, so "40.5%" stays intact and markdown
/// headings and list items stand alone.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        let end = i + c.len_utf8();
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => text[end..].chars().next().map_or(true, char::is_whitespace),
            _ => false,
        };
        if boundary {
            push_sentence(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence<'a>(sentences: &mut Vec<&'a str>, raw: &'a str) {
    let trimmed = raw.trim();
    if trimmed.chars().any(char::is_alphanumeric) {
        sentences.push(trimmed);
    }
}

/// Lowercased words (letters, digits, apostrophes)
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '’'))
        .map(|w| w.trim_matches(|c| c == '\'' || c == '’'))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Byte offset of a slice inside the string it was taken from
pub(crate) fn offset_in(haystack: &str, slice: &str) -> usize {
    (slice.as_ptr() as usize).saturating_sub(haystack.as_ptr() as usize)
}

/// True for markdown heading lines
pub(crate) fn is_heading(line: &str) -> bool {
    heading_level(line).is_some()
}

/// Level of a markdown heading line (`# Title` → 1)
pub(crate) fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
        Some(hashes)
    } else {
        None
    }
}
