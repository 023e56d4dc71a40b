//! Tier 2: statistical and structural checks
//!
//! Deterministic and synchronous, no paid calls. Every check reports a named
//! sub-score (0-100) next to its violations; the tier aggregate is
//! 100 minus the penalties of the violated rules, and falls below the
//! configured hard-fail threshold only for content that is structurally poor.

use std::collections::{HashMap, HashSet};

use super::{heading_level, is_heading, offset_in, run_deterministic, split_sentences, words, RuleOutcome};
use crate::services::rule_store::CompiledRule;
use crate::types::{Tier, TierResult, Violation};

pub const AGGREGATE_KEY: &str = "aggregate";
pub const STRUCTURAL_KEY: &str = "structural_score";

const DEFAULT_MAX_SENTENCE_WORDS: f64 = 28.0;
const DEFAULT_MAX_REPETITION: f64 = 0.45;
const DEFAULT_MIN_VOICE_SHARE: f64 = 0.7;
/// Below this many content words the repetition ratio is noise
const MIN_WORDS_FOR_REPETITION: usize = 30;
/// Below this many first-person pronouns voice consistency is not judged
const MIN_PRONOUNS_FOR_VOICE: usize = 4;
const MAX_VIOLATIONS_PER_RULE: usize = 20;

/// Tier 2 result plus its aggregate score
#[derive(Debug, Clone)]
pub struct Tier2Outcome {
    pub result: TierResult,
    /// 100 minus the penalty of each violated rule, clipped to [0, 100]
    pub aggregate: f64,
}

impl Tier2Outcome {
    pub fn is_hard_fail(&self, threshold: f64) -> bool {
        self.aggregate < threshold
    }
}

pub fn evaluate(rules: &[&CompiledRule], content: &str) -> Tier2Outcome {
    let mut result = run_deterministic(Tier::Two, rules, content);

    let mut penalties: HashMap<&str, f64> = HashMap::new();
    let mut structural_penalty = 0.0;
    for violation in &result.violations {
        let entry = penalties.entry(violation.rule_id.as_str()).or_insert(0.0);
        if violation.penalty > *entry {
            *entry = violation.penalty;
        }
    }
    for compiled in rules {
        if compiled.rule.category == "structure" {
            structural_penalty += penalties.get(compiled.rule.rule_id.as_str()).copied().unwrap_or(0.0);
        }
    }

    let aggregate = (100.0 - penalties.values().sum::<f64>()).clamp(0.0, 100.0);
    result.sub_scores.insert(AGGREGATE_KEY.to_string(), aggregate);
    result
        .sub_scores
        .insert(STRUCTURAL_KEY.to_string(), (100.0 - structural_penalty).clamp(0.0, 100.0));

    Tier2Outcome { result, aggregate }
}

/// Sentences that are prose (not headings)
fn prose_sentences(content: &str) -> Vec<&str> {
    split_sentences(content)
        .into_iter()
        .filter(|s| !is_heading(s))
        .collect()
}

/// Sentences matching the trigger pattern must contain a number
pub(crate) fn unsupported_metrics(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    let Some(trigger) = compiled.matcher.as_ref() else {
        return RuleOutcome::default();
    };

    let mut triggered = 0usize;
    let mut violations = Vec::new();
    for sentence in prose_sentences(content) {
        let Some(m) = trigger.find(sentence) else {
            continue;
        };
        triggered += 1;
        if sentence.chars().any(|c| c.is_ascii_digit()) {
            continue;
        }
        if violations.len() < MAX_VIOLATIONS_PER_RULE {
            violations.push(
                Violation::for_rule(
                    &compiled.rule,
                    format!("\"{}\" claim without numeric proof: \"{}\"", m.as_str(), sentence),
                )
                .at(offset_in(content, sentence), sentence),
            );
        }
    }

    let supported = triggered.saturating_sub(violations.len());
    let score = if triggered == 0 {
        100.0
    } else {
        supported as f64 / triggered as f64 * 100.0
    };
    RuleOutcome {
        violations,
        metric: Some(("evidence_score", score)),
    }
}

/// Average sentence length must not exceed the threshold (words)
pub(crate) fn sentence_length(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    let limit = compiled.rule.threshold.unwrap_or(DEFAULT_MAX_SENTENCE_WORDS);
    let sentences = prose_sentences(content);
    if sentences.is_empty() {
        return RuleOutcome {
            violations: Vec::new(),
            metric: Some(("readability_score", 100.0)),
        };
    }

    let total_words: usize = sentences.iter().map(|s| words(s).len()).sum();
    let average = total_words as f64 / sentences.len() as f64;
    let score = if average <= limit {
        100.0
    } else {
        (100.0 - (average - limit) * 5.0).max(0.0)
    };

    let violations = if average > limit {
        vec![Violation::for_rule(
            &compiled.rule,
            format!(
                "Average sentence length {:.1} words exceeds {:.0}",
                average, limit
            ),
        )]
    } else {
        Vec::new()
    };

    RuleOutcome {
        violations,
        metric: Some(("readability_score", score)),
    }
}

fn is_stopword(word: &str) -> bool {
    const STOPWORDS: &[&str] = &[
        "that", "this", "with", "from", "have", "your", "they", "their", "there", "what", "when",
        "which", "will", "would", "about", "into", "than", "then", "them", "were", "been", "more",
        "also", "just", "some", "such", "only", "other", "over", "very",
    ];
    STOPWORDS.contains(&word)
}

/// Share of repeated content words must not exceed the threshold
pub(crate) fn repetition_ratio(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    let limit = compiled.rule.threshold.unwrap_or(DEFAULT_MAX_REPETITION);
    let content_words: Vec<String> = words(content)
        .into_iter()
        .filter(|w| w.chars().count() >= 4 && !is_stopword(w))
        .collect();

    if content_words.len() < MIN_WORDS_FOR_REPETITION {
        return RuleOutcome {
            violations: Vec::new(),
            metric: Some(("repetition_score", 100.0)),
        };
    }

    let unique = content_words
        .iter()
        .collect::<HashSet<_>>()
        .len();
    let ratio = 1.0 - unique as f64 / content_words.len() as f64;

    let violations = if ratio > limit {
        vec![Violation::for_rule(
            &compiled.rule,
            format!(
                "{:.0}% of content words are repeats (limit {:.0}%)",
                ratio * 100.0,
                limit * 100.0
            ),
        )]
    } else {
        Vec::new()
    };

    RuleOutcome {
        violations,
        metric: Some(("repetition_score", (1.0 - ratio) * 100.0)),
    }
}

/// `FAQ`, `FAQs` or `Frequently asked questions` opening a line, optionally as a heading
fn is_faq_line(line: &str) -> bool {
    let text = line.trim_start().trim_start_matches('#').trim_start().to_lowercase();
    ["faqs", "faq", "frequently asked questions"].iter().any(|marker| {
        text.strip_prefix(marker)
            .is_some_and(|rest| !rest.starts_with(|c: char| c.is_alphanumeric()))
    })
}

/// Content must contain an FAQ section
pub(crate) fn faq_block(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    if content.lines().any(is_faq_line) {
        return RuleOutcome::default();
    }
    RuleOutcome {
        violations: vec![Violation::for_rule(&compiled.rule, "No FAQ block found")],
        metric: None,
    }
}

/// At most one top-level heading and no skipped levels
pub(crate) fn heading_hierarchy(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    let mut violations = Vec::new();
    let mut previous: Option<usize> = None;
    let mut top_level = 0usize;

    for line in content.lines() {
        let Some(level) = heading_level(line) else {
            continue;
        };
        let heading = line.trim();

        if level == 1 {
            top_level += 1;
            if top_level > 1 {
                violations.push(
                    Violation::for_rule(&compiled.rule, format!("Second top-level heading \"{}\"", heading))
                        .at(offset_in(content, line), heading),
                );
            }
        }
        if let Some(prev) = previous {
            if level > prev + 1 {
                violations.push(
                    Violation::for_rule(
                        &compiled.rule,
                        format!("Heading level jumps from {} to {}: \"{}\"", prev, level, heading),
                    )
                    .at(offset_in(content, line), heading),
                );
            }
        }
        previous = Some(level);
    }

    violations.truncate(MAX_VIOLATIONS_PER_RULE);
    RuleOutcome {
        violations,
        metric: None,
    }
}

/// Singular and plural first person should not be mixed
pub(crate) fn voice_consistency(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    let min_share = compiled.rule.threshold.unwrap_or(DEFAULT_MIN_VOICE_SHARE);
    let mut singular = 0usize;
    let mut plural = 0usize;

    for word in words(content) {
        match word.as_str() {
            "i" | "me" | "my" | "mine" | "i'm" | "i've" | "i'll" | "i'd" => singular += 1,
            "we" | "us" | "our" | "ours" | "we're" | "we've" | "we'll" | "we'd" => plural += 1,
            _ => {}
        }
    }

    let total = singular + plural;
    if total < MIN_PRONOUNS_FOR_VOICE {
        return RuleOutcome {
            violations: Vec::new(),
            metric: Some(("voice_consistency_score", 100.0)),
        };
    }

    let share = singular.max(plural) as f64 / total as f64;
    let violations = if share < min_share {
        vec![Violation::for_rule(
            &compiled.rule,
            format!(
                "Mixed voice: {} singular vs {} plural first-person pronouns",
                singular, plural
            ),
        )]
    } else {
        Vec::new()
    };

    RuleOutcome {
        violations,
        metric: Some(("voice_consistency_score", share * 100.0)),
    }
}
