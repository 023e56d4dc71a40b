//! Tier 1: deterministic lexical checks
//!
//! Kill lists and forbidden wording, matched case-insensitively with byte
//! offsets. Pure and synchronous. A required rule hit (BLOCKED) is the
//! short-circuit signal for the controller.
//!
//! Recommended and optional rules may carry a `replacement`; [`auto_fix`]
//! rewrites their matches once so the controller can re-validate the fixed
//! text a single time.

use regex::Captures;

use super::{run_deterministic, RuleOutcome};
use crate::services::rule_store::CompiledRule;
use crate::types::{Tier, TierResult, Violation};

/// Matches reported per rule; further matches add nothing to the decision
const MAX_MATCHES_PER_RULE: usize = 20;

pub fn evaluate(rules: &[&CompiledRule], content: &str) -> TierResult {
    run_deterministic(Tier::One, rules, content)
}

pub(crate) fn lexical_matches(compiled: &CompiledRule, content: &str) -> RuleOutcome {
    let Some(matcher) = compiled.matcher.as_ref() else {
        return RuleOutcome::default();
    };

    let violations = matcher
        .find_iter(content)
        .take(MAX_MATCHES_PER_RULE)
        .map(|m| {
            Violation::for_rule(
                &compiled.rule,
                format!("{}: \"{}\"", compiled.rule.description, m.as_str()),
            )
            .at(m.start(), m.as_str())
        })
        .collect();

    RuleOutcome {
        violations,
        metric: None,
    }
}

/// Content after deterministic rewriting
#[derive(Debug, Clone, PartialEq)]
pub struct AutoFix {
    pub content: String,
    /// Rules whose matches were rewritten
    pub rule_ids: Vec<String>,
}

/// Rewrite matches of every violated auto-fixable rule
///
/// Returns `None` when nothing was rewritten. Required rules are never fixed.
pub fn auto_fix(rules: &[&CompiledRule], content: &str, violations: &[Violation]) -> Option<AutoFix> {
    let mut fixed = content.to_string();
    let mut rule_ids = Vec::new();

    for compiled in rules {
        let rule = &compiled.rule;
        if !rule.is_auto_fixable() || !violations.iter().any(|v| v.rule_id == rule.rule_id) {
            continue;
        }
        let (Some(matcher), Some(replacement)) = (compiled.matcher.as_ref(), rule.replacement.as_deref())
        else {
            continue;
        };

        let rewritten = matcher
            .replace_all(&fixed, |caps: &Captures| match_case(&caps[0], replacement))
            .into_owned();
        if rewritten != fixed {
            fixed = rewritten;
            rule_ids.push(rule.rule_id.clone());
        }
    }

    if rule_ids.is_empty() {
        None
    } else {
        Some(AutoFix {
            content: fixed,
            rule_ids,
        })
    }
}

/// Capitalize the replacement when the matched text started a sentence
fn match_case(matched: &str, replacement: &str) -> String {
    let starts_upper = matched.chars().next().is_some_and(char::is_uppercase);
    if !starts_upper {
        return replacement.to_string();
    }
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
