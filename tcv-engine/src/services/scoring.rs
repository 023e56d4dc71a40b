//! Scoring Aggregator
//!
//! Deterministic: the same tier results, Tier 3 outcome and detections
//! always give the same score, status and confidence.
//!
//! Score: 100 minus the penalty of each violated Tier 1/Tier 2 rule (counted
//! once per rule), plus the weighted Tier 3 adjustment, minus a fixed penalty
//! per BLOCKED hallucination, clipped to [0, 100]. Any Tier 1 BLOCKED
//! violation forces 0.
//!
//! Status precedence, first match wins:
//! 1. Tier 1/Tier 2 BLOCKED violation: REJECTED
//! 2. cost ceiling reached during Tier 3: PARTIAL
//! 3. Tier 2 hard fail with Tier 3 skipped: MANUAL_REVIEW
//! 4. Tier 3 required rule failed: REJECTED
//! 5. Tier 3 checks left unverified: PARTIAL
//! 6. BLOCKED hallucination and score below the rejection threshold: REJECTED
//! 7. any WARNING, or score below the passing threshold: MANUAL_REVIEW
//! 8. PASSED, or AUTO_FIXED when the content was rewritten

use std::collections::HashMap;

use crate::tiers::tier3::{Finding, Tier3Outcome};
use crate::types::{
    AssessmentStatus, ClaimCandidate, ConfidenceLevel, EnforcementLevel, HallucinationDetection,
    Severity, Tier, TierResult,
};

/// Deduction per BLOCKED hallucination
pub const HALLUCINATION_PENALTY: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringPolicy {
    pub passing_threshold: f64,
    pub rejection_threshold: f64,
    /// Weight of the Tier 3 adjustment (0 disables it)
    pub tier3_weight: f64,
}

pub struct ScoreInputs<'a> {
    pub tier_results: &'a [TierResult],
    pub tier3: Option<&'a Tier3Outcome>,
    pub detections: &'a [HallucinationDetection],
    /// Claims that survived hallucination detection
    pub surfaced: &'a [ClaimCandidate],
    pub auto_fixed: bool,
    /// Tier 2 hard-failed and Tier 3 was skipped to save budget
    pub tier3_skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreVerdict {
    pub overall_score: f64,
    pub status: AssessmentStatus,
    pub confidence_level: ConfidenceLevel,
}

/// Sum of deterministic penalties, one per violated rule
pub fn deterministic_penalty(tier_results: &[TierResult]) -> f64 {
    let mut per_rule: HashMap<&str, f64> = HashMap::new();
    for violation in tier_results
        .iter()
        .filter(|r| r.tier != Tier::Three)
        .flat_map(|r| r.violations.iter())
    {
        let entry = per_rule.entry(violation.rule_id.as_str()).or_insert(0.0);
        *entry = entry.max(violation.penalty);
    }
    per_rule.values().sum()
}

/// Tier 3 contribution: weight * (mean - 1) * 100, never positive
pub fn tier3_adjustment(tier3: Option<&Tier3Outcome>, weight: f64) -> f64 {
    tier3
        .and_then(Tier3Outcome::weighted_rule_score)
        .map(|mean| weight * (mean - 1.0) * 100.0)
        .unwrap_or(0.0)
}

fn confidence_rank(level: ConfidenceLevel) -> u8 {
    match level {
        ConfidenceLevel::High => 3,
        ConfidenceLevel::Medium => 2,
        ConfidenceLevel::Low => 1,
        ConfidenceLevel::Unverified => 0,
    }
}

fn tier3_failures(tier3: Option<&Tier3Outcome>, level: EnforcementLevel) -> bool {
    tier3.is_some_and(|outcome| {
        outcome.rules.iter().any(|f| {
            f.rule.enforcement_level == level
                && matches!(&f.outcome, Finding::Verified { verdict, .. } if !verdict.passed)
        })
    })
}

pub fn aggregate(inputs: &ScoreInputs<'_>, policy: &ScoringPolicy) -> ScoreVerdict {
    let tier1_blocked = inputs
        .tier_results
        .iter()
        .any(|r| r.tier == Tier::One && r.has_blocking());
    let deterministic_blocked = inputs
        .tier_results
        .iter()
        .any(|r| r.tier != Tier::Three && r.has_blocking());
    let blocked_hallucinations = inputs
        .detections
        .iter()
        .filter(|d| d.severity == Severity::Blocked)
        .count();

    let overall_score = if tier1_blocked {
        0.0
    } else {
        (100.0 - deterministic_penalty(inputs.tier_results)
            + tier3_adjustment(inputs.tier3, policy.tier3_weight)
            - HALLUCINATION_PENALTY * blocked_hallucinations as f64)
            .clamp(0.0, 100.0)
    };

    let has_warning = inputs
        .tier_results
        .iter()
        .flat_map(|r| r.violations.iter())
        .any(|v| v.severity == Severity::Warning)
        || inputs.detections.iter().any(|d| d.severity == Severity::Warning)
        || tier3_failures(inputs.tier3, EnforcementLevel::Recommended);

    let status = if deterministic_blocked {
        AssessmentStatus::Rejected
    } else if inputs.tier3.is_some_and(|t| t.budget_exhausted) {
        AssessmentStatus::Partial
    } else if inputs.tier3_skipped {
        AssessmentStatus::ManualReview
    } else if tier3_failures(inputs.tier3, EnforcementLevel::Required) {
        AssessmentStatus::Rejected
    } else if inputs.tier3.is_some_and(|t| t.unverified_count() > 0) {
        AssessmentStatus::Partial
    } else if blocked_hallucinations > 0 && overall_score < policy.rejection_threshold {
        AssessmentStatus::Rejected
    } else if has_warning || overall_score < policy.passing_threshold {
        AssessmentStatus::ManualReview
    } else if inputs.auto_fixed {
        AssessmentStatus::AutoFixed
    } else {
        AssessmentStatus::Passed
    };

    let confidence_level = match status {
        AssessmentStatus::Rejected => ConfidenceLevel::High,
        AssessmentStatus::ManualReview => ConfidenceLevel::Low,
        AssessmentStatus::Partial => ConfidenceLevel::Unverified,
        AssessmentStatus::Passed | AssessmentStatus::AutoFixed => inputs
            .surfaced
            .iter()
            .map(|c| c.confidence_level)
            .min_by_key(|level| confidence_rank(*level))
            .unwrap_or(ConfidenceLevel::High),
    };

    ScoreVerdict {
        overall_score,
        status,
        confidence_level,
    }
}
