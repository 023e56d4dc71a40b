//! Core types for the tiered validation engine
//!
//! Defines the data model shared by every stage of the escalation pipeline:
//! - **Rules:** tier, enforcement level, validation type
//! - **Results:** violations, per-tier results, the final assessment result
//! - **Provenance:** audit calls, claims, hallucination detections
//! - **Review:** verification gate items and decisions
//!
//! Enums that are persisted have a stable `as_str()` form used as the
//! database representation, and a matching `parse()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Rules
// ============================================================================

/// Escalation tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    /// Deterministic lexical/regex checks
    One,
    /// Statistical/structural checks
    Two,
    /// LLM-backed checks
    Three,
}

impl Tier {
    pub fn number(self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
        }
    }

    /// Label used in `tiers_run`
    pub fn label(self) -> String {
        self.number().to_string()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tier::One),
            2 => Ok(Tier::Two),
            3 => Ok(Tier::Three),
            other => Err(format!("tier must be 1, 2 or 3 (got {})", other)),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.number()
    }
}

/// How strictly a rule is enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    Required,
    Recommended,
    Optional,
}

impl EnforcementLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EnforcementLevel::Required => "required",
            EnforcementLevel::Recommended => "recommended",
            EnforcementLevel::Optional => "optional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "required" => Some(EnforcementLevel::Required),
            "recommended" => Some(EnforcementLevel::Recommended),
            "optional" => Some(EnforcementLevel::Optional),
            _ => None,
        }
    }

    /// Severity of a violation of a rule at this level
    pub fn severity(self) -> Severity {
        match self {
            EnforcementLevel::Required => Severity::Blocked,
            EnforcementLevel::Recommended => Severity::Warning,
            EnforcementLevel::Optional => Severity::Info,
        }
    }

    /// Score deduction used when a rule does not set its own penalty
    pub fn default_penalty(self) -> f64 {
        match self {
            EnforcementLevel::Required => 25.0,
            EnforcementLevel::Recommended => 10.0,
            EnforcementLevel::Optional => 2.0,
        }
    }
}

/// Which check a rule runs
///
/// The tier a rule is assigned to is ruleset configuration; the validation
/// type decides which evaluator knows how to run it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    /// Case-insensitive literal phrase, word-bounded
    Phrase,
    /// Case-insensitive regular expression
    Regex,
    /// Average sentence length (words) must not exceed `threshold`
    SentenceLength,
    /// Share of repeated content words must not exceed `threshold`
    RepetitionRatio,
    /// Content must contain an FAQ block
    FaqBlock,
    /// Headings must not skip levels and must have at most one top-level heading
    HeadingHierarchy,
    /// Sentences matching `pattern` must carry numeric proof
    UnsupportedMetric,
    /// Share of the dominant grammatical person must reach `threshold`
    VoiceConsistency,
    /// Rule evaluated by an LLM provider using its description
    LlmCheck,
}

impl ValidationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidationType::Phrase => "phrase",
            ValidationType::Regex => "regex",
            ValidationType::SentenceLength => "sentence_length",
            ValidationType::RepetitionRatio => "repetition_ratio",
            ValidationType::FaqBlock => "faq_block",
            ValidationType::HeadingHierarchy => "heading_hierarchy",
            ValidationType::UnsupportedMetric => "unsupported_metric",
            ValidationType::VoiceConsistency => "voice_consistency",
            ValidationType::LlmCheck => "llm_check",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "phrase" => Some(ValidationType::Phrase),
            "regex" => Some(ValidationType::Regex),
            "sentence_length" => Some(ValidationType::SentenceLength),
            "repetition_ratio" => Some(ValidationType::RepetitionRatio),
            "faq_block" => Some(ValidationType::FaqBlock),
            "heading_hierarchy" => Some(ValidationType::HeadingHierarchy),
            "unsupported_metric" => Some(ValidationType::UnsupportedMetric),
            "voice_consistency" => Some(ValidationType::VoiceConsistency),
            "llm_check" => Some(ValidationType::LlmCheck),
            _ => None,
        }
    }

    /// True for checks driven by a `pattern`
    pub fn needs_pattern(self) -> bool {
        matches!(
            self,
            ValidationType::Phrase | ValidationType::Regex | ValidationType::UnsupportedMetric
        )
    }
}

/// One validation rule, immutable within a ruleset version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub category: String,
    pub tier: Tier,
    pub description: String,
    pub validation_type: ValidationType,
    pub enforcement_level: EnforcementLevel,
    pub priority_score: f64,
    /// Page types the rule applies to (empty = every page type)
    #[serde(default)]
    pub applicable_page_types: Vec<String>,
    /// Literal phrase or regex for pattern-driven checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Deterministic rewrite for auto-fixable Tier 1 rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// Numeric limit for statistical checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Score deduction when violated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub penalty: Option<f64>,
}

impl Rule {
    pub fn applies_to(&self, page_type: &str) -> bool {
        self.applicable_page_types.is_empty()
            || self
                .applicable_page_types
                .iter()
                .any(|p| p.eq_ignore_ascii_case(page_type))
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
            .unwrap_or_else(|| self.enforcement_level.default_penalty())
    }

    /// Auto-fix is never applied to required rules
    pub fn is_auto_fixable(&self) -> bool {
        self.replacement.is_some() && self.enforcement_level != EnforcementLevel::Required
    }
}

/// Phrase that must never appear in surfaced claims
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenPhrase {
    pub phrase: String,
    pub reason: String,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Violations and results
// ============================================================================

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Blocked,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Blocked => "BLOCKED",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BLOCKED" => Some(Severity::Blocked),
            "WARNING" => Some(Severity::Warning),
            "INFO" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// Confidence attached to claims and results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Unverified,
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::Unverified => "UNVERIFIED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "HIGH" => Some(ConfidenceLevel::High),
            "MEDIUM" => Some(ConfidenceLevel::Medium),
            "LOW" => Some(ConfidenceLevel::Low),
            "UNVERIFIED" => Some(ConfidenceLevel::Unverified),
            _ => None,
        }
    }

    /// Bucket a provider confidence in [0, 1]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            ConfidenceLevel::High
        } else if score >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// A single rule violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub tier: Tier,
    pub severity: Severity,
    pub message: String,
    /// Byte offset of the match in the validated content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Matched text, when the check is lexical
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    /// Set to UNVERIFIED when a paid check could not be completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<ConfidenceLevel>,
    /// Score deduction this violation contributes
    #[serde(default)]
    pub penalty: f64,
}

impl Violation {
    pub fn for_rule(rule: &Rule, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            tier: rule.tier,
            severity: rule.enforcement_level.severity(),
            message: message.into(),
            offset: None,
            matched: None,
            confidence_level: None,
            penalty: rule.penalty(),
        }
    }

    pub fn at(mut self, offset: usize, matched: impl Into<String>) -> Self {
        self.offset = Some(offset);
        self.matched = Some(matched.into());
        self
    }

    /// Placeholder for a paid check that never produced a verdict
    pub fn unverified(rule: &Rule, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            tier: rule.tier,
            severity: Severity::Info,
            message: format!("UNVERIFIED: {}", reason.into()),
            offset: None,
            matched: None,
            confidence_level: Some(ConfidenceLevel::Unverified),
            penalty: 0.0,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocked
    }
}

/// Result of running one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResult {
    pub tier: Tier,
    pub rules_checked: usize,
    pub rules_passed: usize,
    pub violations: Vec<Violation>,
    pub cost: f64,
    pub tokens: u64,
    pub latency_ms: u64,
    /// Named numeric sub-scores (0-100 for Tier 2, 0-1 for Tier 3)
    #[serde(default)]
    pub sub_scores: BTreeMap<String, f64>,
}

impl TierResult {
    pub fn empty(tier: Tier) -> Self {
        Self {
            tier,
            rules_checked: 0,
            rules_passed: 0,
            violations: Vec::new(),
            cost: 0.0,
            tokens: 0,
            latency_ms: 0,
            sub_scores: BTreeMap::new(),
        }
    }

    pub fn has_blocking(&self) -> bool {
        self.violations.iter().any(Violation::is_blocking)
    }
}

/// Final status of an assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentStatus {
    Passed,
    AutoFixed,
    ManualReview,
    Rejected,
    Partial,
}

impl AssessmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentStatus::Passed => "PASSED",
            AssessmentStatus::AutoFixed => "AUTO_FIXED",
            AssessmentStatus::ManualReview => "MANUAL_REVIEW",
            AssessmentStatus::Rejected => "REJECTED",
            AssessmentStatus::Partial => "PARTIAL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PASSED" => Some(AssessmentStatus::Passed),
            "AUTO_FIXED" => Some(AssessmentStatus::AutoFixed),
            "MANUAL_REVIEW" => Some(AssessmentStatus::ManualReview),
            "REJECTED" => Some(AssessmentStatus::Rejected),
            "PARTIAL" => Some(AssessmentStatus::Partial),
            _ => None,
        }
    }
}

/// Caller-tunable assessment options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentOptions {
    /// Override the configured budget-saving policy
    #[serde(default)]
    pub budget_saving: Option<bool>,
    /// Lower the configured per-assessment cost ceiling (never raises it)
    #[serde(default)]
    pub cost_ceiling: Option<f64>,
    /// Verification queue priority if the result needs review
    #[serde(default)]
    pub review_priority: Option<i64>,
    /// Disable deterministic auto-fix
    #[serde(default)]
    pub disable_auto_fix: bool,
}

/// Request submitted for assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRequest {
    pub content: String,
    pub page_type: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub options: AssessmentOptions,
}

impl AssessmentRequest {
    pub fn new(content: impl Into<String>, page_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            page_type: page_type.into(),
            industry: String::new(),
            options: AssessmentOptions::default(),
        }
    }

    /// SHA-256 of the submitted content
    pub fn content_hash(&self) -> String {
        tcv_common::hashing::sha256_hex(self.content.as_bytes())
    }
}

/// Result returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub assessment_id: Uuid,
    /// Hash of the content that was validated (after any auto-fix)
    pub content_hash: String,
    pub ruleset_version: String,
    pub overall_score: f64,
    pub status: AssessmentStatus,
    pub confidence_level: ConfidenceLevel,
    pub tiers_run: Vec<String>,
    pub tier_results: Vec<TierResult>,
    pub violations: Vec<Violation>,
    pub claims: Vec<Claim>,
    pub hallucinations: Vec<HallucinationDetection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_content: Option<String>,
    pub cost_total: f64,
    pub tokens_total: u64,
    pub processing_time_ms: u64,
    /// True when Tier 3 verdicts were served from the response cache
    #[serde(default)]
    pub tier3_cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_item_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AssessmentResult {
    pub fn blocking_rule_ids(&self) -> Vec<&str> {
        self.violations
            .iter()
            .filter(|v| v.is_blocking())
            .map(|v| v.rule_id.as_str())
            .collect()
    }
}

// ============================================================================
// Provenance
// ============================================================================

/// Lifecycle of one external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Pending,
    Success,
    Timeout,
    Error,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Pending => "PENDING",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Timeout => "TIMEOUT",
            AuditStatus::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(AuditStatus::Pending),
            "SUCCESS" => Some(AuditStatus::Success),
            "TIMEOUT" => Some(AuditStatus::Timeout),
            "ERROR" => Some(AuditStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != AuditStatus::Pending
    }
}

/// Hashed record of one external call
///
/// Raw bodies are never stored: only digest, size and a pointer into
/// externally retained storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditCall {
    pub audit_id: Uuid,
    pub assessment_id: Uuid,
    /// Provider name
    pub tool: String,
    pub endpoint: String,
    /// Hash of the content the call was made about
    pub content_hash: String,
    pub request_hash: String,
    pub request_size: u64,
    pub request_ref: String,
    pub response_hash: Option<String>,
    pub response_size: Option<u64>,
    /// HTTP status of the response, if one arrived
    pub response_status: Option<u16>,
    pub status: AuditStatus,
    pub cost: f64,
    pub tokens: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Surfaced claim, always traceable to an audit call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: Uuid,
    pub assessment_id: Uuid,
    pub text: String,
    pub source_audit_id: Uuid,
    pub content_hash: String,
    pub confidence_level: ConfidenceLevel,
    pub verified: bool,
}

/// Claim before provenance has been enforced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimCandidate {
    pub text: String,
    pub source_audit_id: Option<Uuid>,
    pub confidence_level: ConfidenceLevel,
    /// Provider verdict on whether the content supports the claim
    pub supported: Option<bool>,
}

impl ClaimCandidate {
    pub fn unverified(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_audit_id: None,
            confidence_level: ConfidenceLevel::Unverified,
            supported: None,
        }
    }
}

/// Flag raised by the hallucination detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationDetection {
    pub detection_id: Uuid,
    pub assessment_id: Uuid,
    pub flagged_content: String,
    /// What triggered the flag (forbidden phrase or unsourced claim)
    pub rule: String,
    pub severity: Severity,
    pub resolved: bool,
}

// ============================================================================
// Verification gate
// ============================================================================

/// Review item lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InReview,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::InReview => "in_review",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReviewStatus::Pending),
            "in_review" => Some(ReviewStatus::InReview),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_decided(self) -> bool {
        matches!(self, ReviewStatus::Approved | ReviewStatus::Rejected)
    }
}

/// Reviewer decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewAction {
    Approve,
    Reject,
    Edit,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewAction::Approve => "APPROVE",
            ReviewAction::Reject => "REJECT",
            ReviewAction::Edit => "EDIT",
        }
    }

    /// Status an item ends in after this action
    pub fn target_status(self) -> ReviewStatus {
        match self {
            ReviewAction::Approve | ReviewAction::Edit => ReviewStatus::Approved,
            ReviewAction::Reject => ReviewStatus::Rejected,
        }
    }
}

/// Item awaiting (or past) human verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub item_id: Uuid,
    pub assessment_id: Uuid,
    pub status: ReviewStatus,
    /// Higher is reviewed first
    pub priority: i64,
    pub data_snapshot: serde_json::Value,
    pub reviewer_id: Option<String>,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
