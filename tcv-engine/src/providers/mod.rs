//! LLM provider boundary
//!
//! Every provider API speaks its own JSON dialect; this module is where they
//! are translated into one normalized [`ProviderResponse`]. Nothing past this
//! boundary ever sees a raw provider map.
//!
//! # Components
//! - [`LlmProvider`] - trait implemented by each provider client
//! - [`ProviderSlot`] - provider plus its token-bucket rate limiter
//! - [`Pricing`] - token and per-attempt pricing used for cost accounting
//! - [`http_provider::HttpProvider`] - OpenAI-compatible chat-completions client

pub mod http_provider;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ProviderSettings;
use crate::types::AuditStatus;
use tcv_common::hashing::sha256_hex;

pub use http_provider::HttpProvider;

// ============================================================================
// Request
// ============================================================================

/// One rule the provider is asked to judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub rule_id: String,
    pub instruction: String,
}

/// One claim the provider is asked to verify against the content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheck {
    /// Index into the assessment's claim candidate list
    pub index: usize,
    pub text: String,
}

/// A batch of checks sent in a single outbound call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRequest {
    /// Not part of the request body, so retries of the same batch hash identically
    #[serde(skip)]
    pub assessment_id: Uuid,
    #[serde(skip)]
    pub batch_index: usize,
    pub content: String,
    pub page_type: String,
    pub industry: String,
    pub rule_checks: Vec<RuleCheck>,
    pub claim_checks: Vec<ClaimCheck>,
}

impl ProviderRequest {
    /// Canonical serialized form used for hashing and sizing
    pub fn canonical_body(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Prompt sent to chat-style providers
    pub fn prompt(&self) -> String {
        let mut prompt = String::with_capacity(self.content.len() + 512);
        prompt.push_str(
            "You are a content compliance reviewer. Judge the CONTENT against each RULE \
             and decide whether the CONTENT itself supports each CLAIM.\n\
             Answer with JSON only: {\"rules\": [{\"rule_id\": str, \"passed\": bool, \
             \"score\": number 0-1, \"message\": str}], \"claims\": [{\"index\": int, \
             \"supported\": bool, \"confidence\": number 0-1}]}\n\n",
        );
        prompt.push_str(&format!(
            "PAGE TYPE: {}\nINDUSTRY: {}\n\nRULES:\n",
            self.page_type,
            if self.industry.is_empty() { "general" } else { &self.industry }
        ));
        for check in &self.rule_checks {
            prompt.push_str(&format!("- {}: {}\n", check.rule_id, check.instruction));
        }
        prompt.push_str("\nCLAIMS:\n");
        for claim in &self.claim_checks {
            prompt.push_str(&format!("- [{}] {}\n", claim.index, claim.text));
        }
        prompt.push_str("\nCONTENT:\n");
        prompt.push_str(&self.content);
        prompt
    }
}

// ============================================================================
// Normalized response
// ============================================================================

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Provider verdict for one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub rule_id: String,
    pub passed: bool,
    /// Compliance score in [0, 1]
    pub score: f64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Provider verdict for one claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimVerdict {
    pub index: usize,
    pub supported: bool,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

/// Normalized provider answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderResponse {
    /// Structured verdicts
    Verdicts {
        rules: Vec<RuleVerdict>,
        claims: Vec<ClaimVerdict>,
        usage: Usage,
    },
    /// Provider declined to answer (content filter, policy refusal)
    Refused { reason: String, usage: Usage },
}

impl ProviderResponse {
    pub fn usage(&self) -> Usage {
        match self {
            ProviderResponse::Verdicts { usage, .. } | ProviderResponse::Refused { usage, .. } => {
                *usage
            }
        }
    }
}

/// Hash and size of a raw body; the body itself is never retained
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyDigest {
    pub hash: String,
    pub size: u64,
}

impl BodyDigest {
    pub fn of(body: &str) -> Self {
        Self {
            hash: sha256_hex(body.as_bytes()),
            size: body.len() as u64,
        }
    }

    /// Pointer into externally retained storage
    pub fn storage_ref(&self) -> String {
        format!("sha256:{}", self.hash)
    }
}

/// Successful exchange with a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub http_status: u16,
    pub body: BodyDigest,
    pub response: ProviderResponse,
}

/// Provider call failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    /// Response arrived but could not be translated
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the waterfall should move on to the next provider
    pub fn is_retriable(&self) -> bool {
        match self {
            ProviderError::Timeout | ProviderError::Network(_) | ProviderError::Malformed(_) => {
                true
            }
            ProviderError::Http { status, .. } => *status >= 500 || *status == 429,
            ProviderError::NotConfigured(_) => true,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Terminal audit status for a call that ended in this error
    pub fn audit_status(&self) -> AuditStatus {
        match self {
            ProviderError::Timeout => AuditStatus::Timeout,
            _ => AuditStatus::Error,
        }
    }
}

// ============================================================================
// Provider trait and pricing
// ============================================================================

/// Pricing used to turn usage into cost
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub attempt_fee: f64,
    pub bills_failed_attempts: bool,
    pub expected_output_tokens: u64,
}

impl Pricing {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            input_per_1k: settings.input_cost_per_1k,
            output_per_1k: settings.output_cost_per_1k,
            attempt_fee: settings.attempt_fee,
            bills_failed_attempts: settings.bills_failed_attempts,
            expected_output_tokens: settings.expected_output_tokens,
        }
    }

    /// Cost of a successful call
    pub fn cost(&self, usage: &Usage) -> f64 {
        self.attempt_fee
            + usage.input_tokens as f64 / 1000.0 * self.input_per_1k
            + usage.output_tokens as f64 / 1000.0 * self.output_per_1k
    }

    /// Cost of an attempt that did not succeed
    pub fn failed_attempt_cost(&self) -> f64 {
        if self.bills_failed_attempts {
            self.attempt_fee
        } else {
            0.0
        }
    }

    /// Pre-dispatch estimate (roughly 4 characters per input token)
    pub fn estimate(&self, prompt_chars: usize) -> f64 {
        let usage = Usage {
            input_tokens: (prompt_chars as u64).div_ceil(4),
            output_tokens: self.expected_output_tokens,
        };
        self.cost(&usage)
    }
}

/// A billed LLM/NLP provider
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name recorded as the audit `tool`
    fn name(&self) -> &str;

    /// Endpoint recorded in the audit trail
    fn endpoint(&self) -> &str;

    fn pricing(&self) -> Pricing;

    /// Perform one call. Deadlines are enforced by the caller.
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError>;
}

/// Provider plus its token-bucket rate limiter
#[derive(Clone)]
pub struct ProviderSlot {
    pub provider: Arc<dyn LlmProvider>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn LlmProvider>, requests_per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            provider,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Wait for a token from this provider's bucket
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

/// Build slots for the configured waterfall
pub fn build_slots(settings: &[ProviderSettings]) -> Vec<ProviderSlot> {
    settings
        .iter()
        .map(|s| {
            let provider: Arc<dyn LlmProvider> = Arc::new(HttpProvider::from_settings(s));
            ProviderSlot::new(provider, s.requests_per_second, s.burst)
        })
        .collect()
}
