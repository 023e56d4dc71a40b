//! Scripted provider doubles
//!
//! Each provider follows one script for every call and counts how often it
//! was called, so tests can assert on dispatches without a network.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tcv_engine::providers::{
    BodyDigest, ClaimVerdict, LlmProvider, Pricing, ProviderError, ProviderReply, ProviderRequest,
    ProviderResponse, RuleVerdict, Usage,
};

/// Cost of one answered call at the scripted pricing (1000 in, 200 out)
pub const ANSWER_COST: f64 = 0.016;

#[derive(Debug, Clone)]
pub enum Script {
    /// Answer immediately
    Answer,
    /// Sleep, then answer
    Sleep(Duration),
    /// Fail with an HTTP status
    Fail(u16),
    /// Decline to answer
    Refuse,
}

pub struct ScriptedProvider {
    name: String,
    script: Script,
    failing_rules: Vec<String>,
    claims_supported: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            failing_rules: Vec::new(),
            claims_supported: true,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answering provider that fails the given rules
    pub fn failing(name: &str, rule_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Script::Answer,
            failing_rules: rule_ids.iter().map(|id| id.to_string()).collect(),
            claims_supported: true,
            calls: AtomicUsize::new(0),
        })
    }

    /// Answering provider that rejects every claim
    pub fn doubting(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Script::Answer,
            failing_rules: Vec::new(),
            claims_supported: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn verdicts(&self, request: &ProviderRequest) -> ProviderResponse {
        ProviderResponse::Verdicts {
            rules: request
                .rule_checks
                .iter()
                .map(|check| {
                    let passed = !self.failing_rules.contains(&check.rule_id);
                    RuleVerdict {
                        rule_id: check.rule_id.clone(),
                        passed,
                        score: if passed { 1.0 } else { 0.2 },
                        message: (!passed).then(|| format!("{} not met", check.rule_id)),
                    }
                })
                .collect(),
            claims: request
                .claim_checks
                .iter()
                .map(|check| ClaimVerdict {
                    index: check.index,
                    supported: self.claims_supported,
                    confidence: 0.9,
                })
                .collect(),
            usage: Usage {
                input_tokens: 1000,
                output_tokens: 200,
            },
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        "https://scripted.invalid/v1/chat/completions"
    }

    fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: 0.01,
            output_per_1k: 0.03,
            attempt_fee: 0.0,
            bills_failed_attempts: false,
            expected_output_tokens: 200,
        }
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = match &self.script {
            Script::Answer => self.verdicts(request),
            Script::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                self.verdicts(request)
            }
            Script::Fail(status) => {
                return Err(ProviderError::Http {
                    status: *status,
                    message: "scripted failure".to_string(),
                })
            }
            Script::Refuse => ProviderResponse::Refused {
                reason: "content policy".to_string(),
                usage: Usage::default(),
            },
        };

        Ok(ProviderReply {
            http_status: 200,
            body: BodyDigest::of(&format!("{}:{}:{}", self.name, request.batch_index, request.content)),
            response,
        })
    }
}
