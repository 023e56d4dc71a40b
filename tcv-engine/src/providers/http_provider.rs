//! OpenAI-compatible chat-completions provider
//!
//! Sends the batch prompt as a single user message and expects the model to
//! answer with the JSON verdict document described in
//! [`ProviderRequest::prompt`](super::ProviderRequest::prompt).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    BodyDigest, ClaimVerdict, LlmProvider, Pricing, ProviderError, ProviderReply,
    ProviderRequest, ProviderResponse, RuleVerdict, Usage,
};
use crate::config::ProviderSettings;

const USER_AGENT: &str = concat!("tcv-engine/", env!("CARGO_PKG_VERSION"));

/// Transport-level timeout; the per-call deadline is enforced by Tier 3
const TRANSPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat-completions provider client
pub struct HttpProvider {
    name: String,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    pricing: Pricing,
    http_client: reqwest::Client,
}

impl HttpProvider {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(TRANSPORT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(provider = %settings.name, "HTTP client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });

        Self {
            name: settings.name.clone(),
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key: settings.resolve_api_key(),
            pricing: Pricing::from_settings(settings),
            http_client,
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn pricing(&self) -> Pricing {
        self.pricing
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured(format!("{} has no API key", self.name)))?;

        let payload = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [{ "role": "user", "content": request.prompt() }],
        });

        debug!(
            provider = %self.name,
            batch = request.batch_index,
            rules = request.rule_checks.len(),
            claims = request.claim_checks.len(),
            "Dispatching provider call"
        );

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                message: truncate(&body, 200),
            });
        }

        let normalized = parse_chat_completion(&body)?;
        Ok(ProviderReply {
            http_status: status.as_u16(),
            body: BodyDigest::of(&body),
            response: normalized,
        })
    }
}

// ============================================================================
// Response translation
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct VerdictDocument {
    #[serde(default)]
    rules: Vec<RuleVerdict>,
    #[serde(default)]
    claims: Vec<ClaimVerdict>,
}

/// Translate a chat-completions body into the normalized response
pub fn parse_chat_completion(body: &str) -> Result<ProviderResponse, ProviderError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let usage = completion
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("no choices in response".to_string()))?;

    if let Some(reason) = choice.message.refusal {
        return Ok(ProviderResponse::Refused { reason, usage });
    }
    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Ok(ProviderResponse::Refused {
            reason: "content_filter".to_string(),
            usage,
        });
    }

    let content = choice
        .message
        .content
        .ok_or_else(|| ProviderError::Malformed("empty message content".to_string()))?;

    let document: VerdictDocument = serde_json::from_str(strip_code_fence(&content))
        .map_err(|e| ProviderError::Malformed(format!("verdict document: {}", e)))?;

    let rules = document
        .rules
        .into_iter()
        .map(|mut v| {
            v.score = v.score.clamp(0.0, 1.0);
            v
        })
        .collect();
    let claims = document
        .claims
        .into_iter()
        .map(|mut v| {
            v.confidence = v.confidence.clamp(0.0, 1.0);
            v
        })
        .collect();

    Ok(ProviderResponse::Verdicts {
        rules,
        claims,
        usage,
    })
}

/// Models sometimes wrap JSON in a markdown fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches("json");
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(content: &str) -> String {
        json!({
            "choices": [{ "message": { "content": content }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 120, "completion_tokens": 30 }
        })
        .to_string()
    }

    #[test]
    fn test_parse_verdicts() {
        let body = completion(
            r#"{"rules":[{"rule_id":"llm.tone","passed":true,"score":1.4}],
                "claims":[{"index":0,"supported":false,"confidence":0.7}]}"#,
        );
        let parsed = parse_chat_completion(&body).unwrap();
        match parsed {
            ProviderResponse::Verdicts {
                rules,
                claims,
                usage,
            } => {
                assert_eq!(rules.len(), 1);
                assert_eq!(rules[0].score, 1.0);
                assert!(!claims[0].supported);
                assert_eq!(usage.total(), 150);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_parse_fenced_content() {
        let body = completion("```json\n{\"rules\":[],\"claims\":[]}\n```");
        assert!(matches!(
            parse_chat_completion(&body),
            Ok(ProviderResponse::Verdicts { .. })
        ));
    }

    #[test]
    fn test_refusal_is_normalized() {
        let body = json!({
            "choices": [{ "message": { "content": null, "refusal": "cannot help" } }]
        })
        .to_string();
        assert_eq!(
            parse_chat_completion(&body).unwrap(),
            ProviderResponse::Refused {
                reason: "cannot help".to_string(),
                usage: Usage::default()
            }
        );
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            parse_chat_completion("not json"),
            Err(ProviderError::Malformed(_))
        ));
        assert!(matches!(
            parse_chat_completion(&completion("plain prose answer")),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let settings = ProviderSettings {
            name: "nokey".to_string(),
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            model: "m".to_string(),
            api_key_env: None,
            api_key: None,
            requests_per_second: 1,
            burst: 1,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
            attempt_fee: 0.0,
            bills_failed_attempts: false,
            expected_output_tokens: 10,
        };
        let provider = HttpProvider::from_settings(&settings);
        let request = ProviderRequest {
            assessment_id: uuid::Uuid::new_v4(),
            batch_index: 0,
            content: "x".to_string(),
            page_type: "blog".to_string(),
            industry: String::new(),
            rule_checks: Vec::new(),
            claim_checks: Vec::new(),
        };
        assert!(matches!(
            provider.complete(&request).await,
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
