//! Configuration for tcv-engine
//!
//! Bootstrap settings come from `tcv-engine.toml` (see `tcv_common::config`
//! for file resolution). Everything has a built-in default so the service
//! starts without a config file; Tier 3 simply has no providers then.
//!
//! Provider API keys resolve with priority: environment variable named by
//! `api_key_env` → `api_key` in TOML.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tcv_common::config::LoggingConfig;
use tcv_common::{Error, Result};
use tracing::{info, warn};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5780;

/// Top-level TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineSettings,

    /// Providers in waterfall order
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

impl TomlConfig {
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        for provider in &self.providers {
            provider.validate()?;
        }
        Ok(())
    }
}

/// `[engine]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Ruleset version activated at startup
    pub ruleset_version: String,
    /// Maximum Tier 3 spend per assessment
    pub cost_ceiling_per_assessment: f64,
    /// Maximum concurrent outbound Tier 3 calls (K)
    pub tier3_max_concurrency: usize,
    /// Deadline for a single Tier 3 call
    pub tier3_call_deadline_ms: u64,
    /// Attempts per batch across the provider waterfall (N)
    pub tier3_max_attempts: usize,
    pub max_rules_per_call: usize,
    pub max_claims_per_call: usize,
    /// How long cached Tier 3 verdicts stay valid
    pub tier3_cache_ttl_secs: u64,
    /// Skip Tier 3 when Tier 2 hard-fails
    pub budget_saving: bool,
    /// Tier 2 aggregate (0-100) below which Tier 2 counts as a hard fail
    pub tier2_hard_fail_threshold: f64,
    /// Weight of the Tier 3 adjustment in the overall score
    pub tier3_weight: f64,
    /// Reject requests with more content than this (bytes)
    pub max_content_bytes: usize,
    /// Window used by `GET /stats`
    pub stats_window_hours: i64,
    /// Maximum wait for SQLite lock contention on audit writes
    pub db_max_lock_wait_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ruleset_version: "v1".to_string(),
            cost_ceiling_per_assessment: 0.50,
            tier3_max_concurrency: 4,
            tier3_call_deadline_ms: 30_000,
            tier3_max_attempts: 3,
            max_rules_per_call: 8,
            max_claims_per_call: 12,
            tier3_cache_ttl_secs: 3600,
            budget_saving: true,
            tier2_hard_fail_threshold: 40.0,
            tier3_weight: 0.3,
            max_content_bytes: 200_000,
            stats_window_hours: 24 * 7,
            db_max_lock_wait_ms: 5000,
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<()> {
        if self.ruleset_version.trim().is_empty() {
            return Err(Error::Config("engine.ruleset_version must not be empty".to_string()));
        }
        if !(self.cost_ceiling_per_assessment >= 0.0) {
            return Err(Error::Config(
                "engine.cost_ceiling_per_assessment must be >= 0".to_string(),
            ));
        }
        if self.tier3_max_concurrency == 0 {
            return Err(Error::Config("engine.tier3_max_concurrency must be >= 1".to_string()));
        }
        if self.tier3_max_attempts == 0 {
            return Err(Error::Config("engine.tier3_max_attempts must be >= 1".to_string()));
        }
        if self.max_rules_per_call == 0 || self.max_claims_per_call == 0 {
            return Err(Error::Config(
                "engine.max_rules_per_call and engine.max_claims_per_call must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tier3_weight) {
            return Err(Error::Config("engine.tier3_weight must be within [0, 1]".to_string()));
        }
        Ok(())
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_millis(self.tier3_call_deadline_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.tier3_cache_ttl_secs)
    }
}

/// One `[[providers]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    /// Chat-completions URL
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Token bucket refill rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Token bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default)]
    pub input_cost_per_1k: f64,
    #[serde(default)]
    pub output_cost_per_1k: f64,
    /// Flat fee charged per attempt by providers that bill failures
    #[serde(default)]
    pub attempt_fee: f64,
    #[serde(default)]
    pub bills_failed_attempts: bool,
    /// Expected completion size, used for pre-dispatch budget estimates
    #[serde(default = "default_expected_output_tokens")]
    pub expected_output_tokens: u64,
}

fn default_requests_per_second() -> u32 {
    2
}

fn default_burst() -> u32 {
    4
}

fn default_expected_output_tokens() -> u64 {
    400
}

impl ProviderSettings {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("provider name must not be empty".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::Config(format!("provider {} has no endpoint", self.name)));
        }
        if self.requests_per_second == 0 || self.burst == 0 {
            return Err(Error::Config(format!(
                "provider {} needs requests_per_second >= 1 and burst >= 1",
                self.name
            )));
        }
        if self.input_cost_per_1k < 0.0 || self.output_cost_per_1k < 0.0 || self.attempt_fee < 0.0
        {
            return Err(Error::Config(format!("provider {} has negative pricing", self.name)));
        }
        Ok(())
    }

    /// Resolve the API key (ENV → TOML)
    pub fn resolve_api_key(&self) -> Option<String> {
        let env_key = self
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| is_valid_key(key));
        let toml_key = self.api_key.clone().filter(|key| is_valid_key(key));

        if env_key.is_some() && toml_key.is_some() {
            warn!(
                provider = %self.name,
                "API key found in both environment and TOML. Using environment (highest priority)."
            );
        }

        if let Some(key) = env_key {
            info!(provider = %self.name, "API key loaded from environment variable");
            return Some(key);
        }
        if let Some(key) = toml_key {
            info!(provider = %self.name, "API key loaded from TOML config");
            return Some(key);
        }

        warn!(provider = %self.name, "No API key configured");
        None
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderSettings {
        ProviderSettings {
            name: "primary".to_string(),
            endpoint: "https://llm.example/v1/chat/completions".to_string(),
            model: "m".to_string(),
            api_key_env: None,
            api_key: Some("toml-key".to_string()),
            requests_per_second: 2,
            burst: 4,
            input_cost_per_1k: 0.01,
            output_cost_per_1k: 0.03,
            attempt_fee: 0.0,
            bills_failed_attempts: false,
            expected_output_tokens: 400,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineSettings::default().validate().is_ok());
        assert_eq!(EngineSettings::default().call_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let settings = EngineSettings {
            tier3_max_concurrency: 0,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_full_toml_parses() {
        let toml_text = r#"
            port = 6000

            [engine]
            cost_ceiling_per_assessment = 0.25
            budget_saving = false

            [[providers]]
            name = "primary"
            endpoint = "https://a.example/v1/chat/completions"
            model = "large"
            input_cost_per_1k = 0.01

            [[providers]]
            name = "fallback"
            endpoint = "https://b.example/v1/chat/completions"
            model = "small"
            bills_failed_attempts = true
            attempt_fee = 0.001
        "#;

        let config: TomlConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.port, Some(6000));
        assert_eq!(config.engine.cost_ceiling_per_assessment, 0.25);
        assert!(!config.engine.budget_saving);
        assert_eq!(config.engine.tier3_max_attempts, 3);
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].name, "fallback");
        assert_eq!(config.providers[1].requests_per_second, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_key_used_without_env() {
        assert_eq!(provider().resolve_api_key(), Some("toml-key".to_string()));
    }

    #[test]
    fn test_blank_key_is_invalid() {
        assert!(!is_valid_key("   "));
        let mut p = provider();
        p.api_key = Some(" ".to_string());
        assert_eq!(p.resolve_api_key(), None);
    }

    #[test]
    fn test_provider_validation() {
        let mut p = provider();
        assert!(p.validate().is_ok());
        p.burst = 0;
        assert!(p.validate().is_err());
    }
}
