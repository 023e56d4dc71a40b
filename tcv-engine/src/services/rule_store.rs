//! Rule Store
//!
//! Serves immutable, versioned ruleset snapshots. A snapshot is compiled once
//! (patterns validated and turned into regexes) and shared as `Arc<Ruleset>`;
//! an assessment holds the snapshot it started with for its whole lifetime,
//! so `reload` never changes rules under an in-flight assessment.
//!
//! Any failure to produce a snapshot is `RuleStoreUnavailable`, which the
//! controller treats as fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::db::rules::{self as rules_db, RulesetDefinition};
use crate::error::{EngineError, EngineResult};
use crate::types::{EnforcementLevel, ForbiddenPhrase, Rule, Tier, ValidationType};

/// Built-in ruleset seeded on first start
pub const DEFAULT_RULESET: &str = include_str!("../../rulesets/default.toml");

/// Rule with its pattern compiled
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub matcher: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Result<Self, String> {
        if (rule.tier == Tier::Three) != (rule.validation_type == ValidationType::LlmCheck) {
            return Err(format!(
                "rule {}: llm_check rules belong to tier 3 and tier 3 only runs llm_check",
                rule.rule_id
            ));
        }

        let matcher = if rule.validation_type.needs_pattern() {
            let pattern = rule
                .pattern
                .as_deref()
                .filter(|p| !p.trim().is_empty())
                .ok_or_else(|| format!("rule {}: pattern required", rule.rule_id))?;
            let source = match rule.validation_type {
                ValidationType::Phrase => phrase_regex(pattern),
                _ => format!("(?i){}", pattern),
            };
            Some(Regex::new(&source).map_err(|e| format!("rule {}: {}", rule.rule_id, e))?)
        } else {
            None
        };

        Ok(Self { rule, matcher })
    }
}

/// Case-insensitive literal with word boundaries where the phrase edges are word characters
fn phrase_regex(phrase: &str) -> String {
    let is_word = |c: Option<char>| c.map(|c| c.is_alphanumeric() || c == '_').unwrap_or(false);
    let start = if is_word(phrase.chars().next()) { r"\b" } else { "" };
    let end = if is_word(phrase.chars().last()) { r"\b" } else { "" };
    format!("(?i){}{}{}", start, regex::escape(phrase), end)
}

/// Filter for [`Ruleset::query`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub page_type: Option<String>,
    #[serde(default)]
    pub enforcement_level: Option<EnforcementLevel>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Immutable compiled snapshot of one ruleset version
#[derive(Debug)]
pub struct Ruleset {
    pub version: String,
    pub passing_threshold: f64,
    pub rejection_threshold: f64,
    rules: Vec<CompiledRule>,
    forbidden_phrases: Vec<ForbiddenPhrase>,
    pub loaded_at: DateTime<Utc>,
}

impl Ruleset {
    pub fn compile(definition: RulesetDefinition) -> EngineResult<Self> {
        let version = definition.version.clone();
        let unavailable =
            |msg: String| EngineError::RuleStoreUnavailable(format!("ruleset {}: {}", version, msg));

        if !(0.0..=100.0).contains(&definition.passing_threshold)
            || !(0.0..=100.0).contains(&definition.rejection_threshold)
            || definition.rejection_threshold > definition.passing_threshold
        {
            return Err(unavailable(
                "thresholds must lie in [0, 100] with rejection <= passing".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definition.rules.len());
        for rule in definition.rules {
            if !seen.insert(rule.rule_id.clone()) {
                return Err(unavailable(format!("duplicate rule_id {}", rule.rule_id)));
            }
            rules.push(CompiledRule::compile(rule).map_err(unavailable)?);
        }

        rules.sort_by(|a, b| {
            b.rule
                .priority_score
                .total_cmp(&a.rule.priority_score)
                .then_with(|| a.rule.rule_id.cmp(&b.rule.rule_id))
        });

        Ok(Self {
            version: definition.version,
            passing_threshold: definition.passing_threshold,
            rejection_threshold: definition.rejection_threshold,
            rules,
            forbidden_phrases: definition.forbidden_phrases,
            loaded_at: tcv_common::time::now(),
        })
    }

    /// Every rule, ordered by priority_score desc then rule_id
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn query(&self, query: &RuleQuery) -> Vec<&Rule> {
        let matching = self
            .rules
            .iter()
            .map(|c| &c.rule)
            .filter(|r| query.category.as_deref().map_or(true, |c| r.category == c))
            .filter(|r| query.tier.map_or(true, |t| r.tier == t))
            .filter(|r| query.page_type.as_deref().map_or(true, |p| r.applies_to(p)))
            .filter(|r| query.enforcement_level.map_or(true, |l| r.enforcement_level == l));

        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Compiled rules of one tier that apply to a page type
    pub fn for_tier(&self, tier: Tier, page_type: &str) -> Vec<&CompiledRule> {
        self.rules
            .iter()
            .filter(|c| c.rule.tier == tier && c.rule.applies_to(page_type))
            .collect()
    }

    pub fn active_forbidden_phrases(&self) -> impl Iterator<Item = &ForbiddenPhrase> {
        self.forbidden_phrases.iter().filter(|p| p.active)
    }

    pub fn rule_count(&self, tier: Tier) -> usize {
        self.rules.iter().filter(|c| c.rule.tier == tier).count()
    }
}

/// Source of ruleset snapshots
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load (without activating) a version
    async fn load(&self, version: &str) -> EngineResult<Arc<Ruleset>>;

    /// Snapshot new assessments should use
    async fn current(&self) -> EngineResult<Arc<Ruleset>>;

    /// Load a version and make it current
    async fn reload(&self, version: &str) -> EngineResult<Arc<Ruleset>>;
}

/// Rule store backed by the `rulesets`/`rules`/`forbidden_phrases` tables
pub struct SqliteRuleStore {
    pool: SqlitePool,
    active: RwLock<Option<Arc<Ruleset>>>,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            active: RwLock::new(None),
        }
    }
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn load(&self, version: &str) -> EngineResult<Arc<Ruleset>> {
        let definition = rules_db::load_ruleset(&self.pool, version)
            .await
            .map_err(|e| EngineError::RuleStoreUnavailable(format!("ruleset {}: {}", version, e)))?
            .ok_or_else(|| {
                EngineError::RuleStoreUnavailable(format!("ruleset {} does not exist", version))
            })?;

        Ok(Arc::new(Ruleset::compile(definition)?))
    }

    async fn current(&self) -> EngineResult<Arc<Ruleset>> {
        self.active
            .read()
            .await
            .clone()
            .ok_or_else(|| EngineError::RuleStoreUnavailable("no ruleset loaded".to_string()))
    }

    async fn reload(&self, version: &str) -> EngineResult<Arc<Ruleset>> {
        let snapshot = self.load(version).await?;
        let previous = self.active.write().await.replace(Arc::clone(&snapshot));

        info!(
            version = %snapshot.version,
            previous = previous.as_ref().map(|p| p.version.as_str()).unwrap_or("none"),
            rules = snapshot.rules().len(),
            "Ruleset activated"
        );
        Ok(snapshot)
    }
}

/// Insert the built-in ruleset unless its version already exists
///
/// Returns true when rows were written.
pub async fn seed_default_ruleset(pool: &SqlitePool) -> EngineResult<bool> {
    seed_ruleset(pool, DEFAULT_RULESET).await
}

pub async fn seed_ruleset(pool: &SqlitePool, toml_text: &str) -> EngineResult<bool> {
    let definition = RulesetDefinition::from_toml(toml_text)?;

    // Validate before writing anything
    Ruleset::compile(definition.clone())?;

    if rules_db::ruleset_exists(pool, &definition.version).await? {
        return Ok(false);
    }

    rules_db::insert_ruleset(pool, &definition).await.map_err(|e| {
        warn!(version = %definition.version, error = %e, "Failed to seed ruleset");
        EngineError::from(e)
    })?;

    info!(
        version = %definition.version,
        rules = definition.rules.len(),
        forbidden_phrases = definition.forbidden_phrases.len(),
        "Ruleset seeded"
    );
    Ok(true)
}
