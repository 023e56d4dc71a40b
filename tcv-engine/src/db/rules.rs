//! Ruleset persistence
//!
//! Rulesets are written once per version and never updated in place.
//! A new version is a new set of rows.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tcv_common::{Error, Result};

use crate::types::{EnforcementLevel, ForbiddenPhrase, Rule, Severity, Tier, ValidationType};

/// Complete ruleset version as stored and as shipped in TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetDefinition {
    pub version: String,
    /// Overall score at or above which content passes
    pub passing_threshold: f64,
    /// Overall score below which hallucination penalties force rejection
    pub rejection_threshold: f64,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub forbidden_phrases: Vec<ForbiddenPhrase>,
}

impl RulesetDefinition {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("Invalid ruleset TOML: {}", e)))
    }
}

pub async fn ruleset_exists(pool: &SqlitePool, version: &str) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rulesets WHERE version = ?")
        .bind(version)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// Insert a ruleset version with its rules and forbidden phrases
///
/// Fails if the version already exists.
pub async fn insert_ruleset(pool: &SqlitePool, definition: &RulesetDefinition) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO rulesets (version, passing_threshold, rejection_threshold, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&definition.version)
    .bind(definition.passing_threshold)
    .bind(definition.rejection_threshold)
    .bind(tcv_common::time::now().to_rfc3339())
    .execute(&mut *tx)
    .await?;

    for rule in &definition.rules {
        let page_types = serde_json::to_string(&rule.applicable_page_types)
            .map_err(|e| Error::Internal(format!("Failed to serialize page types: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO rules (
                ruleset_version, rule_id, category, tier, description, validation_type,
                enforcement_level, priority_score, applicable_page_types,
                pattern, replacement, threshold, penalty
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.version)
        .bind(&rule.rule_id)
        .bind(&rule.category)
        .bind(rule.tier.number() as i64)
        .bind(&rule.description)
        .bind(rule.validation_type.as_str())
        .bind(rule.enforcement_level.as_str())
        .bind(rule.priority_score)
        .bind(&page_types)
        .bind(&rule.pattern)
        .bind(&rule.replacement)
        .bind(rule.threshold)
        .bind(rule.penalty)
        .execute(&mut *tx)
        .await?;
    }

    for phrase in &definition.forbidden_phrases {
        sqlx::query(
            r#"
            INSERT INTO forbidden_phrases (ruleset_version, phrase, reason, severity, active)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.version)
        .bind(&phrase.phrase)
        .bind(&phrase.reason)
        .bind(phrase.severity.as_str())
        .bind(phrase.active)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Load a complete ruleset version
pub async fn load_ruleset(pool: &SqlitePool, version: &str) -> Result<Option<RulesetDefinition>> {
    let header = sqlx::query(
        "SELECT version, passing_threshold, rejection_threshold FROM rulesets WHERE version = ?",
    )
    .bind(version)
    .fetch_optional(pool)
    .await?;

    let Some(header) = header else {
        return Ok(None);
    };

    let rule_rows = sqlx::query(
        r#"
        SELECT rule_id, category, tier, description, validation_type, enforcement_level,
               priority_score, applicable_page_types, pattern, replacement, threshold, penalty
        FROM rules
        WHERE ruleset_version = ?
        ORDER BY priority_score DESC, rule_id ASC
        "#,
    )
    .bind(version)
    .fetch_all(pool)
    .await?;

    let mut rules = Vec::with_capacity(rule_rows.len());
    for row in rule_rows {
        let rule_id: String = row.get("rule_id");
        let tier_num: i64 = row.get("tier");
        let tier = u8::try_from(tier_num)
            .map_err(|_| Error::Internal(format!("Rule {} has invalid tier {}", rule_id, tier_num)))
            .and_then(|n| Tier::try_from(n).map_err(Error::Internal))?;

        let validation_type_str: String = row.get("validation_type");
        let validation_type = ValidationType::parse(&validation_type_str).ok_or_else(|| {
            Error::Internal(format!(
                "Rule {} has unknown validation type '{}'",
                rule_id, validation_type_str
            ))
        })?;

        let enforcement_str: String = row.get("enforcement_level");
        let enforcement_level = EnforcementLevel::parse(&enforcement_str).ok_or_else(|| {
            Error::Internal(format!(
                "Rule {} has unknown enforcement level '{}'",
                rule_id, enforcement_str
            ))
        })?;

        let page_types_json: String = row.get("applicable_page_types");
        let applicable_page_types: Vec<String> = serde_json::from_str(&page_types_json)
            .map_err(|e| Error::Internal(format!("Rule {} page types: {}", rule_id, e)))?;

        rules.push(Rule {
            rule_id,
            category: row.get("category"),
            tier,
            description: row.get("description"),
            validation_type,
            enforcement_level,
            priority_score: row.get("priority_score"),
            applicable_page_types,
            pattern: row.get("pattern"),
            replacement: row.get("replacement"),
            threshold: row.get("threshold"),
            penalty: row.get("penalty"),
        });
    }

    let phrase_rows = sqlx::query(
        r#"
        SELECT phrase, reason, severity, active
        FROM forbidden_phrases
        WHERE ruleset_version = ?
        ORDER BY phrase ASC
        "#,
    )
    .bind(version)
    .fetch_all(pool)
    .await?;

    let mut forbidden_phrases = Vec::with_capacity(phrase_rows.len());
    for row in phrase_rows {
        let severity_str: String = row.get("severity");
        let severity = Severity::parse(&severity_str).ok_or_else(|| {
            Error::Internal(format!("Unknown forbidden phrase severity '{}'", severity_str))
        })?;
        forbidden_phrases.push(ForbiddenPhrase {
            phrase: row.get("phrase"),
            reason: row.get("reason"),
            severity,
            active: row.get("active"),
        });
    }

    Ok(Some(RulesetDefinition {
        version: header.get("version"),
        passing_threshold: header.get("passing_threshold"),
        rejection_threshold: header.get("rejection_threshold"),
        rules,
        forbidden_phrases,
    }))
}

/// Rule counts per tier for a version
pub async fn count_rules_by_tier(pool: &SqlitePool, version: &str) -> Result<Vec<(u8, i64)>> {
    let rows = sqlx::query(
        "SELECT tier, COUNT(*) AS n FROM rules WHERE ruleset_version = ? GROUP BY tier ORDER BY tier",
    )
    .bind(version)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let tier: i64 = row.get("tier");
            (tier as u8, row.get::<i64, _>("n"))
        })
        .collect())
}
