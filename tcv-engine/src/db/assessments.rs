//! Finalized assessment persistence

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tcv_common::{Error, Result};
use uuid::Uuid;

use crate::types::AssessmentResult;

pub async fn insert_assessment(
    conn: &mut SqliteConnection,
    result: &AssessmentResult,
    page_type: &str,
    industry: &str,
) -> Result<()> {
    let result_json = serde_json::to_string(result)
        .map_err(|e| Error::Internal(format!("Failed to serialize assessment: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO assessments (
            assessment_id, content_hash, ruleset_version, page_type, industry,
            overall_score, status, confidence_level, cost_total, tokens_total,
            processing_time_ms, result_json, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(result.assessment_id.to_string())
    .bind(&result.content_hash)
    .bind(&result.ruleset_version)
    .bind(page_type)
    .bind(industry)
    .bind(result.overall_score)
    .bind(result.status.as_str())
    .bind(result.confidence_level.as_str())
    .bind(result.cost_total)
    .bind(result.tokens_total as i64)
    .bind(result.processing_time_ms as i64)
    .bind(&result_json)
    .bind(result.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_assessment(pool: &SqlitePool, assessment_id: Uuid) -> Result<Option<AssessmentResult>> {
    let json: Option<String> =
        sqlx::query_scalar("SELECT result_json FROM assessments WHERE assessment_id = ?")
            .bind(assessment_id.to_string())
            .fetch_optional(pool)
            .await?;

    json.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| Error::Internal(format!("Corrupt assessment {}: {}", assessment_id, e)))
    })
    .transpose()
}

/// Aggregate over recent assessments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentValidations {
    pub total: i64,
    pub passed: i64,
    pub avg_score: f64,
    pub total_cost: f64,
}

pub async fn recent_validations(pool: &SqlitePool, since: DateTime<Utc>) -> Result<RecentValidations> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(CASE WHEN status IN ('PASSED', 'AUTO_FIXED') THEN 1 ELSE 0 END), 0) AS passed,
               COALESCE(AVG(overall_score), 0.0) AS avg_score,
               COALESCE(SUM(cost_total), 0.0) AS total_cost
        FROM assessments
        WHERE created_at >= ?
        "#,
    )
    .bind(since.to_rfc3339())
    .fetch_one(pool)
    .await?;

    Ok(RecentValidations {
        total: row.get("total"),
        passed: row.get("passed"),
        avg_score: row.get("avg_score"),
        total_cost: row.get("total_cost"),
    })
}
