//! Claim persistence

use sqlx::{Row, SqliteConnection, SqlitePool};
use tcv_common::{time, uuid_utils, Error, Result};
use uuid::Uuid;

use crate::types::{Claim, ConfidenceLevel};

pub async fn insert_claim(conn: &mut SqliteConnection, claim: &Claim) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO claims (
            claim_id, assessment_id, text, source_audit_id, content_hash,
            confidence_level, verified, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(claim.claim_id.to_string())
    .bind(claim.assessment_id.to_string())
    .bind(&claim.text)
    .bind(claim.source_audit_id.to_string())
    .bind(&claim.content_hash)
    .bind(claim.confidence_level.as_str())
    .bind(claim.verified)
    .bind(time::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_for_assessment(pool: &SqlitePool, assessment_id: Uuid) -> Result<Vec<Claim>> {
    let rows = sqlx::query(
        r#"
        SELECT claim_id, assessment_id, text, source_audit_id, content_hash, confidence_level, verified
        FROM claims
        WHERE assessment_id = ?
        ORDER BY rowid ASC
        "#,
    )
    .bind(assessment_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let claim_id: String = row.get("claim_id");
            let assessment_id: String = row.get("assessment_id");
            let source: String = row.get("source_audit_id");
            let confidence: String = row.get("confidence_level");
            Ok(Claim {
                claim_id: uuid_utils::parse_column("claim_id", &claim_id)?,
                assessment_id: uuid_utils::parse_column("assessment_id", &assessment_id)?,
                text: row.get("text"),
                source_audit_id: uuid_utils::parse_column("source_audit_id", &source)?,
                content_hash: row.get("content_hash"),
                confidence_level: ConfidenceLevel::parse(&confidence).ok_or_else(|| {
                    Error::Internal(format!("Unknown confidence level '{}'", confidence))
                })?,
                verified: row.get("verified"),
            })
        })
        .collect()
}

/// Mark every claim of an assessment as human-verified
pub async fn mark_verified(conn: &mut SqliteConnection, assessment_id: Uuid) -> Result<u64> {
    let result = sqlx::query("UPDATE claims SET verified = 1 WHERE assessment_id = ? AND verified = 0")
        .bind(assessment_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
