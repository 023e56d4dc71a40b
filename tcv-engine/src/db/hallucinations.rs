//! Hallucination detection persistence

use sqlx::{Row, SqliteConnection, SqlitePool};
use tcv_common::{time, uuid_utils, Error, Result};
use uuid::Uuid;

use crate::types::{HallucinationDetection, Severity};

pub async fn insert_detection(
    conn: &mut SqliteConnection,
    detection: &HallucinationDetection,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO hallucination_detections (
            detection_id, assessment_id, flagged_content, rule, severity, resolved, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(detection.detection_id.to_string())
    .bind(detection.assessment_id.to_string())
    .bind(&detection.flagged_content)
    .bind(&detection.rule)
    .bind(detection.severity.as_str())
    .bind(detection.resolved)
    .bind(time::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_for_assessment(
    pool: &SqlitePool,
    assessment_id: Uuid,
) -> Result<Vec<HallucinationDetection>> {
    let rows = sqlx::query(
        r#"
        SELECT detection_id, assessment_id, flagged_content, rule, severity, resolved
        FROM hallucination_detections
        WHERE assessment_id = ?
        ORDER BY rowid ASC
        "#,
    )
    .bind(assessment_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let detection_id: String = row.get("detection_id");
            let assessment_id: String = row.get("assessment_id");
            let severity: String = row.get("severity");
            Ok(HallucinationDetection {
                detection_id: uuid_utils::parse_column("detection_id", &detection_id)?,
                assessment_id: uuid_utils::parse_column("assessment_id", &assessment_id)?,
                flagged_content: row.get("flagged_content"),
                rule: row.get("rule"),
                severity: Severity::parse(&severity)
                    .ok_or_else(|| Error::Internal(format!("Unknown severity '{}'", severity)))?,
                resolved: row.get("resolved"),
            })
        })
        .collect()
}

/// Resolve every open detection of an assessment (reviewer sign-off)
pub async fn resolve_all(conn: &mut SqliteConnection, assessment_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE hallucination_detections SET resolved = 1 WHERE assessment_id = ? AND resolved = 0",
    )
    .bind(assessment_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
