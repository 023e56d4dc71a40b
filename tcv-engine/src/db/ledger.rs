//! Cost ledger persistence
//!
//! Append-only. `audit_id` is unique, so a retried append of the same
//! terminal call is ignored instead of double-counting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tcv_common::{time, uuid_utils, Error, Result};
use uuid::Uuid;

use crate::types::AuditStatus;

/// One billed (or zero-cost) terminal call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub audit_id: Uuid,
    pub assessment_id: Uuid,
    pub provider: String,
    pub endpoint: String,
    pub status: AuditStatus,
    pub cost: f64,
    pub tokens: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Append an entry; returns false when the audit call was already recorded
pub async fn append_entry(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO cost_ledger (
            audit_id, assessment_id, provider, endpoint, status, cost, tokens, recorded_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.audit_id.to_string())
    .bind(entry.assessment_id.to_string())
    .bind(&entry.provider)
    .bind(&entry.endpoint)
    .bind(entry.status.as_str())
    .bind(entry.cost)
    .bind(entry.tokens as i64)
    .bind(entry.recorded_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn total_for_assessment(pool: &SqlitePool, assessment_id: Uuid) -> Result<(f64, u64)> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(cost), 0.0) AS cost, COALESCE(SUM(tokens), 0) AS tokens \
         FROM cost_ledger WHERE assessment_id = ?",
    )
    .bind(assessment_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok((row.get("cost"), row.get::<i64, _>("tokens") as u64))
}

pub async fn list_for_assessment(pool: &SqlitePool, assessment_id: Uuid) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT audit_id, assessment_id, provider, endpoint, status, cost, tokens, recorded_at
        FROM cost_ledger
        WHERE assessment_id = ?
        ORDER BY entry_id ASC
        "#,
    )
    .bind(assessment_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let audit_id: String = row.get("audit_id");
            let assessment_id: String = row.get("assessment_id");
            let status_str: String = row.get("status");
            let recorded_at: String = row.get("recorded_at");
            Ok(LedgerEntry {
                audit_id: uuid_utils::parse_column("audit_id", &audit_id)?,
                assessment_id: uuid_utils::parse_column("assessment_id", &assessment_id)?,
                provider: row.get("provider"),
                endpoint: row.get("endpoint"),
                status: AuditStatus::parse(&status_str).ok_or_else(|| {
                    Error::Internal(format!("Unknown ledger status '{}'", status_str))
                })?,
                cost: row.get("cost"),
                tokens: row.get::<i64, _>("tokens") as u64,
                recorded_at: time::parse_rfc3339(&recorded_at)?,
            })
        })
        .collect()
}

/// Total spend recorded since a point in time
pub async fn total_since(pool: &SqlitePool, since: DateTime<Utc>) -> Result<f64> {
    let total: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(cost), 0.0) FROM cost_ledger WHERE recorded_at >= ?",
    )
    .bind(since.to_rfc3339())
    .fetch_one(pool)
    .await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{audit_calls, init_memory_pool};
    use crate::types::AuditCall;

    async fn seed_call(pool: &SqlitePool, assessment_id: Uuid) -> Uuid {
        let call = AuditCall {
            audit_id: Uuid::new_v4(),
            assessment_id,
            tool: "p".to_string(),
            endpoint: "e".to_string(),
            content_hash: "c".to_string(),
            request_hash: "r".to_string(),
            request_size: 1,
            request_ref: "sha256:r".to_string(),
            response_hash: None,
            response_size: None,
            response_status: None,
            status: AuditStatus::Pending,
            cost: 0.0,
            tokens: 0,
            started_at: time::now(),
            completed_at: None,
            duration_ms: None,
        };
        audit_calls::insert_pending(pool, &call).await.unwrap();
        call.audit_id
    }

    fn entry(audit_id: Uuid, assessment_id: Uuid, cost: f64) -> LedgerEntry {
        LedgerEntry {
            audit_id,
            assessment_id,
            provider: "p".to_string(),
            endpoint: "e".to_string(),
            status: AuditStatus::Success,
            cost,
            tokens: 100,
            recorded_at: time::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_append_is_ignored() {
        let pool = init_memory_pool().await.unwrap();
        let assessment_id = Uuid::new_v4();
        let audit_id = seed_call(&pool, assessment_id).await;

        let mut conn = pool.acquire().await.unwrap();
        assert!(append_entry(&mut conn, &entry(audit_id, assessment_id, 0.02)).await.unwrap());
        assert!(!append_entry(&mut conn, &entry(audit_id, assessment_id, 0.02)).await.unwrap());
        drop(conn);

        let (cost, tokens) = total_for_assessment(&pool, assessment_id).await.unwrap();
        assert!((cost - 0.02).abs() < 1e-9);
        assert_eq!(tokens, 100);
        assert_eq!(list_for_assessment(&pool, assessment_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_entry_requires_existing_audit_call() {
        let pool = init_memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let orphan = entry(Uuid::new_v4(), Uuid::new_v4(), 0.5);
        assert!(append_entry(&mut conn, &orphan).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_assessment_totals_zero() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(total_for_assessment(&pool, Uuid::new_v4()).await.unwrap(), (0.0, 0));
        assert_eq!(total_since(&pool, time::now()).await.unwrap(), 0.0);
    }
}
