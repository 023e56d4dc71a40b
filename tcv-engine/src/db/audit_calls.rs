//! Audit call persistence
//!
//! Rows are inserted as PENDING before dispatch and transition exactly once
//! to a terminal status. The transition is guarded on `status = 'PENDING'`,
//! so a repeated completion affects zero rows.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tcv_common::{time, uuid_utils, Error, Result};
use uuid::Uuid;

use crate::types::{AuditCall, AuditStatus};

/// Terminal update applied to a pending audit row
#[derive(Debug, Clone, PartialEq)]
pub struct AuditCompletion {
    pub audit_id: Uuid,
    pub status: AuditStatus,
    pub response_hash: Option<String>,
    pub response_size: Option<u64>,
    pub response_status: Option<u16>,
    pub cost: f64,
    pub tokens: u64,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub async fn insert_pending(pool: &SqlitePool, call: &AuditCall) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_calls (
            audit_id, assessment_id, tool, endpoint, content_hash,
            request_hash, request_size, request_ref, status, started_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'PENDING', ?)
        "#,
    )
    .bind(call.audit_id.to_string())
    .bind(call.assessment_id.to_string())
    .bind(&call.tool)
    .bind(&call.endpoint)
    .bind(&call.content_hash)
    .bind(&call.request_hash)
    .bind(call.request_size as i64)
    .bind(&call.request_ref)
    .bind(call.started_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Move a pending row to its terminal state
///
/// Returns the number of rows changed (0 if the row was already terminal).
pub async fn complete_call(conn: &mut SqliteConnection, completion: &AuditCompletion) -> Result<u64> {
    if !completion.status.is_terminal() {
        return Err(Error::InvalidInput(
            "audit completion requires a terminal status".to_string(),
        ));
    }

    let result = sqlx::query(
        r#"
        UPDATE audit_calls
        SET status = ?, response_hash = ?, response_size = ?, response_status = ?,
            cost = ?, tokens = ?, error = ?, completed_at = ?, duration_ms = ?
        WHERE audit_id = ? AND status = 'PENDING'
        "#,
    )
    .bind(completion.status.as_str())
    .bind(&completion.response_hash)
    .bind(completion.response_size.map(|s| s as i64))
    .bind(completion.response_status.map(|s| s as i64))
    .bind(completion.cost)
    .bind(completion.tokens as i64)
    .bind(&completion.error)
    .bind(completion.completed_at.to_rfc3339())
    .bind(completion.duration_ms as i64)
    .bind(completion.audit_id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn get_call(pool: &SqlitePool, audit_id: Uuid) -> Result<Option<AuditCall>> {
    let row = sqlx::query(&select_sql("WHERE audit_id = ?"))
        .bind(audit_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_call(&r)).transpose()
}

pub async fn list_for_assessment(pool: &SqlitePool, assessment_id: Uuid) -> Result<Vec<AuditCall>> {
    let rows = sqlx::query(&select_sql("WHERE assessment_id = ? ORDER BY started_at ASC, rowid ASC"))
        .bind(assessment_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_call).collect()
}

/// Σ cost over every audit row of an assessment
pub async fn sum_cost(pool: &SqlitePool, assessment_id: Uuid) -> Result<f64> {
    let total: Option<f64> =
        sqlx::query_scalar("SELECT SUM(cost) FROM audit_calls WHERE assessment_id = ?")
            .bind(assessment_id.to_string())
            .fetch_one(pool)
            .await?;
    Ok(total.unwrap_or(0.0))
}

fn select_sql(tail: &str) -> String {
    format!(
        "SELECT audit_id, assessment_id, tool, endpoint, content_hash, request_hash, request_size, \
         request_ref, response_hash, response_size, response_status, status, cost, tokens, \
         started_at, completed_at, duration_ms FROM audit_calls {}",
        tail
    )
}

fn row_to_call(row: &SqliteRow) -> Result<AuditCall> {
    let audit_id: String = row.get("audit_id");
    let assessment_id: String = row.get("assessment_id");
    let status_str: String = row.get("status");
    let status = AuditStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown audit status '{}'", status_str)))?;
    let started_at: String = row.get("started_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(AuditCall {
        audit_id: uuid_utils::parse_column("audit_id", &audit_id)?,
        assessment_id: uuid_utils::parse_column("assessment_id", &assessment_id)?,
        tool: row.get("tool"),
        endpoint: row.get("endpoint"),
        content_hash: row.get("content_hash"),
        request_hash: row.get("request_hash"),
        request_size: row.get::<i64, _>("request_size") as u64,
        request_ref: row.get("request_ref"),
        response_hash: row.get("response_hash"),
        response_size: row.get::<Option<i64>, _>("response_size").map(|s| s as u64),
        response_status: row
            .get::<Option<i64>, _>("response_status")
            .map(|s| s as u16),
        status,
        cost: row.get("cost"),
        tokens: row.get::<i64, _>("tokens") as u64,
        started_at: time::parse_rfc3339(&started_at)?,
        completed_at: completed_at.as_deref().map(time::parse_rfc3339).transpose()?,
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|d| d as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    fn pending(assessment_id: Uuid) -> AuditCall {
        AuditCall {
            audit_id: Uuid::new_v4(),
            assessment_id,
            tool: "primary".to_string(),
            endpoint: "https://llm.example".to_string(),
            content_hash: "c".repeat(64),
            request_hash: "r".repeat(64),
            request_size: 120,
            request_ref: "sha256:rrr".to_string(),
            response_hash: None,
            response_size: None,
            response_status: None,
            status: AuditStatus::Pending,
            cost: 0.0,
            tokens: 0,
            started_at: time::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    fn success(audit_id: Uuid) -> AuditCompletion {
        AuditCompletion {
            audit_id,
            status: AuditStatus::Success,
            response_hash: Some("f".repeat(64)),
            response_size: Some(42),
            response_status: Some(200),
            cost: 0.01,
            tokens: 300,
            error: None,
            completed_at: time::now(),
            duration_ms: 15,
        }
    }

    #[tokio::test]
    async fn test_pending_then_complete() {
        let pool = init_memory_pool().await.unwrap();
        let call = pending(Uuid::new_v4());
        insert_pending(&pool, &call).await.unwrap();

        let stored = get_call(&pool, call.audit_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuditStatus::Pending);
        assert!(stored.completed_at.is_none());

        let mut conn = pool.acquire().await.unwrap();
        let changed = complete_call(&mut conn, &success(call.audit_id)).await.unwrap();
        assert_eq!(changed, 1);
        drop(conn);

        let stored = get_call(&pool, call.audit_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuditStatus::Success);
        assert_eq!(stored.response_status, Some(200));
        assert_eq!(stored.tokens, 300);
    }

    #[tokio::test]
    async fn test_second_completion_is_ignored() {
        let pool = init_memory_pool().await.unwrap();
        let call = pending(Uuid::new_v4());
        insert_pending(&pool, &call).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(complete_call(&mut conn, &success(call.audit_id)).await.unwrap(), 1);
        assert_eq!(complete_call(&mut conn, &success(call.audit_id)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pending_status_rejected_as_completion() {
        let pool = init_memory_pool().await.unwrap();
        let mut completion = success(Uuid::new_v4());
        completion.status = AuditStatus::Pending;
        let mut conn = pool.acquire().await.unwrap();
        assert!(complete_call(&mut conn, &completion).await.is_err());
    }

    #[tokio::test]
    async fn test_list_and_sum_per_assessment() {
        let pool = init_memory_pool().await.unwrap();
        let assessment_id = Uuid::new_v4();
        let a = pending(assessment_id);
        let b = pending(assessment_id);
        let other = pending(Uuid::new_v4());
        for call in [&a, &b, &other] {
            insert_pending(&pool, call).await.unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        complete_call(&mut conn, &success(a.audit_id)).await.unwrap();
        complete_call(&mut conn, &success(other.audit_id)).await.unwrap();
        drop(conn);

        assert_eq!(list_for_assessment(&pool, assessment_id).await.unwrap().len(), 2);
        assert!((sum_cost(&pool, assessment_id).await.unwrap() - 0.01).abs() < 1e-9);
    }
}
