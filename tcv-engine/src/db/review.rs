//! Verification queue persistence
//!
//! State transitions are optimistic: each UPDATE names the status it expects
//! to move from, and callers inspect `rows_affected` to learn whether they
//! won the transition.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tcv_common::{time, uuid_utils, Error, Result};
use uuid::Uuid;

use crate::types::{ReviewAction, ReviewItem, ReviewStatus};

const SELECT_ITEM: &str = "SELECT item_id, assessment_id, status, priority, data_snapshot, \
     reviewer_id, verified_by, verified_at, notes, created_at FROM review_items";

/// Queue an item; an assessment is queued at most once
pub async fn insert_item(conn: &mut SqliteConnection, item: &ReviewItem) -> Result<bool> {
    let snapshot = serde_json::to_string(&item.data_snapshot)
        .map_err(|e| Error::Internal(format!("Failed to serialize snapshot: {}", e)))?;
    let created_at = item.created_at.to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO review_items (
            item_id, assessment_id, status, priority, data_snapshot, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(assessment_id) DO NOTHING
        "#,
    )
    .bind(item.item_id.to_string())
    .bind(item.assessment_id.to_string())
    .bind(item.status.as_str())
    .bind(item.priority)
    .bind(&snapshot)
    .bind(&created_at)
    .bind(&created_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_item(pool: &SqlitePool, item_id: Uuid) -> Result<Option<ReviewItem>> {
    let row = sqlx::query(&format!("{} WHERE item_id = ?", SELECT_ITEM))
        .bind(item_id.to_string())
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_item(&r)).transpose()
}

pub async fn get_item_tx(conn: &mut SqliteConnection, item_id: Uuid) -> Result<Option<ReviewItem>> {
    let row = sqlx::query(&format!("{} WHERE item_id = ?", SELECT_ITEM))
        .bind(item_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(|r| row_to_item(&r)).transpose()
}

/// Queue in review order: highest priority first, then oldest first
pub async fn list_queue(
    pool: &SqlitePool,
    status: Option<ReviewStatus>,
    limit: i64,
) -> Result<Vec<ReviewItem>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "{} WHERE status = ? ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ?",
                SELECT_ITEM
            ))
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "{} ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ?",
                SELECT_ITEM
            ))
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(row_to_item).collect()
}

/// pending → in_review; returns false if someone else got there first
pub async fn try_claim(pool: &SqlitePool, item_id: Uuid, reviewer_id: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE review_items
        SET status = 'in_review', reviewer_id = ?, updated_at = ?
        WHERE item_id = ? AND status = 'pending'
        "#,
    )
    .bind(reviewer_id)
    .bind(time::now().to_rfc3339())
    .bind(item_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move an undecided item to its decided state
///
/// Only the owning reviewer may decide an in_review item; a pending item may
/// be decided by anyone (it is claimed implicitly).
pub async fn apply_decision(
    conn: &mut SqliteConnection,
    item_id: Uuid,
    status: ReviewStatus,
    reviewer_id: &str,
    notes: Option<&str>,
    edited_snapshot: Option<&serde_json::Value>,
) -> Result<bool> {
    let snapshot = edited_snapshot
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize snapshot: {}", e)))?;
    let now = time::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE review_items
        SET status = ?, reviewer_id = ?, verified_by = ?, verified_at = ?, notes = ?,
            data_snapshot = COALESCE(?, data_snapshot), updated_at = ?
        WHERE item_id = ?
          AND (status = 'pending' OR (status = 'in_review' AND reviewer_id = ?))
        "#,
    )
    .bind(status.as_str())
    .bind(reviewer_id)
    .bind(reviewer_id)
    .bind(&now)
    .bind(notes)
    .bind(&snapshot)
    .bind(&now)
    .bind(item_id.to_string())
    .bind(reviewer_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn insert_decision(
    conn: &mut SqliteConnection,
    item_id: Uuid,
    reviewer_id: &str,
    action: ReviewAction,
    notes: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO review_decisions (item_id, reviewer_id, action, notes, decided_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(item_id.to_string())
    .bind(reviewer_id)
    .bind(action.as_str())
    .bind(notes)
    .bind(time::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn count_decisions(pool: &SqlitePool, item_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM review_decisions WHERE item_id = ?")
        .bind(item_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_by_status(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM review_items GROUP BY status ORDER BY status")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("status"), row.get("n")))
        .collect())
}

fn row_to_item(row: &SqliteRow) -> Result<ReviewItem> {
    let item_id: String = row.get("item_id");
    let assessment_id: String = row.get("assessment_id");
    let status_str: String = row.get("status");
    let snapshot: String = row.get("data_snapshot");
    let verified_at: Option<String> = row.get("verified_at");
    let created_at: String = row.get("created_at");

    Ok(ReviewItem {
        item_id: uuid_utils::parse_column("item_id", &item_id)?,
        assessment_id: uuid_utils::parse_column("assessment_id", &assessment_id)?,
        status: ReviewStatus::parse(&status_str)
            .ok_or_else(|| Error::Internal(format!("Unknown review status '{}'", status_str)))?,
        priority: row.get("priority"),
        data_snapshot: serde_json::from_str(&snapshot)
            .map_err(|e| Error::Internal(format!("Corrupt review snapshot: {}", e)))?,
        reviewer_id: row.get("reviewer_id"),
        verified_by: row.get("verified_by"),
        verified_at: verified_at.as_deref().map(time::parse_rfc3339).transpose()?,
        notes: row.get("notes"),
        created_at: time::parse_rfc3339(&created_at)?,
    })
}
