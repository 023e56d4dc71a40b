//! Database access for tcv-engine
//!
//! One SQLite database holds the ruleset snapshots, the provenance trail
//! (audit calls, ledger, claims, detections) and the verification queue.
//! Every function borrows a pooled connection for the duration of the query;
//! multi-statement transitions use transactions that roll back on drop.

pub mod assessments;
pub mod audit_calls;
pub mod claims;
pub mod hallucinations;
pub mod ledger;
pub mod review;
pub mod rules;

use sqlx::SqlitePool;
use std::path::Path;
use tcv_common::Result;

/// Open (or create) the engine database and make sure every table exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let pool = tcv_common::db::init_database(db_path).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// In-memory database with the full schema
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = tcv_common::db::init_memory_database().await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create engine tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rulesets (
            version TEXT PRIMARY KEY,
            passing_threshold REAL NOT NULL,
            rejection_threshold REAL NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rules (
            ruleset_version TEXT NOT NULL REFERENCES rulesets(version),
            rule_id TEXT NOT NULL,
            category TEXT NOT NULL,
            tier INTEGER NOT NULL CHECK (tier IN (1, 2, 3)),
            description TEXT NOT NULL,
            validation_type TEXT NOT NULL,
            enforcement_level TEXT NOT NULL,
            priority_score REAL NOT NULL DEFAULT 0.0,
            applicable_page_types TEXT NOT NULL DEFAULT '[]',
            pattern TEXT,
            replacement TEXT,
            threshold REAL,
            penalty REAL,
            PRIMARY KEY (ruleset_version, rule_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS forbidden_phrases (
            ruleset_version TEXT NOT NULL REFERENCES rulesets(version),
            phrase TEXT NOT NULL,
            reason TEXT NOT NULL,
            severity TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (ruleset_version, phrase)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assessments (
            assessment_id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            ruleset_version TEXT NOT NULL,
            page_type TEXT NOT NULL,
            industry TEXT NOT NULL DEFAULT '',
            overall_score REAL NOT NULL,
            status TEXT NOT NULL,
            confidence_level TEXT NOT NULL,
            cost_total REAL NOT NULL DEFAULT 0.0,
            tokens_total INTEGER NOT NULL DEFAULT 0,
            processing_time_ms INTEGER NOT NULL DEFAULT 0,
            result_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Audit rows are written before the assessment row exists, so
    // assessment_id is a plain column rather than a foreign key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_calls (
            audit_id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            tool TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            request_size INTEGER NOT NULL,
            request_ref TEXT NOT NULL,
            response_hash TEXT,
            response_size INTEGER,
            response_status INTEGER,
            status TEXT NOT NULL DEFAULT 'PENDING',
            cost REAL NOT NULL DEFAULT 0.0,
            tokens INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            duration_ms INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_calls_assessment ON audit_calls(assessment_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cost_ledger (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            audit_id TEXT NOT NULL UNIQUE REFERENCES audit_calls(audit_id),
            assessment_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            status TEXT NOT NULL,
            cost REAL NOT NULL,
            tokens INTEGER NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cost_ledger_assessment ON cost_ledger(assessment_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claims (
            claim_id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            text TEXT NOT NULL,
            source_audit_id TEXT NOT NULL REFERENCES audit_calls(audit_id),
            content_hash TEXT NOT NULL,
            confidence_level TEXT NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hallucination_detections (
            detection_id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL,
            flagged_content TEXT NOT NULL,
            rule TEXT NOT NULL,
            severity TEXT NOT NULL,
            resolved INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_items (
            item_id TEXT PRIMARY KEY,
            assessment_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 0,
            data_snapshot TEXT NOT NULL,
            reviewer_id TEXT,
            verified_by TEXT,
            verified_at TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_review_items_queue ON review_items(status, priority DESC, created_at)",
    )
    .execute(pool)
    .await?;

    // One effective decision per item; idempotent repeats never add rows
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_decisions (
            decision_id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL UNIQUE REFERENCES review_items(item_id),
            reviewer_id TEXT NOT NULL,
            action TEXT NOT NULL,
            notes TEXT,
            decided_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (rulesets, rules, forbidden_phrases, assessments, audit_calls, \
         cost_ledger, claims, hallucination_detections, review_items, review_decisions)"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_tables_is_repeatable() {
        let pool = init_memory_pool().await.unwrap();
        init_tables(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 10);
    }
}
