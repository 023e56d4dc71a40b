//! Verification Gate
//!
//! Human checkpoint for MANUAL_REVIEW results. Items are served highest
//! priority first, then oldest first. A reviewer claims an item with an
//! optimistic pending → in_review transition; a second concurrent claim
//! loses. Decisions are idempotent: repeating the decision an item already
//! carries returns the current state and writes nothing.

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::claims as claims_db;
use crate::db::hallucinations as hallucinations_db;
use crate::db::review as review_db;
use crate::error::{EngineError, EngineResult};
use crate::types::{AssessmentResult, ReviewAction, ReviewItem, ReviewStatus};
use crate::utils::retry_on_lock;

pub const DEFAULT_QUEUE_LIMIT: i64 = 50;
const MAX_QUEUE_LIMIT: i64 = 500;

/// Build the queue entry for a result, snapshotting it as JSON
pub fn review_item_for(result: &AssessmentResult, item_id: Uuid, priority: i64) -> EngineResult<ReviewItem> {
    let data_snapshot = serde_json::to_value(result).map_err(|e| {
        EngineError::Common(tcv_common::Error::Internal(format!(
            "Failed to snapshot assessment {}: {}",
            result.assessment_id, e
        )))
    })?;
    Ok(ReviewItem {
        item_id,
        assessment_id: result.assessment_id,
        status: ReviewStatus::Pending,
        priority,
        data_snapshot,
        reviewer_id: None,
        verified_by: None,
        verified_at: None,
        notes: None,
        created_at: tcv_common::time::now(),
    })
}

/// What a decision transaction found and did
enum Decision {
    Applied(ReviewItem),
    AlreadyApplied(ReviewItem),
    AlreadyDecided(ReviewStatus),
    ClaimedByOther,
    Missing,
}

#[derive(Clone)]
pub struct VerificationGate {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl VerificationGate {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Queue an item; returns false if its assessment is already queued
    pub async fn enqueue(&self, item: &ReviewItem) -> EngineResult<bool> {
        let mut conn = self.pool.acquire().await.map_err(tcv_common::Error::from)?;
        Ok(review_db::insert_item(&mut conn, item).await?)
    }

    pub async fn get(&self, item_id: Uuid) -> EngineResult<ReviewItem> {
        review_db::get_item(&self.pool, item_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("review item {}", item_id)))
    }

    pub async fn queue(&self, status: Option<ReviewStatus>, limit: Option<i64>) -> EngineResult<Vec<ReviewItem>> {
        let limit = limit.unwrap_or(DEFAULT_QUEUE_LIMIT).clamp(1, MAX_QUEUE_LIMIT);
        Ok(review_db::list_queue(&self.pool, status, limit).await?)
    }

    /// Take ownership of a pending item
    pub async fn claim(&self, item_id: Uuid, reviewer_id: &str) -> EngineResult<ReviewItem> {
        let reviewer_id = validate_reviewer(reviewer_id)?;

        if review_db::try_claim(&self.pool, item_id, reviewer_id).await? {
            info!(item_id = %item_id, reviewer_id, "Review item claimed");
            return self.get(item_id).await;
        }

        let item = self.get(item_id).await?;
        if item.status == ReviewStatus::InReview && item.reviewer_id.as_deref() == Some(reviewer_id) {
            return Ok(item);
        }
        Err(EngineError::Conflict(format!(
            "review item {} is {}{}",
            item_id,
            item.status.as_str(),
            item.reviewer_id
                .map(|owner| format!(" (owned by {})", owner))
                .unwrap_or_default()
        )))
    }

    /// Decide an item
    ///
    /// APPROVE and EDIT mark the assessment's claims verified and resolve its
    /// hallucination flags; EDIT may replace the snapshot.
    pub async fn decide(
        &self,
        item_id: Uuid,
        action: ReviewAction,
        reviewer_id: &str,
        notes: Option<&str>,
        edited_snapshot: Option<&Value>,
    ) -> EngineResult<ReviewItem> {
        let reviewer_id = validate_reviewer(reviewer_id)?;
        if edited_snapshot.is_some() && action != ReviewAction::Edit {
            return Err(EngineError::Validation(
                "an edited snapshot is only accepted with EDIT".to_string(),
            ));
        }
        let target = action.target_status();

        let decision = retry_on_lock("review_decision", self.max_lock_wait_ms, || {
            self.decide_tx(item_id, action, target, reviewer_id, notes, edited_snapshot)
        })
        .await?;

        let item = match decision {
            Decision::Applied(item) => item,
            Decision::AlreadyApplied(item) => {
                debug!(item_id = %item_id, action = action.as_str(), "Decision already applied");
                return Ok(item);
            }
            Decision::AlreadyDecided(status) => {
                return Err(EngineError::Conflict(format!(
                    "review item {} is already {}",
                    item_id,
                    status.as_str()
                )));
            }
            Decision::ClaimedByOther => {
                return Err(EngineError::Conflict(format!(
                    "review item {} is claimed by another reviewer",
                    item_id
                )));
            }
            Decision::Missing => {
                return Err(EngineError::NotFound(format!("review item {}", item_id)));
            }
        };

        info!(
            item_id = %item_id,
            assessment_id = %item.assessment_id,
            reviewer_id,
            action = action.as_str(),
            "Review decision recorded"
        );
        self.get(item_id).await
    }

    /// One attempt at the decision; dropping `tx` on any early return rolls back
    async fn decide_tx(
        &self,
        item_id: Uuid,
        action: ReviewAction,
        target: ReviewStatus,
        reviewer_id: &str,
        notes: Option<&str>,
        edited_snapshot: Option<&Value>,
    ) -> tcv_common::Result<Decision> {
        let mut tx = self.pool.begin().await?;

        let Some(item) = review_db::get_item_tx(&mut *tx, item_id).await? else {
            return Ok(Decision::Missing);
        };

        if item.status.is_decided() {
            if item.status == target {
                return Ok(Decision::AlreadyApplied(item));
            }
            return Ok(Decision::AlreadyDecided(item.status));
        }

        let applied =
            review_db::apply_decision(&mut *tx, item_id, target, reviewer_id, notes, edited_snapshot)
                .await?;
        if !applied {
            return Ok(Decision::ClaimedByOther);
        }
        review_db::insert_decision(&mut *tx, item_id, reviewer_id, action, notes).await?;

        if target == ReviewStatus::Approved {
            let verified = claims_db::mark_verified(&mut *tx, item.assessment_id).await?;
            let resolved = hallucinations_db::resolve_all(&mut *tx, item.assessment_id).await?;
            debug!(item_id = %item_id, verified, resolved, "Assessment signed off");
        }

        tx.commit().await?;
        Ok(Decision::Applied(item))
    }
}

fn validate_reviewer(reviewer_id: &str) -> EngineResult<&str> {
    let trimmed = reviewer_id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation("reviewer_id must not be empty".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::types::{HallucinationDetection, Severity};
    use serde_json::json;

    async fn setup() -> (SqlitePool, VerificationGate) {
        let pool = init_memory_pool().await.unwrap();
        (pool.clone(), VerificationGate::new(pool, 1000))
    }

    fn item(priority: i64) -> ReviewItem {
        ReviewItem {
            item_id: Uuid::new_v4(),
            assessment_id: Uuid::new_v4(),
            status: ReviewStatus::Pending,
            priority,
            data_snapshot: json!({"status": "MANUAL_REVIEW"}),
            reviewer_id: None,
            verified_by: None,
            verified_at: None,
            notes: None,
            created_at: tcv_common::time::now(),
        }
    }

    #[tokio::test]
    async fn test_queue_orders_by_priority_then_age() {
        let (_, gate) = setup().await;
        let low = item(0);
        let high = item(5);
        let low_later = item(0);
        for i in [&low, &high, &low_later] {
            assert!(gate.enqueue(i).await.unwrap());
        }

        let ids: Vec<Uuid> = gate
            .queue(Some(ReviewStatus::Pending), None)
            .await
            .unwrap()
            .iter()
            .map(|i| i.item_id)
            .collect();
        assert_eq!(ids, vec![high.item_id, low.item_id, low_later.item_id]);
    }

    #[tokio::test]
    async fn test_assessment_enqueued_once() {
        let (_, gate) = setup().await;
        let first = item(0);
        let mut second = item(0);
        second.assessment_id = first.assessment_id;
        assert!(gate.enqueue(&first).await.unwrap());
        assert!(!gate.enqueue(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_claim_conflicts() {
        let (_, gate) = setup().await;
        let queued = item(1);
        gate.enqueue(&queued).await.unwrap();

        let claimed = gate.claim(queued.item_id, "alice").await.unwrap();
        assert_eq!(claimed.status, ReviewStatus::InReview);
        assert_eq!(claimed.reviewer_id.as_deref(), Some("alice"));

        // repeating one's own claim is harmless
        assert!(gate.claim(queued.item_id, "alice").await.is_ok());
        assert!(matches!(
            gate.claim(queued.item_id, "bob").await,
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            gate.claim(Uuid::new_v4(), "bob").await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_only_owner_decides_claimed_item() {
        let (_, gate) = setup().await;
        let queued = item(1);
        gate.enqueue(&queued).await.unwrap();
        gate.claim(queued.item_id, "alice").await.unwrap();

        assert!(matches!(
            gate.decide(queued.item_id, ReviewAction::Approve, "bob", None, None).await,
            Err(EngineError::Conflict(_))
        ));
        let decided = gate
            .decide(queued.item_id, ReviewAction::Reject, "alice", Some("off-brand"), None)
            .await
            .unwrap();
        assert_eq!(decided.status, ReviewStatus::Rejected);
        assert_eq!(decided.notes.as_deref(), Some("off-brand"));
    }

    #[tokio::test]
    async fn test_repeated_approval_is_noop() {
        let (pool, gate) = setup().await;
        let queued = item(0);
        gate.enqueue(&queued).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        hallucinations_db::insert_detection(
            &mut conn,
            &HallucinationDetection {
                detection_id: Uuid::new_v4(),
                assessment_id: queued.assessment_id,
                flagged_content: "Try it risk-free.".to_string(),
                rule: "forbidden_phrase: risk-free".to_string(),
                severity: Severity::Warning,
                resolved: false,
            },
        )
        .await
        .unwrap();
        drop(conn);

        let first = gate
            .decide(queued.item_id, ReviewAction::Approve, "alice", None, None)
            .await
            .unwrap();
        let second = gate
            .decide(queued.item_id, ReviewAction::Approve, "alice", None, None)
            .await
            .unwrap();

        assert_eq!(first.status, ReviewStatus::Approved);
        assert_eq!(second, first);
        assert_eq!(review_db::count_decisions(&pool, queued.item_id).await.unwrap(), 1);

        let detections = hallucinations_db::list_for_assessment(&pool, queued.assessment_id)
            .await
            .unwrap();
        assert!(detections.iter().all(|d| d.resolved));

        assert!(matches!(
            gate.decide(queued.item_id, ReviewAction::Reject, "alice", None, None).await,
            Err(EngineError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_edit_replaces_snapshot() {
        let (_, gate) = setup().await;
        let queued = item(0);
        gate.enqueue(&queued).await.unwrap();

        let edited = json!({"status": "MANUAL_REVIEW", "fixed_content": "Revised copy."});
        let decided = gate
            .decide(queued.item_id, ReviewAction::Edit, "carol", Some("tightened"), Some(&edited))
            .await
            .unwrap();
        assert_eq!(decided.status, ReviewStatus::Approved);
        assert_eq!(decided.data_snapshot, edited);
        assert_eq!(decided.verified_by.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_decision_survives_concurrent_writer() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::init_database_pool(&dir.path().join("gate.db")).await.unwrap();
        let gate = VerificationGate::new(pool.clone(), 5000);
        let queued = item(0);
        gate.enqueue(&queued).await.unwrap();

        // Another writer holds the write lock and commits a change while the
        // decision is in flight, leaving its read snapshot stale
        let mut writer = pool.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *writer).await.unwrap();
        sqlx::query(
            "INSERT INTO rulesets (version, passing_threshold, rejection_threshold, created_at) \
             VALUES ('v-concurrent', 70.0, 40.0, '2026-01-01T00:00:00Z')",
        )
        .execute(&mut *writer)
        .await
        .unwrap();

        let decision = tokio::spawn({
            let gate = gate.clone();
            let item_id = queued.item_id;
            async move { gate.decide(item_id, ReviewAction::Approve, "alice", None, None).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        sqlx::query("COMMIT").execute(&mut *writer).await.unwrap();
        drop(writer);

        let decided = decision.await.unwrap().unwrap();
        assert_eq!(decided.status, ReviewStatus::Approved);
        assert_eq!(review_db::count_decisions(&pool, queued.item_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blank_reviewer_rejected() {
        let (_, gate) = setup().await;
        assert!(matches!(
            gate.claim(Uuid::new_v4(), "  ").await,
            Err(EngineError::Validation(_))
        ));
    }
}
