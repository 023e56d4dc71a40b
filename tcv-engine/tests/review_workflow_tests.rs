//! Verification gate workflow over real assessment results

mod helpers;

use helpers::{engine, Script, ScriptedProvider, TestEngine};
use tcv_engine::db::{claims as claims_db, hallucinations as hallucinations_db, review as review_db};
use tcv_engine::types::{AssessmentRequest, AssessmentStatus, ReviewAction, ReviewStatus};
use tcv_engine::EngineError;
use uuid::Uuid;

/// Assess content whose single claim the provider rejects, returning the queued item
async fn queued_item(t: &TestEngine) -> (Uuid, Uuid) {
    let result = t
        .state
        .controller
        .assess(AssessmentRequest::new("Builds now finish in 4 minutes on average.", "blog"))
        .await
        .unwrap();
    assert_eq!(result.status, AssessmentStatus::ManualReview);
    (result.assessment_id, result.review_item_id.expect("no review item"))
}

#[tokio::test]
async fn test_manual_review_result_is_queued() {
    let t = engine(&[ScriptedProvider::doubting("primary")]).await;
    let (assessment_id, item_id) = queued_item(&t).await;

    let queue = t.state.gate.queue(Some(ReviewStatus::Pending), None).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].item_id, item_id);
    assert_eq!(queue[0].assessment_id, assessment_id);
    assert_eq!(queue[0].data_snapshot["status"], "MANUAL_REVIEW");
}

#[tokio::test]
async fn test_passed_result_is_not_queued() {
    let t = engine(&[ScriptedProvider::new("primary", Script::Answer)]).await;
    let result = t
        .state
        .controller
        .assess(AssessmentRequest::new("Builds now finish in 4 minutes on average.", "blog"))
        .await
        .unwrap();

    assert_eq!(result.status, AssessmentStatus::Passed);
    assert!(result.review_item_id.is_none());
    assert!(t.state.gate.queue(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_single_reviewer_ownership() {
    let t = engine(&[ScriptedProvider::doubting("primary")]).await;
    let (_, item_id) = queued_item(&t).await;

    let claimed = t.state.gate.claim(item_id, "alice").await.unwrap();
    assert_eq!(claimed.status, ReviewStatus::InReview);
    assert_eq!(claimed.reviewer_id.as_deref(), Some("alice"));

    // Re-claiming one's own item is harmless; anyone else is refused
    assert!(t.state.gate.claim(item_id, "alice").await.is_ok());
    assert!(matches!(
        t.state.gate.claim(item_id, "bob").await,
        Err(EngineError::Conflict(_))
    ));
    assert!(matches!(
        t.state.gate.decide(item_id, ReviewAction::Approve, "bob", None, None).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_approve_twice_is_idempotent() {
    let t = engine(&[ScriptedProvider::doubting("primary")]).await;
    let (assessment_id, item_id) = queued_item(&t).await;

    t.state.gate.claim(item_id, "alice").await.unwrap();
    let first = t
        .state
        .gate
        .decide(item_id, ReviewAction::Approve, "alice", Some("checked the changelog"), None)
        .await
        .unwrap();
    let second = t
        .state
        .gate
        .decide(item_id, ReviewAction::Approve, "alice", None, None)
        .await
        .unwrap();

    assert_eq!(first.status, ReviewStatus::Approved);
    assert_eq!(second.status, ReviewStatus::Approved);
    assert_eq!(second.verified_by.as_deref(), Some("alice"));
    assert_eq!(second.notes.as_deref(), Some("checked the changelog"));
    assert_eq!(review_db::count_decisions(&t.pool, item_id).await.unwrap(), 1);

    // Sign-off verifies the claims and resolves the flags
    let claims = claims_db::list_for_assessment(&t.pool, assessment_id).await.unwrap();
    assert!(!claims.is_empty());
    assert!(claims.iter().all(|c| c.verified));
    let detections = hallucinations_db::list_for_assessment(&t.pool, assessment_id)
        .await
        .unwrap();
    assert!(!detections.is_empty());
    assert!(detections.iter().all(|d| d.resolved));

    // A different decision after the fact is refused
    assert!(matches!(
        t.state.gate.decide(item_id, ReviewAction::Reject, "alice", None, None).await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_reject_leaves_claims_unverified() {
    let t = engine(&[ScriptedProvider::doubting("primary")]).await;
    let (assessment_id, item_id) = queued_item(&t).await;

    let item = t
        .state
        .gate
        .decide(item_id, ReviewAction::Reject, "carol", Some("figure is wrong"), None)
        .await
        .unwrap();

    assert_eq!(item.status, ReviewStatus::Rejected);
    let claims = claims_db::list_for_assessment(&t.pool, assessment_id).await.unwrap();
    assert!(claims.iter().all(|c| !c.verified));
}

#[tokio::test]
async fn test_edit_replaces_snapshot() {
    let t = engine(&[ScriptedProvider::doubting("primary")]).await;
    let (_, item_id) = queued_item(&t).await;
    let edited = serde_json::json!({"content": "Builds now finish in 5 minutes on average."});

    let item = t
        .state
        .gate
        .decide(item_id, ReviewAction::Edit, "dave", None, Some(&edited))
        .await
        .unwrap();

    assert_eq!(item.status, ReviewStatus::Approved);
    assert_eq!(item.data_snapshot, edited);
}

#[tokio::test]
async fn test_unknown_item_and_blank_reviewer() {
    let t = engine(&[]).await;

    assert!(matches!(
        t.state.gate.claim(Uuid::new_v4(), "alice").await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        t.state.gate.decide(Uuid::new_v4(), ReviewAction::Approve, "  ", None, None).await,
        Err(EngineError::Validation(_))
    ));
}
