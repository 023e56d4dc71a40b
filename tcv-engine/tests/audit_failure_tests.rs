//! Audit store failures abort the assessment

mod helpers;

use helpers::{engine, Script, ScriptedProvider};
use tcv_engine::db::assessments as assessments_db;
use tcv_engine::types::AssessmentRequest;
use tcv_engine::EngineError;

#[tokio::test]
async fn test_unwritable_audit_trail_aborts_before_dispatch() {
    let provider = ScriptedProvider::new("primary", Script::Answer);
    let t = engine(&[provider.clone()]).await;

    sqlx::query("DROP TABLE cost_ledger").execute(&t.pool).await.unwrap();
    sqlx::query("DROP TABLE audit_calls").execute(&t.pool).await.unwrap();

    let outcome = t
        .state
        .controller
        .assess(AssessmentRequest::new("Builds now finish in 4 minutes on average.", "blog"))
        .await;

    assert!(matches!(outcome, Err(EngineError::AuditWriteFailure(_))), "{:?}", outcome);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_unpersistable_result_is_not_returned() {
    let t = engine(&[]).await;
    let request = AssessmentRequest::new(
        "In today's fast-paced world, we delve into comprehensive solutions",
        "blog",
    );

    let before = t.state.controller.assess(request.clone()).await.unwrap();
    assert!(assessments_db::get_assessment(&t.pool, before.assessment_id)
        .await
        .unwrap()
        .is_some());

    sqlx::query("DROP TABLE assessments").execute(&t.pool).await.unwrap();

    let outcome = t.state.controller.assess(request).await;
    assert!(matches!(outcome, Err(EngineError::AuditWriteFailure(_))), "{:?}", outcome);
    assert!(outcome.unwrap_err().is_fatal());
}
