//! Integration tests for tcv-engine API endpoints

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use helpers::{engine, Script, ScriptedProvider, TestEngine};

const BLOCKED_CONTENT: &str = "In today's fast-paced world, we delve into comprehensive solutions";
const CLAIM_CONTENT: &str = "Builds now finish in 4 minutes on average.";

fn app(t: &TestEngine) -> Router {
    tcv_engine::build_router(t.state.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

#[tokio::test]
async fn test_health_endpoint() {
    let t = engine(&[]).await;

    let (status, body) = get(app(&t), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tcv-engine");
    assert_eq!(body["ruleset_version"], "v1");
    assert_eq!(body["active_assessments"], 0);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_assess_blocked_content() {
    let t = engine(&[]).await;

    let (status, body) = post(
        app(&t),
        "/assess",
        json!({"content": BLOCKED_CONTENT, "page_type": "blog"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "REJECTED");
    assert_eq!(body["tiers_run"], json!(["1"]));
    assert_eq!(body["cost_total"], 0.0);

    // Stored and retrievable
    let id = body["assessment_id"].as_str().unwrap().to_string();
    let (status, stored) = get(app(&t), &format!("/assessments/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["status"], "REJECTED");
}

#[tokio::test]
async fn test_assess_validation_error() {
    let t = engine(&[]).await;

    let (status, body) = post(app(&t), "/assess", json!({"content": "", "page_type": "blog"})).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_audit_trail_endpoint() {
    let t = engine(&[ScriptedProvider::new("primary", Script::Answer)]).await;

    let (_, result) = post(
        app(&t),
        "/assess",
        json!({"content": CLAIM_CONTENT, "page_type": "blog"}),
    )
    .await;
    let id = result["assessment_id"].as_str().unwrap().to_string();

    let (status, trail) = get(app(&t), &format!("/assessments/{}/audit", id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(trail["audit_calls"].as_array().unwrap().len(), 1);
    assert_eq!(trail["audit_calls"][0]["status"], "SUCCESS");
    assert_eq!(trail["ledger"]["entries"].as_array().unwrap().len(), 1);
    assert_eq!(trail["ledger"]["cost_total"], result["cost_total"]);
    assert_eq!(trail["claims"][0]["source_audit_id"], trail["audit_calls"][0]["audit_id"]);
}

#[tokio::test]
async fn test_unknown_assessment_is_404() {
    let t = engine(&[]).await;
    let id = uuid::Uuid::new_v4();

    let (status, _) = get(app(&t), &format!("/assessments/{}", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(app(&t), &format!("/assessments/{}/audit", id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post(app(&t), &format!("/assessments/{}/cancel", id), json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_active_assessments_empty() {
    let t = engine(&[]).await;

    let (status, body) = get(app(&t), "/assessments/active").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_rules_query() {
    let t = engine(&[]).await;

    let (status, body) = post(app(&t), "/rules", json!({"tier": 1, "enforcement_level": "required"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ruleset_version"], "v1");
    assert_eq!(body["count"], 5);
    let rules = body["rules"].as_array().unwrap();
    assert_eq!(rules[0]["rule_id"], "kill.in_todays_world");
    assert!(rules.iter().all(|r| r["tier"] == 1));

    let (_, limited) = post(app(&t), "/rules", json!({"limit": 2})).await;
    assert_eq!(limited["count"], 2);
}

#[tokio::test]
async fn test_reload_unknown_version_is_unavailable() {
    let t = engine(&[]).await;

    let (status, body) = post(app(&t), "/rules/reload", json!({"version": "v404"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "RULE_STORE_UNAVAILABLE");

    // The active snapshot is untouched
    let (_, health) = get(app(&t), "/health").await;
    assert_eq!(health["ruleset_version"], "v1");

    let (status, body) = post(app(&t), "/rules/reload", json!({"version": "v1"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], "v1");
}

#[tokio::test]
async fn test_stats_after_assessments() {
    let t = engine(&[ScriptedProvider::new("primary", Script::Answer)]).await;

    post(app(&t), "/assess", json!({"content": BLOCKED_CONTENT, "page_type": "blog"})).await;
    post(app(&t), "/assess", json!({"content": CLAIM_CONTENT, "page_type": "blog"})).await;

    let (status, body) = get(app(&t), "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ruleset_version"], "v1");
    assert_eq!(body["rules_by_tier"]["1"], 9);
    assert_eq!(body["rules_by_tier"]["2"], 6);
    assert_eq!(body["rules_by_tier"]["3"], 4);
    assert_eq!(body["recent_validations"]["total"], 2);
    assert_eq!(body["recent_validations"]["passed"], 1);
    assert!(body["recent_validations"]["total_cost"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn test_review_flow_over_http() {
    let t = engine(&[ScriptedProvider::doubting("primary")]).await;

    let (_, result) = post(app(&t), "/assess", json!({"content": CLAIM_CONTENT, "page_type": "blog"})).await;
    assert_eq!(result["status"], "MANUAL_REVIEW");
    let item_id = result["review_item_id"].as_str().unwrap().to_string();

    let (status, queue) = get(app(&t), "/review/queue?status=pending&limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["count"], 1);
    assert_eq!(queue["items"][0]["item_id"], item_id.as_str());

    let (status, claimed) = post(
        app(&t),
        &format!("/review/{}/claim", item_id),
        json!({"reviewer_id": "alice"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["status"], "in_review");

    let (status, _) = post(
        app(&t),
        &format!("/review/{}/claim", item_id),
        json!({"reviewer_id": "bob"}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let decision = json!({"action": "APPROVE", "reviewer_id": "alice", "notes": "ok"});
    let (status, decided) = post(app(&t), &format!("/review/{}/decision", item_id), decision.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decided["status"], "approved");

    let (status, again) = post(app(&t), &format!("/review/{}/decision", item_id), decision).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "approved");

    let (_, pending) = get(app(&t), "/review/queue").await;
    assert_eq!(pending["count"], 0);
}

#[tokio::test]
async fn test_review_queue_rejects_unknown_status() {
    let t = engine(&[]).await;

    let (status, _) = get(app(&t), "/review/queue?status=archived").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fatal_error_reported_by_health() {
    let t = engine(&[]).await;
    sqlx::query("DROP TABLE assessments").execute(&t.pool).await.unwrap();

    let (status, body) = post(
        app(&t),
        "/assess",
        json!({"content": BLOCKED_CONTENT, "page_type": "blog"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "AUDIT_WRITE_FAILURE");

    let (_, health) = get(app(&t), "/health").await;
    assert!(health["last_error"].as_str().unwrap().contains("Audit write failed"));
}
