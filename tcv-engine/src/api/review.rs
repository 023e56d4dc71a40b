//! Verification gate handlers
//!
//! GET /review/queue, POST /review/:id/claim, POST /review/:id/decision

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::types::{ReviewAction, ReviewItem, ReviewStatus};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct QueueParams {
    /// pending, in_review, approved or rejected (default: pending)
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub count: usize,
    pub items: Vec<ReviewItem>,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub reviewer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub action: ReviewAction,
    pub reviewer_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    /// Replacement snapshot, EDIT only
    #[serde(default)]
    pub edited_snapshot: Option<serde_json::Value>,
}

/// GET /review/queue
pub async fn get_queue(
    State(state): State<AppState>,
    Query(params): Query<QueueParams>,
) -> ApiResult<Json<QueueResponse>> {
    let status = match params.status.as_deref() {
        None => Some(ReviewStatus::Pending),
        Some("all") => None,
        Some(raw) => Some(ReviewStatus::parse(raw).ok_or_else(|| {
            ApiError::BadRequest(format!("unknown review status: {}", raw))
        })?),
    };

    let items = state.gate.queue(status, params.limit).await?;
    Ok(Json(QueueResponse {
        count: items.len(),
        items,
    }))
}

/// POST /review/:id/claim
pub async fn claim_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<ClaimRequest>,
) -> ApiResult<Json<ReviewItem>> {
    let item = state.gate.claim(item_id, &request.reviewer_id).await?;
    Ok(Json(item))
}

/// POST /review/:id/decision
///
/// Repeating a decision the item already carries returns the item unchanged.
pub async fn decide_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<ReviewItem>> {
    let item = state
        .gate
        .decide(
            item_id,
            request.action,
            &request.reviewer_id,
            request.notes.as_deref(),
            request.edited_snapshot.as_ref(),
        )
        .await?;
    Ok(Json(item))
}

pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/review/queue", get(get_queue))
        .route("/review/:id/claim", post(claim_item))
        .route("/review/:id/decision", post(decide_item))
}
