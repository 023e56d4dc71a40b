//! Assessment lookup, audit trail and cancellation
//!
//! GET /assessments/active, GET /assessments/:id, GET /assessments/:id/audit,
//! POST /assessments/:id/cancel

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{assessments as assessments_db, claims as claims_db};
use crate::error::{ApiError, ApiResult};
use crate::services::cost_ledger::LedgerSummary;
use crate::types::{AssessmentResult, AuditCall, Claim};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ActiveResponse {
    pub count: usize,
    pub assessment_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AuditTrailResponse {
    pub assessment_id: Uuid,
    pub audit_calls: Vec<AuditCall>,
    pub ledger: LedgerSummary,
    pub claims: Vec<Claim>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub assessment_id: Uuid,
    pub cancelled: bool,
}

pub async fn list_active(State(state): State<AppState>) -> Json<ActiveResponse> {
    let assessment_ids = state.controller.active().await;
    Json(ActiveResponse {
        count: assessment_ids.len(),
        assessment_ids,
    })
}

pub async fn get_assessment(
    State(state): State<AppState>,
    Path(assessment_id): Path<Uuid>,
) -> ApiResult<Json<AssessmentResult>> {
    assessments_db::get_assessment(&state.db, assessment_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("assessment {}", assessment_id)))
}

/// GET /assessments/:id/audit
///
/// Audit calls exist as soon as Tier 3 dispatches, so the trail of an
/// in-flight or cancelled assessment is available too.
pub async fn get_audit_trail(
    State(state): State<AppState>,
    Path(assessment_id): Path<Uuid>,
) -> ApiResult<Json<AuditTrailResponse>> {
    let audit_calls = state.recorder.calls_for(assessment_id).await?;
    let stored = assessments_db::get_assessment(&state.db, assessment_id).await?;
    if audit_calls.is_empty() && stored.is_none() {
        return Err(ApiError::NotFound(format!("assessment {}", assessment_id)));
    }

    let ledger = state.ledger.summary(assessment_id).await?;
    let claims = claims_db::list_for_assessment(&state.db, assessment_id).await?;

    Ok(Json(AuditTrailResponse {
        assessment_id,
        audit_calls,
        ledger,
        claims,
    }))
}

pub async fn cancel_assessment(
    State(state): State<AppState>,
    Path(assessment_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    if !state.controller.cancel(assessment_id).await {
        return Err(ApiError::NotFound(format!(
            "assessment {} is not in flight",
            assessment_id
        )));
    }
    tracing::info!(assessment_id = %assessment_id, "Cancellation requested");
    Ok(Json(CancelResponse {
        assessment_id,
        cancelled: true,
    }))
}

pub fn assessment_routes() -> Router<AppState> {
    Router::new()
        .route("/assessments/active", get(list_active))
        .route("/assessments/:id", get(get_assessment))
        .route("/assessments/:id/audit", get(get_audit_trail))
        .route("/assessments/:id/cancel", post(cancel_assessment))
}
