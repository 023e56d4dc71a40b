//! POST /assess

use axum::{extract::State, routing::post, Json, Router};

use crate::error::ApiResult;
use crate::types::{AssessmentRequest, AssessmentResult};
use crate::AppState;

/// POST /assess
///
/// Runs the full escalation pipeline and returns the final result.
/// Fatal failures (rule store, audit store) are remembered for `/health`.
pub async fn assess(
    State(state): State<AppState>,
    Json(request): Json<AssessmentRequest>,
) -> ApiResult<Json<AssessmentResult>> {
    match state.controller.assess(request).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            if e.is_fatal() {
                *state.last_error.write().await = Some(e.to_string());
            }
            Err(e.into())
        }
    }
}

pub fn assess_routes() -> Router<AppState> {
    Router::new().route("/assess", post(assess))
}
