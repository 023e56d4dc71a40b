//! Rule query and reload handlers
//!
//! POST /rules, POST /rules/reload

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::services::rule_store::RuleQuery;
use crate::types::Rule;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub ruleset_version: String,
    pub count: usize,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
pub struct ReloadRequest {
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: String,
    pub version: String,
    pub rules: usize,
}

/// POST /rules
///
/// Filter the active ruleset; results are ordered by priority, then rule id.
pub async fn query_rules(
    State(state): State<AppState>,
    Json(query): Json<RuleQuery>,
) -> ApiResult<Json<RulesResponse>> {
    let ruleset = state.controller.rule_store().current().await?;
    let rules: Vec<Rule> = ruleset.query(&query).into_iter().cloned().collect();

    tracing::debug!(?query, count = rules.len(), "Rule query");

    Ok(Json(RulesResponse {
        ruleset_version: ruleset.version.clone(),
        count: rules.len(),
        rules,
    }))
}

/// POST /rules/reload
///
/// Activate another stored ruleset version. In-flight assessments keep the
/// snapshot they started with.
pub async fn reload_rules(
    State(state): State<AppState>,
    Json(request): Json<ReloadRequest>,
) -> ApiResult<Json<ReloadResponse>> {
    let version = request.version.trim();
    if version.is_empty() {
        return Err(ApiError::BadRequest("version must not be empty".to_string()));
    }

    tracing::info!(version, "Ruleset reload requested");
    let snapshot = state.controller.rule_store().reload(version).await?;

    Ok(Json(ReloadResponse {
        status: "reloaded".to_string(),
        version: snapshot.version.clone(),
        rules: snapshot.rules().len(),
    }))
}

pub fn rule_routes() -> Router<AppState> {
    Router::new()
        .route("/rules", post(query_rules))
        .route("/rules/reload", post(reload_rules))
}
