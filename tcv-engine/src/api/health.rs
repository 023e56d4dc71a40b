//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when no ruleset is active
    pub status: String,
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ruleset_version: Option<String>,
    pub active_assessments: usize,
    /// Last fatal assessment error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let ruleset_version = state
        .controller
        .rule_store()
        .current()
        .await
        .ok()
        .map(|r| r.version.clone());
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if ruleset_version.is_some() { "ok" } else { "degraded" }.to_string(),
        module: "tcv-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        ruleset_version,
        active_assessments: state.cancellation_tokens.read().await.len(),
        last_error,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
