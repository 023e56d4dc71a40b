//! GET /stats

use axum::{extract::State, routing::get, Json, Router};
use chrono::Duration;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::assessments::{recent_validations, RecentValidations};
use crate::db::{review as review_db, rules as rules_db};
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub ruleset_version: String,
    /// Rule count keyed by tier number
    pub rules_by_tier: BTreeMap<String, i64>,
    pub recent_validations: RecentValidations,
    pub window_hours: i64,
    /// Verification queue size by status
    pub review_queue: BTreeMap<String, i64>,
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<StatsResponse>> {
    let ruleset = state.controller.rule_store().current().await?;
    let window_hours = state.controller.settings().stats_window_hours;

    let rules_by_tier = rules_db::count_rules_by_tier(&state.db, &ruleset.version)
        .await?
        .into_iter()
        .map(|(tier, count)| (tier.to_string(), count))
        .collect();

    let since = tcv_common::time::now() - Duration::hours(window_hours);
    let recent = recent_validations(&state.db, since).await?;

    let review_queue = review_db::count_by_status(&state.db).await?.into_iter().collect();

    Ok(Json(StatsResponse {
        ruleset_version: ruleset.version.clone(),
        rules_by_tier,
        recent_validations: recent,
        window_hours,
        review_queue,
    }))
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats", get(get_stats))
}
