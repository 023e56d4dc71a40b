//! tcv-engine library interface
//!
//! Exposes the engine and its HTTP API for the binary and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod services;
pub mod tiers;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, EngineError, EngineResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::EngineSettings;
use crate::providers::ProviderSlot;
use crate::services::{
    AuditRecorder, CancellationMap, CostLedger, EscalationController, ResponseCache, RuleStore,
    VerificationGate,
};
use crate::tiers::tier3::{Tier3Evaluator, Tier3Settings};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub controller: Arc<EscalationController>,
    pub gate: VerificationGate,
    pub recorder: AuditRecorder,
    pub ledger: CostLedger,
    /// Cancellation tokens for in-flight assessments
    pub cancellation_tokens: CancellationMap,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last fatal assessment error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire the engine around a pool, a rule store and the provider waterfall
    pub fn new(
        db: SqlitePool,
        rule_store: Arc<dyn RuleStore>,
        providers: Vec<ProviderSlot>,
        settings: EngineSettings,
    ) -> Self {
        let cancellation_tokens: CancellationMap = Arc::new(RwLock::new(HashMap::new()));
        let lock_wait_ms = settings.db_max_lock_wait_ms;
        let recorder = AuditRecorder::new(db.clone(), lock_wait_ms);
        let tier3 = Tier3Evaluator::new(providers, recorder.clone(), Tier3Settings::from(&settings));
        let cache = Arc::new(ResponseCache::new(settings.cache_ttl()));
        let controller = Arc::new(EscalationController::new(
            db.clone(),
            rule_store,
            tier3,
            recorder.clone(),
            cache,
            settings,
            Arc::clone(&cancellation_tokens),
        ));

        Self {
            gate: VerificationGate::new(db.clone(), lock_wait_ms),
            ledger: CostLedger::new(db.clone()),
            db,
            controller,
            recorder,
            cancellation_tokens,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::assess_routes())
        .merge(api::rule_routes())
        .merge(api::stats_routes())
        .merge(api::review_routes())
        .merge(api::assessment_routes())
        .merge(api::health_routes())
        .with_state(state)
}
