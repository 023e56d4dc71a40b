//! Engine fixtures
//!
//! An in-memory database seeded with the built-in ruleset, activated as v1,
//! wired to scripted providers.

use sqlx::SqlitePool;
use std::sync::Arc;

use tcv_engine::config::EngineSettings;
use tcv_engine::providers::{LlmProvider, ProviderSlot};
use tcv_engine::services::rule_store::seed_default_ruleset;
use tcv_engine::services::{RuleStore, SqliteRuleStore};
use tcv_engine::AppState;

use super::providers::ScriptedProvider;

pub struct TestEngine {
    pub pool: SqlitePool,
    pub state: AppState,
}

/// Route engine logs through the test harness; safe to call repeatedly
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tcv_engine=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Defaults with short deadlines so timeout paths run quickly
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        tier3_call_deadline_ms: 200,
        db_max_lock_wait_ms: 200,
        ..EngineSettings::default()
    }
}

pub async fn engine(providers: &[Arc<ScriptedProvider>]) -> TestEngine {
    engine_with(providers, test_settings()).await
}

pub async fn engine_with(providers: &[Arc<ScriptedProvider>], settings: EngineSettings) -> TestEngine {
    init_test_logging();

    let pool = tcv_engine::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database");
    seed_default_ruleset(&pool).await.expect("Failed to seed ruleset");

    let rule_store = Arc::new(SqliteRuleStore::new(pool.clone()));
    rule_store.reload("v1").await.expect("Failed to activate ruleset");

    let slots = providers
        .iter()
        .map(|p| {
            let provider: Arc<dyn LlmProvider> = p.clone();
            ProviderSlot::new(provider, 1000, 1000)
        })
        .collect();

    let state = AppState::new(pool.clone(), rule_store, slots, settings);
    TestEngine { pool, state }
}
