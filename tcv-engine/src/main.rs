//! tcv-engine - Tiered content validation service
//!
//! Runs submitted content through deterministic Tier 1/Tier 2 checks,
//! escalates to LLM-backed Tier 3 verification within a cost ceiling, and
//! records every outbound call in the provenance audit trail.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tcv_common::config::{ensure_database_path, load_toml_or_default, resolve_config_path, RootFolderResolver};
use tcv_engine::config::{TomlConfig, DEFAULT_PORT};
use tcv_engine::services::rule_store::seed_default_ruleset;
use tcv_engine::services::{RuleStore, SqliteRuleStore};
use tcv_engine::AppState;

const MODULE_NAME: &str = "tcv-engine";
const DATABASE_FILE: &str = "tcv.db";

/// Command-line arguments for tcv-engine
#[derive(Parser, Debug)]
#[command(name = "tcv-engine")]
#[command(about = "Tiered content validation and provenance audit service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "TCV_PORT")]
    port: Option<u16>,

    /// Root folder holding the database
    #[arg(short, long, env = "TCV_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(MODULE_NAME, args.config.as_deref());
    let config: TomlConfig =
        load_toml_or_default(config_path.as_deref()).context("Failed to load config file")?;

    init_tracing(&config)?;
    config.validate().context("Invalid configuration")?;

    info!("Starting tcv-engine v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(config.root_folder.clone())
        .resolve();
    let db_path = ensure_database_path(&root_folder, DATABASE_FILE)
        .context("Failed to initialize root folder")?;
    info!("Database: {}", db_path.display());

    let db_pool = tcv_engine::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    if seed_default_ruleset(&db_pool).await? {
        info!("Built-in ruleset stored");
    }

    let rule_store = Arc::new(SqliteRuleStore::new(db_pool.clone()));
    rule_store
        .reload(&config.engine.ruleset_version)
        .await
        .with_context(|| format!("Failed to activate ruleset {}", config.engine.ruleset_version))?;

    let providers = tcv_engine::providers::build_slots(&config.providers);
    if providers.is_empty() {
        warn!("No providers configured, Tier 3 findings will be UNVERIFIED");
    } else {
        info!(
            "Provider waterfall: {}",
            config.providers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(" -> ")
        );
    }

    let state = AppState::new(db_pool, rule_store, providers, config.engine.clone());
    let in_flight = Arc::clone(&state.cancellation_tokens);

    let app = tcv_engine::build_router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    let port = args.port.or(config.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let tokens = in_flight.read().await;
            if !tokens.is_empty() {
                info!("Cancelling {} in-flight assessment(s)", tokens.len());
            }
            for token in tokens.values() {
                token.cancel();
            }
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG wins over `[logging].level`; `[logging].file` appends to a file instead of stderr
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("tcv_engine=info,tower_http=info"));

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
