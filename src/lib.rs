pub mod autosave;
pub mod config;
pub mod crypto;
pub mod db;
pub mod errors;
pub mod models;
pub mod notebook;
pub mod policy;
pub mod privacy;
pub mod session;
pub mod share;
pub mod slug;
pub mod store;
pub mod tags;

pub use crate::config::AppConfig;
pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult};
pub use crate::models::{AppSettings, LockState, Note, NoteSummary, PublicNote, SaveStatus};
pub use crate::notebook::Notebook;
pub use crate::session::{NoteSession, SaveOutcome, SessionEvent};
pub use crate::store::{LiveUpdate, NoteStore, NoteSubscription};

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Opens the store under the configured data directory and serves public
/// note links until the process is stopped.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data dir {}", config.data_dir.display()))?;
    init_tracing(&config.log_dir(), &config.log_filter)?;

    let database = Database::new(&config.database_path())
        .with_context(|| format!("failed to open {}", config.database_path().display()))?;
    let settings = database.get_settings().context("failed to load settings")?;
    tracing::info!(
        db_path = %config.database_path().display(),
        debounce_ms = settings.autosave_debounce_ms,
        "note store ready"
    );

    let app = share::router(Arc::new(database));
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "serving public notes");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
    }
}

fn init_tracing(log_dir: &Path, fallback_filter: &str) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("failed to create {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "notes-sync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| anyhow::anyhow!(error.to_string()))
}
