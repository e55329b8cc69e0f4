//! CourseHub Scheduler: background job dispatcher
//!
//! Main entry point that wires the job store, handler registry and
//! dispatcher together and runs until a shutdown signal arrives.

use std::sync::Arc;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use coursehub_core::config::{AppConfig, LogFormat};
use coursehub_core::error::AppError;
use coursehub_core::traits::SystemClock;
use coursehub_database::DatabasePool;
use coursehub_worker::{Dispatcher, HandlerRegistry, JobService};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Scheduler error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("COURSEHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main scheduler run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting CourseHub scheduler v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Database connection + migrations ─────────────────
    tracing::info!("Connecting to database...");
    let db = DatabasePool::connect(&config.database).await?;

    if config.database.run_migrations {
        tracing::info!("Running database migrations...");
        coursehub_database::migration::run_migrations(db.pool()).await?;
        tracing::info!("Database migrations complete");
    }

    // ── Step 2: Job service ──────────────────────────────────────
    let store = Arc::new(db.job_store());

    let mut registry = HandlerRegistry::new();
    coursehub_worker::jobs::register_builtin(&mut registry);

    let service = Arc::new(JobService::new(
        store,
        Arc::new(registry),
        Arc::new(SystemClock),
        &config.worker,
    ));

    match service.stats().await {
        Ok(stats) => tracing::info!(
            "Job queue: pending={}, processing={}, failed={}",
            stats.pending,
            stats.processing,
            stats.failed
        ),
        Err(e) => tracing::warn!("Could not read job queue stats: {}", e),
    }

    // ── Step 3: Dispatcher ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher_handle = if config.worker.enabled {
        let dispatcher = Dispatcher::new(Arc::clone(&service), config.worker.clone());
        tracing::info!("Starting dispatcher '{}'...", dispatcher.id());
        Some(tokio::spawn(async move {
            dispatcher.run(shutdown_rx).await;
        }))
    } else {
        tracing::info!("Dispatcher disabled; nothing to do until shutdown");
        None
    };

    // ── Step 4: Wait for shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping dispatcher...");
    let _ = shutdown_tx.send(true);

    if let Some(handle) = dispatcher_handle {
        if let Err(e) = handle.await {
            tracing::error!("Dispatcher task failed: {}", e);
        }
    }

    db.close().await;
    tracing::info!("CourseHub scheduler shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
