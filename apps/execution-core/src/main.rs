//! Execution Core Binary
//!
//! Runs the position lifecycle engine, reconciliation loop and scheduler for
//! one account profile.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin execution-core
//! ```
//!
//! # Environment Variables
//!
//! - `EXECUTION_CONFIG`: path to the YAML config (default: config.yaml)
//! - `RUST_LOG`: overrides the configured log filter
//!
//! Secrets referenced from the config as `${VAR}` are read from the
//! environment or a `.env` file.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use execution_core::broker::{ClockSync, ResilientGateway};
use execution_core::config::{Config, load_config};
use execution_core::execution::{
    EngineDeps, ExecutionEngine, ReconcileTrigger, Reconciler, Scheduler,
};
use execution_core::gateway::{ExchangeGateway, PaperExchange};
use execution_core::models::NoSignals;
use execution_core::observability::init_metrics;
use execution_core::store::{JsonFileStore, PositionBook, PositionStore};
use execution_core::telemetry::init_tracing;
use futures::future::join_all;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config_path = std::env::var("EXECUTION_CONFIG").ok();
    let config = load_config(config_path.as_deref()).context("loading configuration")?;

    init_tracing(&config.observability.logging.to_logging_config())?;
    if config.observability.metrics.enabled {
        init_metrics(&config.observability.metrics.to_metrics_config()?)?;
    }

    tracing::info!(
        account = %config.profile.account,
        venue = %config.profile.venue,
        mode = %config.profile.mode,
        "Starting execution core"
    );

    if config.profile.is_live() {
        bail!("LIVE mode requires a venue adapter; only the paper venue is built in");
    }

    let shutdown = CancellationToken::new();
    let (engine, reconciler) = build(&config, shutdown.clone()).await?;

    if reconciler.config().on_startup {
        let report = reconciler
            .reconcile()
            .await
            .context("startup reconciliation")?;
        if !report.passed {
            tracing::warn!(
                discrepancies = report.discrepancies.len(),
                errors = report.errors.len(),
                "Startup reconciliation found problems"
            );
        }
    }

    let mut handles = vec![Arc::clone(&reconciler).spawn(shutdown.clone())];

    let scheduler_config = config.scheduler.to_scheduler_config();
    if scheduler_config.symbols.is_empty() {
        tracing::info!("No symbols configured, scheduler not started");
    } else {
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&engine),
            Arc::new(NoSignals),
            scheduler_config,
        ));
        handles.extend(scheduler.spawn(&shutdown));
    }

    tracing::info!("Execution core ready");

    shutdown_signal().await;
    shutdown.cancel();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    tracing::info!("Execution core stopped");
    Ok(())
}

/// Wire the store, gateway, notifier, engine and reconciler.
async fn build(
    config: &Config,
    shutdown: CancellationToken,
) -> anyhow::Result<(Arc<ExecutionEngine>, Arc<Reconciler>)> {
    let state_dir = config.persistence.profile_dir(&config.profile.account);
    let store: Arc<dyn PositionStore> = Arc::new(
        JsonFileStore::open(&state_dir)
            .with_context(|| format!("opening state directory {}", state_dir.display()))?,
    );
    let book = Arc::new(PositionBook::load(
        store,
        config.persistence.to_book_config(),
    )?);
    tracing::info!(
        dir = %state_dir.display(),
        positions = book.positions().len(),
        "Position state loaded"
    );

    let venue: Arc<dyn ExchangeGateway> = Arc::new(PaperExchange::new(&config.profile.venue));
    let clock = Arc::new(ClockSync::new(config.retry.to_clock_config()));
    let gateway = Arc::new(ResilientGateway::new(
        venue,
        clock,
        config.retry.to_resilient_config(),
    ));
    if let Err(e) = gateway.sync_clock().await {
        tracing::warn!(error = %e, "Initial clock sync failed");
    }

    let engine = Arc::new(ExecutionEngine::new(
        config.engine_config()?,
        EngineDeps {
            gateway,
            book,
            notifier: config.notifications.build_sink(),
        },
        ReconcileTrigger::new(),
        shutdown,
    ));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&engine),
        config.reconciliation.to_reconciliation_config()?,
    ));

    Ok((engine, reconciler))
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
