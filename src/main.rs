//! Parimutuel Settlement Service - Entry Point
//!
//! Initializes configuration, logging, the ledger store and the
//! lifecycle scheduler. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Connect the ledger store and apply the schema
//! 4. Start the notification queue (log sink dispatcher)
//! 5. Build the services around one shared context
//! 6. Spawn metrics (/metrics) and health (/live, /ready) servers
//! 7. Spawn the lifecycle scheduler
//! 8. Wait for SIGINT → graceful shutdown (unready → drain tick → close)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use parimutuel_settlement::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use parimutuel_settlement::adapters::notify::{LogSink, QueuedNotifier};
use parimutuel_settlement::adapters::persistence::LedgerStore;
use parimutuel_settlement::config;
use parimutuel_settlement::ports::clock::SystemClock;
use parimutuel_settlement::usecases::{
    AccountService, LifecycleController, LifecycleScheduler, RetryPolicy, ServiceContext,
    SettlementEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration from config.toml ──────────────
    let config_path = std::env::var("SETTLEMENT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        database = %config.database.url,
        "Starting parimutuel settlement service"
    );

    // ── 3. Ledger store ─────────────────────────────────────
    let store = LedgerStore::connect(&config.database)
        .await
        .context("Failed to open ledger store")?;

    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);

    // ── 4. Notification queue ───────────────────────────────
    let (notifier, dispatcher) = QueuedNotifier::spawn(
        config.notifications.queue_capacity,
        Arc::new(LogSink),
        Some(metrics.notifications_dropped.clone()),
    );

    // ── 5. Services ─────────────────────────────────────────
    let ctx = ServiceContext::new(
        store.clone(),
        Arc::new(SystemClock),
        Arc::new(notifier),
        Arc::clone(&metrics),
        RetryPolicy::new(&config.retry),
    );
    let settlement = SettlementEngine::new(ctx.clone());
    let lifecycle = LifecycleController::new(ctx.clone(), settlement.clone());
    let accounts = AccountService::new(ctx.clone(), &config.accounts);

    match accounts.audit_conservation().await {
        Ok(violations) if violations.is_empty() => info!("Ledger conservation audit passed"),
        Ok(violations) => warn!(accounts = violations.len(), "Ledger conservation audit failed"),
        Err(e) => warn!(error = %e, "Ledger conservation audit could not run"),
    }

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 6. Metrics and health servers ───────────────────────
    let health = HealthState::new(store.clone());
    let mut server_handles = Vec::new();
    if config.metrics.enabled {
        let metrics_server = Arc::clone(&metrics);
        let bind_address = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            if let Err(e) = metrics_server.serve(bind_address, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }));

        let health_server = HealthServer::new(health.clone(), config.metrics.health_port);
        let health_shutdown = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            if let Err(e) = health_server.run(health_shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }));
    }

    // ── 7. Lifecycle scheduler ──────────────────────────────
    let scheduler = LifecycleScheduler::new(
        ctx.clone(),
        lifecycle,
        settlement,
        config.scheduler.tick_interval(),
        config.scheduler.dispute_window()?,
    );
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    info!("All tasks spawned, service is running");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    // 1. Readiness probe → 503
    health.mark_shutting_down();

    // 2. Signal all tasks to stop
    let _ = shutdown_tx.send(());

    // 3. Let an in-flight tick finish (up to 30s)
    if tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await.is_err() {
        warn!("Scheduler did not stop within 30s");
    }

    for handle in server_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    // 4. Drop the last notifier handles so the dispatcher drains and exits
    drop(ctx);
    drop(accounts);
    if tokio::time::timeout(Duration::from_secs(5), dispatcher).await.is_err() {
        warn!("Notification queue not drained within 5s");
    }

    store.close().await;
    info!("Shutdown complete");
    Ok(())
}
