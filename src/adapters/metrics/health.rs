//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for container
//! health checks. Readiness requires a reachable ledger store and a
//! service that is not shutting down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::adapters::persistence::LedgerStore;

/// Shared health state polled by readiness probes.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Ledger store probed on every readiness check.
    store: LedgerStore,
    /// Cleared once shutdown begins.
    accepting: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Flip readiness to 503 ahead of shutdown.
    pub fn mark_shutting_down(&self) {
        self.accepting.store(false, Ordering::Relaxed);
    }

    /// Check if the service is ready to serve traffic.
    pub async fn is_ready(&self) -> bool {
        self.accepting.load(Ordering::Relaxed) && self.store.is_healthy().await
    }
}

/// Axum-based health check HTTP server.
pub struct HealthServer {
    state: HealthState,
    port: u16,
}

impl HealthServer {
    pub const fn new(state: HealthState, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until the shutdown signal fires.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(self.state);

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<HealthState>) -> impl IntoResponse {
        if state.is_ready().await {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}
