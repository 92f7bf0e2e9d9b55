//! Prometheus Metrics Registry - Settlement Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers wager flow, lifecycle transitions, settlement payouts and
//! scheduler health.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the settlement service.
///
/// All metrics follow the naming convention `parimutuel_*`. Each
/// instance owns its registry, so tests can build as many as they like.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Wagers accepted, by outcome.
    pub wagers_placed: IntCounterVec,
    /// Units staked across all accepted wagers.
    pub units_wagered: IntCounter,
    /// Rejected operations, by operation and error code.
    pub rejections: IntCounterVec,
    /// Applied lifecycle transitions, by target status.
    pub transitions: IntCounterVec,
    /// Completed settlements, by branch (`payout` or `refund`).
    pub settlements: IntCounterVec,
    /// Units credited by settlements.
    pub units_paid: IntCounter,
    /// Units stranded by integer rounding.
    pub rounding_remainder: IntCounter,
    /// Transient store failures that were retried.
    pub retries: IntCounterVec,
    /// Scheduler tick latency in milliseconds.
    pub tick_latency_ms: Histogram,
    /// Per-market scheduler failures, by scan.
    pub scheduler_failures: IntCounterVec,
    /// Notifications dropped because the queue was full or closed.
    pub notifications_dropped: IntCounter,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let wagers_placed = IntCounterVec::new(
            Opts::new("parimutuel_wagers_placed_total", "Total wagers accepted"),
            &["outcome"],
        )?;

        let units_wagered = IntCounter::new(
            "parimutuel_units_wagered_total",
            "Total units staked on accepted wagers",
        )?;

        let rejections = IntCounterVec::new(
            Opts::new(
                "parimutuel_rejections_total",
                "Operations rejected with a typed error",
            ),
            &["operation", "code"],
        )?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "parimutuel_transitions_total",
                "Market lifecycle transitions applied",
            ),
            &["to"],
        )?;

        let settlements = IntCounterVec::new(
            Opts::new("parimutuel_settlements_total", "Markets settled"),
            &["branch"],
        )?;

        let units_paid = IntCounter::new(
            "parimutuel_units_paid_total",
            "Units credited by payouts and refunds",
        )?;

        let rounding_remainder = IntCounter::new(
            "parimutuel_rounding_remainder_units_total",
            "Units left undistributed by floor division",
        )?;

        let retries = IntCounterVec::new(
            Opts::new(
                "parimutuel_transient_retries_total",
                "Operations retried after store contention",
            ),
            &["operation"],
        )?;

        let tick_latency_ms = Histogram::with_opts(
            HistogramOpts::new(
                "parimutuel_scheduler_tick_ms",
                "Lifecycle scheduler tick duration in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]),
        )?;

        let scheduler_failures = IntCounterVec::new(
            Opts::new(
                "parimutuel_scheduler_failures_total",
                "Per-market failures skipped by the scheduler",
            ),
            &["scan"],
        )?;

        let notifications_dropped = IntCounter::new(
            "parimutuel_notifications_dropped_total",
            "Settlement events dropped before delivery",
        )?;

        // Register all metrics
        registry.register(Box::new(wagers_placed.clone()))?;
        registry.register(Box::new(units_wagered.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(units_paid.clone()))?;
        registry.register(Box::new(rounding_remainder.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(tick_latency_ms.clone()))?;
        registry.register(Box::new(scheduler_failures.clone()))?;
        registry.register(Box::new(notifications_dropped.clone()))?;

        Ok(Self {
            registry,
            wagers_placed,
            units_wagered,
            rejections,
            transitions,
            settlements,
            units_paid,
            rounding_remainder,
            retries,
            tick_latency_ms,
            scheduler_failures,
            notifications_dropped,
        })
    }

    /// Add a non-negative unit amount to a counter.
    pub fn add_units(counter: &IntCounter, units: i64) {
        if let Ok(units) = u64::try_from(units) {
            counter.inc_by(units);
        }
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.wagers_placed.with_label_values(&["YES"]).inc();
        MetricsRegistry::add_units(&metrics.units_paid, 600);
        MetricsRegistry::add_units(&metrics.units_paid, -5);

        let body = metrics.render().unwrap();
        assert!(body.contains("parimutuel_wagers_placed_total{outcome=\"YES\"} 1"));
        assert!(body.contains("parimutuel_units_paid_total 600"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = MetricsRegistry::new().unwrap();
        let b = MetricsRegistry::new().unwrap();
        a.units_wagered.inc_by(3);
        assert_eq!(b.units_wagered.get(), 0);
    }
}
