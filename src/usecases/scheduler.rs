//! Lifecycle Scheduler - Time-driven Transitions
//!
//! Runs on a fixed interval. Each tick:
//! 1. Locks every ACTIVE market past its deadline
//! 2. Finalizes every RESOLVED market whose dispute window has elapsed
//!
//! The two scans are independent, and a failing market is logged,
//! counted and left for the next tick. DISPUTED markets are never
//! picked up here; only an administrator can settle them.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::domain::error::SettlementError;
use crate::domain::market::OutcomeSource;

use super::context::ServiceContext;
use super::lifecycle::LifecycleController;
use super::settlement::SettlementEngine;

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
  pub locked: usize,
  pub finalized: usize,
  pub failures: usize,
}

pub struct LifecycleScheduler {
  ctx: ServiceContext,
  lifecycle: LifecycleController,
  settlement: SettlementEngine,
  tick_interval: Duration,
  dispute_window: chrono::Duration,
}

impl LifecycleScheduler {
  pub const fn new(
    ctx: ServiceContext,
    lifecycle: LifecycleController,
    settlement: SettlementEngine,
    tick_interval: Duration,
    dispute_window: chrono::Duration,
  ) -> Self {
    Self {
      ctx,
      lifecycle,
      settlement,
      tick_interval,
      dispute_window,
    }
  }

  /// Tick until `shutdown_rx` fires. A tick already in progress runs to
  /// completion first.
  #[instrument(skip(self, shutdown_rx))]
  pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = interval(self.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
      interval_ms = self.tick_interval.as_millis(),
      dispute_window_secs = self.dispute_window.num_seconds(),
      "Lifecycle scheduler started"
    );

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => {
          info!("Scheduler received shutdown signal");
          break;
        }
        _ = ticker.tick() => {
          let report = self.tick().await;
          if report != TickReport::default() {
            info!(
              locked = report.locked,
              finalized = report.finalized,
              failures = report.failures,
              "Scheduler tick"
            );
          }
        }
      }
    }

    info!("Lifecycle scheduler stopped");
  }

  /// Run both scans once.
  pub async fn tick(&self) -> TickReport {
    let started = Instant::now();
    let mut report = TickReport::default();

    match self.lifecycle.auto_lock().await {
      Ok(locked) => report.locked = locked.len(),
      Err(e) => {
        warn!(error = %e, "Auto-lock scan failed");
        self.fail("auto_lock", &mut report);
      }
    }

    let now = self.ctx.clock.now();
    match self.ctx.store.pending_auto_finalize(now, self.dispute_window).await {
      Ok(pending) => {
        for market_id in pending {
          match self.settlement.finalize(market_id, OutcomeSource::Declared).await {
            Ok(_) => report.finalized += 1,
            // Disputed or finalized since the scan; nothing to do.
            Err(SettlementError::NotFinalizable { status, .. }) => {
              debug!(market_id, status = %status, "Market no longer pending");
            }
            Err(e) => {
              warn!(market_id, error = %e, "Auto-finalize failed, will retry next tick");
              self.fail("auto_finalize", &mut report);
            }
          }
        }
      }
      Err(e) => {
        warn!(error = %e, "Auto-finalize scan failed");
        self.fail("auto_finalize", &mut report);
      }
    }

    self
      .ctx
      .metrics
      .tick_latency_ms
      .observe(started.elapsed().as_secs_f64() * 1_000.0);
    report
  }

  fn fail(&self, scan: &str, report: &mut TickReport) {
    report.failures += 1;
    self
      .ctx
      .metrics
      .scheduler_failures
      .with_label_values(&[scan])
      .inc();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use chrono::Duration as ChronoDuration;

  use super::*;
  use crate::domain::market::{MarketStatus, Outcome};
  use crate::usecases::test_support::Harness;

  fn scheduler(h: &Harness) -> LifecycleScheduler {
    LifecycleScheduler::new(
      h.ctx.clone(),
      h.lifecycle.clone(),
      h.settlement.clone(),
      Duration::from_millis(10),
      ChronoDuration::hours(24),
    )
  }

  #[tokio::test]
  async fn test_tick_locks_then_finalizes_after_window() {
    let h = Harness::new().await;
    let alice = h.funded_account("alice", 100).await;
    let market = h.open_market(alice, ChronoDuration::hours(1)).await;
    h.bet(alice, market.id, Outcome::Yes, 100).await;
    let s = scheduler(&h);

    h.clock.advance(ChronoDuration::hours(2));
    assert_eq!(s.tick().await, TickReport { locked: 1, finalized: 0, failures: 0 });

    h.declare(market.id, alice, Outcome::Yes).await;
    h.clock.advance(ChronoDuration::hours(23));
    assert_eq!(s.tick().await, TickReport::default());

    h.clock.advance(ChronoDuration::hours(1));
    assert_eq!(s.tick().await, TickReport { locked: 0, finalized: 1, failures: 0 });
    assert_eq!(h.lifecycle.market(market.id).await.unwrap().status, MarketStatus::Finalized);
    assert_eq!(h.balance(alice).await, 100);
  }

  #[tokio::test]
  async fn test_disputed_market_is_left_alone() {
    let h = Harness::new().await;
    let alice = h.funded_account("alice", 0).await;
    let bob = h.funded_account("bob", 0).await;
    let market = h.open_market(alice, ChronoDuration::hours(1)).await;
    h.declare(market.id, alice, Outcome::No).await;
    h.lifecycle.raise_dispute(market.id, bob, None).await.unwrap();

    h.clock.advance(ChronoDuration::days(30));
    assert_eq!(scheduler(&h).tick().await, TickReport::default());
    assert_eq!(h.lifecycle.market(market.id).await.unwrap().status, MarketStatus::Disputed);
  }

  #[tokio::test]
  async fn test_failing_market_does_not_block_others() {
    let h = Harness::new().await;
    let alice = h.funded_account("alice", 100).await;
    let ghost = h.funded_account("ghost", 100).await;
    let broken = h.open_market(alice, ChronoDuration::hours(1)).await;
    let healthy = h.open_market(alice, ChronoDuration::hours(1)).await;
    h.bet(ghost, broken.id, Outcome::Yes, 100).await;
    h.bet(alice, healthy.id, Outcome::Yes, 100).await;
    h.declare(broken.id, alice, Outcome::Yes).await;
    h.declare(healthy.id, alice, Outcome::Yes).await;

    // Remove the winner's account behind the store's back so crediting fails.
    sqlx::query("PRAGMA foreign_keys = OFF")
      .execute(h.ctx.store.pool())
      .await
      .unwrap();
    sqlx::query("DELETE FROM accounts WHERE id = ?")
      .bind(ghost)
      .execute(h.ctx.store.pool())
      .await
      .unwrap();

    h.clock.advance(ChronoDuration::days(2));
    let s = scheduler(&h);
    let report = s.tick().await;
    assert_eq!(report, TickReport { locked: 0, finalized: 1, failures: 1 });
    assert_eq!(h.lifecycle.market(broken.id).await.unwrap().status, MarketStatus::Resolved);
    assert_eq!(h.lifecycle.market(healthy.id).await.unwrap().status, MarketStatus::Finalized);
    assert_eq!(
      h.ctx
        .metrics
        .scheduler_failures
        .with_label_values(&["auto_finalize"])
        .get(),
      1
    );

    // Still pending, so it is retried on the next tick.
    assert_eq!(s.tick().await.failures, 1);
  }

  #[tokio::test]
  async fn test_run_stops_on_shutdown() {
    let h = Harness::new().await;
    let s = Arc::new(scheduler(&h));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = {
      let s = Arc::clone(&s);
      tokio::spawn(async move { s.run(shutdown_rx).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), task)
      .await
      .expect("scheduler did not stop")
      .unwrap();
  }
}
