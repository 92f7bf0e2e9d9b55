//! Settlement Engine - Parimutuel Payout of a Resolved Market
//!
//! Moves a RESOLVED or DISPUTED market to FINALIZED and distributes
//! the pool in the same transaction.
//!
//! Settlement flow:
//! 1. Claim the market with a conditional status update
//! 2. Plan payouts from every wager (or refunds if nobody won)
//! 3. Credit accounts and append `WIN_PAYOUT` / `REFUND` ledger lines
//! 4. Commit, then publish per-wager and market events

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::adapters::persistence::primitives::{self, NewEntry};
use crate::domain::error::SettlementError;
use crate::domain::market::{
  LifecycleAction, Market, MarketId, MarketStatus, Outcome, OutcomeSource, Units,
};
use crate::domain::payout::{plan_settlement, SettlementPlan, WagerResult, WagerSettlement};
use crate::ports::notifier::SettlementEvent;

use super::context::ServiceContext;

/// Result of finalizing one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
  pub market_id: MarketId,
  pub question: String,
  /// Outcome the pool was settled on.
  pub outcome: Outcome,
  /// Whether an administrator replaced the declared outcome.
  pub overridden: bool,
  pub total_pool: Units,
  pub winning_pool: Units,
  /// Winning side was empty and every stake went back.
  pub refunded: bool,
  /// Distinct accounts that received a credit.
  pub payouts_processed: usize,
  pub total_paid: Units,
  /// Units kept back by floor division. Never redistributed.
  pub remainder: Units,
  pub settlements: Vec<WagerSettlement>,
  pub finalized_at: DateTime<Utc>,
}

impl SettlementReport {
  fn new(market: &Market, plan: SettlementPlan, overridden: bool, at: DateTime<Utc>) -> Self {
    Self {
      market_id: market.id,
      question: market.question.clone(),
      outcome: plan.outcome,
      overridden,
      total_pool: plan.total_pool,
      winning_pool: plan.winning_pool,
      refunded: plan.is_refund(),
      payouts_processed: plan.accounts_credited(),
      total_paid: plan.total_credited(),
      remainder: plan.remainder(),
      settlements: plan.settlements,
      finalized_at: at,
    }
  }

  /// Notification fan-out: one event per wager, then the market summary.
  pub fn events(&self) -> Vec<SettlementEvent> {
    let mut events: Vec<_> = self
      .settlements
      .iter()
      .map(|s| match s.result {
        WagerResult::Won { payout } => SettlementEvent::WagerWon {
          market_id: self.market_id,
          question: self.question.clone(),
          account_id: s.account_id,
          wagered: s.stake,
          payout,
        },
        WagerResult::Lost => SettlementEvent::WagerLost {
          market_id: self.market_id,
          question: self.question.clone(),
          account_id: s.account_id,
          wagered: s.stake,
        },
        WagerResult::Refunded => SettlementEvent::WagerRefunded {
          market_id: self.market_id,
          question: self.question.clone(),
          account_id: s.account_id,
          amount: s.stake,
        },
      })
      .collect();

    events.push(SettlementEvent::MarketFinalized {
      market_id: self.market_id,
      question: self.question.clone(),
      outcome: self.outcome,
      total_pool: self.total_pool,
      payouts_processed: self.payouts_processed,
    });
    events
  }
}

#[derive(Debug, Clone)]
pub struct SettlementEngine {
  ctx: ServiceContext,
}

impl SettlementEngine {
  pub const fn new(ctx: ServiceContext) -> Self {
    Self { ctx }
  }

  /// Settle `market_id` on the declared outcome or an override.
  ///
  /// # Errors
  /// `MarketNotFound`, `NotFinalizable` (wrong status or a concurrent
  /// finalize won), `InvalidOutcome` when nothing was declared.
  #[instrument(skip(self))]
  pub async fn finalize(
    &self,
    market_id: MarketId,
    source: OutcomeSource,
  ) -> Result<SettlementReport, SettlementError> {
    let result = self
      .ctx
      .retry
      .run("finalize", move || self.try_finalize(market_id, source))
      .await;
    self.ctx.record_rejection("finalize", &result);

    if let Ok(report) = &result {
      self.record(report);
      self.ctx.publish(report.events());
    }
    result
  }

  async fn try_finalize(
    &self,
    market_id: MarketId,
    source: OutcomeSource,
  ) -> Result<SettlementReport, SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;

    let market = primitives::fetch_market(&mut tx, market_id)
      .await?
      .ok_or(SettlementError::MarketNotFound(market_id))?;
    if !matches!(market.status, MarketStatus::Resolved | MarketStatus::Disputed) {
      return Err(SettlementError::NotFinalizable {
        market_id,
        status: market.status,
      });
    }

    let (outcome, overridden) = match source {
      OutcomeSource::Overridden(outcome) => (outcome, market.outcome != Some(outcome)),
      OutcomeSource::Declared => {
        let outcome = market.outcome.ok_or_else(|| {
          SettlementError::InvalidOutcome(format!("market {market_id} has no declared outcome"))
        })?;
        (outcome, false)
      }
    };

    // Claim first: a concurrent finalize that got here earlier leaves
    // nothing to update.
    if !primitives::apply_outcome(&mut tx, market_id, LifecycleAction::Finalize, outcome, now).await? {
      let status = primitives::fetch_market(&mut tx, market_id)
        .await?
        .map_or(market.status, |m| m.status);
      return Err(SettlementError::NotFinalizable { market_id, status });
    }

    let wagers = primitives::wagers_for_market(&mut tx, market_id).await?;
    let plan = plan_settlement(&wagers, outcome);

    for settlement in plan.credits() {
      let Some(source) = settlement.entry_source() else {
        continue;
      };
      let description = describe(settlement, market_id);
      primitives::credit_account(&mut tx, settlement.account_id, settlement.credit()).await?;
      primitives::append_entry(
        &mut tx,
        &NewEntry {
          account_id: settlement.account_id,
          market_id: Some(market_id),
          amount: settlement.credit(),
          source,
          description: &description,
        },
        now,
      )
      .await?;
    }

    tx.commit().await?;
    Ok(SettlementReport::new(&market, plan, overridden, now))
  }

  fn record(&self, report: &SettlementReport) {
    let metrics = &self.ctx.metrics;
    let branch = if report.refunded { "refund" } else { "payout" };
    metrics.settlements.with_label_values(&[branch]).inc();
    metrics
      .transitions
      .with_label_values(&[MarketStatus::Finalized.as_str()])
      .inc();
    MetricsRegistry::add_units(&metrics.units_paid, report.total_paid);
    MetricsRegistry::add_units(&metrics.rounding_remainder, report.remainder);

    if report.remainder > 0 {
      warn!(
        market_id = report.market_id,
        remainder = report.remainder,
        "Rounding remainder left undistributed"
      );
    }
    info!(
      market_id = report.market_id,
      outcome = %report.outcome,
      overridden = report.overridden,
      branch,
      total_pool = report.total_pool,
      total_paid = report.total_paid,
      payouts_processed = report.payouts_processed,
      "Market finalized"
    );
  }
}

fn describe(settlement: &WagerSettlement, market_id: MarketId) -> String {
  match settlement.result {
    WagerResult::Won { payout } => format!(
      "wager #{} won in market #{market_id}: wagered {}, paid {payout}, profit {:+}",
      settlement.wager_id,
      settlement.stake,
      settlement.profit()
    ),
    WagerResult::Refunded => format!(
      "wager #{} refunded in market #{market_id}: nobody backed the winning side",
      settlement.wager_id
    ),
    WagerResult::Lost => String::new(),
  }
}
