//! Wager Placement - Atomic Bet Execution
//!
//! A wager is one transaction: check funds, check the market is open,
//! debit, record the wager, append the `WAGER_PLACED` ledger line.
//! Any failure rolls back every step.

use tracing::{info, instrument};

use crate::adapters::persistence::primitives::{self, NewEntry};
use crate::domain::error::SettlementError;
use crate::domain::market::{
  AccountId, EntrySource, MarketId, MarketStatus, Outcome, PoolTotals, Units, Wager,
};

use super::context::ServiceContext;

#[derive(Debug, Clone)]
pub struct WagerService {
  ctx: ServiceContext,
}

impl WagerService {
  pub const fn new(ctx: ServiceContext) -> Self {
    Self { ctx }
  }

  /// Stake `amount` units of `account_id` on `outcome` in `market_id`.
  ///
  /// # Errors
  /// `InvalidAmount`, `AccountNotFound`, `InsufficientFunds`,
  /// `MarketNotFound`, `MarketNotOpen`, `MarketExpired`, or `Transient`
  /// once the retry budget is spent.
  #[instrument(skip(self))]
  pub async fn place_wager(
    &self,
    account_id: AccountId,
    market_id: MarketId,
    outcome: Outcome,
    amount: Units,
  ) -> Result<Wager, SettlementError> {
    let result = if amount <= 0 {
      Err(SettlementError::InvalidAmount(amount))
    } else {
      self
        .ctx
        .retry
        .run("place_wager", move || {
          self.try_place(account_id, market_id, outcome, amount)
        })
        .await
    };
    self.ctx.record_rejection("place_wager", &result);

    if let Ok(wager) = &result {
      self
        .ctx
        .metrics
        .wagers_placed
        .with_label_values(&[outcome.as_str()])
        .inc();
      self.ctx.metrics.units_wagered.inc_by(amount.unsigned_abs());
      info!(wager_id = wager.id, "Wager placed");
    }
    result
  }

  async fn try_place(
    &self,
    account_id: AccountId,
    market_id: MarketId,
    outcome: Outcome,
    amount: Units,
  ) -> Result<Wager, SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;

    let balance = primitives::account_balance(&mut tx, account_id)
      .await?
      .ok_or(SettlementError::AccountNotFound(account_id))?;
    if balance < amount {
      return Err(SettlementError::InsufficientFunds {
        balance,
        requested: amount,
      });
    }

    let market = primitives::fetch_market(&mut tx, market_id)
      .await?
      .ok_or(SettlementError::MarketNotFound(market_id))?;
    if !market.accepts_wagers_at(now) {
      // An ACTIVE market past its deadline has not been locked by the scheduler yet.
      return Err(if market.status == MarketStatus::Active {
        SettlementError::MarketExpired {
          market_id,
          deadline: market.deadline,
        }
      } else {
        SettlementError::MarketNotOpen {
          market_id,
          status: market.status,
        }
      });
    }

    if !primitives::debit_account(&mut tx, account_id, amount).await? {
      let balance = primitives::account_balance(&mut tx, account_id)
        .await?
        .unwrap_or_default();
      return Err(SettlementError::InsufficientFunds {
        balance,
        requested: amount,
      });
    }

    let wager = primitives::insert_wager(&mut tx, account_id, market_id, outcome, amount, now).await?;

    let description = format!("wager #{} on {outcome} in market #{market_id}", wager.id);
    primitives::append_entry(
      &mut tx,
      &NewEntry {
        account_id,
        market_id: Some(market_id),
        amount: -amount,
        source: EntrySource::WagerPlaced,
        description: &description,
      },
      now,
    )
    .await?;

    tx.commit().await?;
    Ok(wager)
  }

  /// Current YES/NO pool sizes, summed from the wagers table.
  pub async fn pool_totals(&self, market_id: MarketId) -> Result<PoolTotals, SettlementError> {
    if self.ctx.store.market(market_id).await?.is_none() {
      return Err(SettlementError::MarketNotFound(market_id));
    }
    self.ctx.store.pool_totals(market_id).await
  }

  pub async fn wagers_for_market(&self, market_id: MarketId) -> Result<Vec<Wager>, SettlementError> {
    self.ctx.store.wagers_for_market(market_id).await
  }
}
