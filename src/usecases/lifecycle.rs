//! Market Lifecycle Controller - Guarded State Transitions
//!
//! Owns every transition except the payout itself:
//! - creation (ACTIVE)
//! - auto-lock once the deadline passes (ACTIVE → LOCKED)
//! - creator declaration (ACTIVE/LOCKED → RESOLVED), no money moves
//! - disputes (RESOLVED → DISPUTED)
//! - admin adjudication, delegated to the settlement engine
//!
//! Each transition is checked against `MarketStatus::transition` and
//! then applied with a conditional update, so a lost race reports the
//! same error as a stale request.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::adapters::persistence::primitives;
use crate::domain::error::SettlementError;
use crate::domain::market::{
  AccountId, Caller, Dispute, LifecycleAction, Market, MarketId, MarketStatus, Outcome,
  OutcomeSource,
};
use crate::ports::notifier::SettlementEvent;

use super::context::ServiceContext;
use super::settlement::{SettlementEngine, SettlementReport};

#[derive(Debug, Clone)]
pub struct LifecycleController {
  ctx: ServiceContext,
  settlement: SettlementEngine,
}

impl LifecycleController {
  pub const fn new(ctx: ServiceContext, settlement: SettlementEngine) -> Self {
    Self { ctx, settlement }
  }

  /// Open a new market owned by `creator_id`.
  ///
  /// # Errors
  /// `InvalidQuestion` for a blank question, `InvalidDeadline` unless the
  /// deadline is in the future, `AccountNotFound` for an unknown creator.
  #[instrument(skip(self, question))]
  pub async fn create_market(
    &self,
    creator_id: AccountId,
    question: &str,
    deadline: DateTime<Utc>,
  ) -> Result<Market, SettlementError> {
    let question = question.trim();
    let result = if question.is_empty() {
      Err(SettlementError::InvalidQuestion)
    } else {
      self
        .ctx
        .retry
        .run("create_market", move || self.try_create(creator_id, question, deadline))
        .await
    };
    self.ctx.record_rejection("create_market", &result);

    if let Ok(market) = &result {
      info!(market_id = market.id, deadline = %market.deadline, "Market created");
    }
    result
  }

  async fn try_create(
    &self,
    creator_id: AccountId,
    question: &str,
    deadline: DateTime<Utc>,
  ) -> Result<Market, SettlementError> {
    let now = self.ctx.clock.now();
    if deadline <= now {
      return Err(SettlementError::InvalidDeadline { deadline });
    }

    let mut tx = self.ctx.store.begin().await?;
    if primitives::fetch_account(&mut tx, creator_id).await?.is_none() {
      return Err(SettlementError::AccountNotFound(creator_id));
    }
    let market = primitives::insert_market(&mut tx, creator_id, question, deadline, now).await?;
    tx.commit().await?;
    Ok(market)
  }

  /// Record the creator's answer. Moves the market to RESOLVED and
  /// starts the dispute window; balances are untouched.
  ///
  /// # Errors
  /// `MarketNotFound`, `Forbidden` for anyone but the creator,
  /// `InvalidStateTransition` unless the market is ACTIVE or LOCKED.
  #[instrument(skip(self))]
  pub async fn declare_outcome(
    &self,
    market_id: MarketId,
    caller_id: AccountId,
    outcome: Outcome,
  ) -> Result<Market, SettlementError> {
    let result = self
      .ctx
      .retry
      .run("declare_outcome", move || self.try_declare(market_id, caller_id, outcome))
      .await;
    self.ctx.record_rejection("declare_outcome", &result);

    if let Ok(market) = &result {
      self.record_transition(market.status);
      info!(market_id, outcome = %outcome, "Outcome declared");
    }
    result
  }

  async fn try_declare(
    &self,
    market_id: MarketId,
    caller_id: AccountId,
    outcome: Outcome,
  ) -> Result<Market, SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;

    let market = primitives::fetch_market(&mut tx, market_id)
      .await?
      .ok_or(SettlementError::MarketNotFound(market_id))?;
    let action = LifecycleAction::Resolve;
    if market.creator_id != caller_id {
      return Err(SettlementError::Forbidden {
        market_id,
        account_id: caller_id,
        action,
      });
    }
    let to = check_transition(&market, action)?;

    if !primitives::apply_outcome(&mut tx, market_id, action, outcome, now).await? {
      return Err(lost_race(&mut tx, &market, action).await);
    }
    tx.commit().await?;

    Ok(Market {
      status: to,
      outcome: Some(outcome),
      resolved_at: Some(now),
      ..market
    })
  }

  /// Contest a RESOLVED market. Freezes it until an administrator
  /// adjudicates; the scheduler no longer auto-finalizes it.
  ///
  /// # Errors
  /// `MarketNotFound`, `AccountNotFound`, `InvalidStateTransition`
  /// unless the market is RESOLVED.
  #[instrument(skip(self, reason))]
  pub async fn raise_dispute(
    &self,
    market_id: MarketId,
    caller_id: AccountId,
    reason: Option<&str>,
  ) -> Result<Dispute, SettlementError> {
    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    let result = self
      .ctx
      .retry
      .run("raise_dispute", move || self.try_dispute(market_id, caller_id, reason))
      .await;
    self.ctx.record_rejection("raise_dispute", &result);

    match result {
      Ok((dispute, event)) => {
        self.record_transition(MarketStatus::Disputed);
        info!(market_id, dispute_id = dispute.id, "Dispute raised");
        self.ctx.publish([event]);
        Ok(dispute)
      }
      Err(e) => Err(e),
    }
  }

  async fn try_dispute(
    &self,
    market_id: MarketId,
    caller_id: AccountId,
    reason: Option<&str>,
  ) -> Result<(Dispute, SettlementEvent), SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;

    let market = primitives::fetch_market(&mut tx, market_id)
      .await?
      .ok_or(SettlementError::MarketNotFound(market_id))?;
    if primitives::fetch_account(&mut tx, caller_id).await?.is_none() {
      return Err(SettlementError::AccountNotFound(caller_id));
    }
    let action = LifecycleAction::Dispute;
    check_transition(&market, action)?;
    let declared = market.outcome.ok_or_else(|| {
      SettlementError::Internal(format!("resolved market {market_id} has no outcome").into())
    })?;

    if !primitives::apply_status(&mut tx, market_id, action).await? {
      return Err(lost_race(&mut tx, &market, action).await);
    }
    let dispute = primitives::insert_dispute(&mut tx, market_id, caller_id, reason, now).await?;
    tx.commit().await?;

    let event = SettlementEvent::DisputeRaised {
      market_id,
      question: market.question,
      raised_by: caller_id,
      declared,
    };
    Ok((dispute, event))
  }

  /// Administrator decision on a RESOLVED or DISPUTED market: settle on
  /// `outcome`, confirming or overriding the creator.
  ///
  /// # Errors
  /// `Forbidden` for non-admins, then anything `SettlementEngine::finalize`
  /// returns.
  #[instrument(skip(self))]
  pub async fn adjudicate(
    &self,
    market_id: MarketId,
    caller: Caller,
    outcome: Outcome,
  ) -> Result<SettlementReport, SettlementError> {
    if !caller.is_admin {
      let err = SettlementError::Forbidden {
        market_id,
        account_id: caller.account_id,
        action: LifecycleAction::Finalize,
      };
      let result = Err(err);
      self.ctx.record_rejection("adjudicate", &result);
      return result;
    }
    info!(market_id, admin = caller.account_id, outcome = %outcome, "Adjudicating market");
    self
      .settlement
      .finalize(market_id, OutcomeSource::Overridden(outcome))
      .await
  }

  /// Lock every ACTIVE market whose deadline has passed and tell each
  /// creator it is time to declare.
  #[instrument(skip(self))]
  pub async fn auto_lock(&self) -> Result<Vec<Market>, SettlementError> {
    let result = self.ctx.retry.run("auto_lock", move || self.try_lock()).await;
    self.ctx.record_rejection("auto_lock", &result);

    if let Ok(locked) = &result {
      if !locked.is_empty() {
        self
          .ctx
          .metrics
          .transitions
          .with_label_values(&[MarketStatus::Locked.as_str()])
          .inc_by(locked.len() as u64);
        info!(count = locked.len(), "Expired markets locked");
      }
      self.ctx.publish(locked.iter().map(|m| SettlementEvent::MarketLocked {
        market_id: m.id,
        creator_id: m.creator_id,
        question: m.question.clone(),
      }));
    }
    result
  }

  async fn try_lock(&self) -> Result<Vec<Market>, SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;
    let locked = primitives::lock_expired(&mut tx, now).await?;
    tx.commit().await?;
    Ok(locked)
  }

  // ── Read-only queries ───────────────────────────────────

  pub async fn market(&self, market_id: MarketId) -> Result<Market, SettlementError> {
    self
      .ctx
      .store
      .market(market_id)
      .await?
      .ok_or(SettlementError::MarketNotFound(market_id))
  }

  pub async fn markets_by_status(&self, status: MarketStatus) -> Result<Vec<Market>, SettlementError> {
    self.ctx.store.markets_by_status(status).await
  }

  pub async fn disputes_for_market(&self, market_id: MarketId) -> Result<Vec<Dispute>, SettlementError> {
    self.ctx.store.disputes_for_market(market_id).await
  }

  fn record_transition(&self, to: MarketStatus) {
    self
      .ctx
      .metrics
      .transitions
      .with_label_values(&[to.as_str()])
      .inc();
  }
}

fn check_transition(market: &Market, action: LifecycleAction) -> Result<MarketStatus, SettlementError> {
  market
    .status
    .transition(action)
    .map_err(|e| SettlementError::InvalidStateTransition {
      market_id: market.id,
      from: e.from,
      action: e.action,
    })
}

/// The conditional update matched nothing: report the status that beat us.
async fn lost_race(
  conn: &mut sqlx::SqliteConnection,
  market: &Market,
  action: LifecycleAction,
) -> SettlementError {
  let from = match primitives::fetch_market(conn, market.id).await {
    Ok(Some(current)) => current.status,
    Ok(None) => return SettlementError::MarketNotFound(market.id),
    Err(e) => return e,
  };
  SettlementError::InvalidStateTransition {
    market_id: market.id,
    from,
    action,
  }
}
