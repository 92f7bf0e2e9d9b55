//! Notifier Port - Outbound Settlement Events
//!
//! The core reports what happened (a market locked, a wager won, a
//! dispute raised) through this trait. Delivery belongs to an external
//! collaborator: chat bot, push service, broadcast channel.
//!
//! Contract:
//! - Called only after the owning transaction has committed
//! - Must not block the caller; queue or drop instead
//! - Delivery failures are the sink's problem, never the core's

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::market::{AccountId, MarketId, Outcome, Units};

/// Fire-and-forget event emitted by the settlement core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
  /// Deadline passed; the creator should declare an outcome.
  MarketLocked {
    market_id: MarketId,
    creator_id: AccountId,
    question: String,
  },
  /// Someone contested the creator's declaration.
  DisputeRaised {
    market_id: MarketId,
    question: String,
    raised_by: AccountId,
    declared: Outcome,
  },
  WagerWon {
    market_id: MarketId,
    question: String,
    account_id: AccountId,
    wagered: Units,
    payout: Units,
  },
  WagerLost {
    market_id: MarketId,
    question: String,
    account_id: AccountId,
    wagered: Units,
  },
  WagerRefunded {
    market_id: MarketId,
    question: String,
    account_id: AccountId,
    amount: Units,
  },
  /// Broadcast once per settled market.
  MarketFinalized {
    market_id: MarketId,
    question: String,
    outcome: Outcome,
    total_pool: Units,
    payouts_processed: usize,
  },
}

impl SettlementEvent {
  pub const fn market_id(&self) -> MarketId {
    match self {
      Self::MarketLocked { market_id, .. }
      | Self::DisputeRaised { market_id, .. }
      | Self::WagerWon { market_id, .. }
      | Self::WagerLost { market_id, .. }
      | Self::WagerRefunded { market_id, .. }
      | Self::MarketFinalized { market_id, .. } => *market_id,
    }
  }

  pub const fn kind(&self) -> &'static str {
    match self {
      Self::MarketLocked { .. } => "market_locked",
      Self::DisputeRaised { .. } => "dispute_raised",
      Self::WagerWon { .. } => "wager_won",
      Self::WagerLost { .. } => "wager_lost",
      Self::WagerRefunded { .. } => "wager_refunded",
      Self::MarketFinalized { .. } => "market_finalized",
    }
  }
}

/// Non-blocking event sink used by the core services.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync + 'static {
  /// Hand an event off for delivery. Must return promptly.
  fn notify(&self, event: SettlementEvent);
}

/// Notifier that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
  fn notify(&self, _event: SettlementEvent) {}
}

/// Final delivery target behind a queued notifier.
///
/// Unlike [`Notifier`], this may take its time: it runs on a dedicated
/// dispatcher task, off the commit path.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
  async fn deliver(&self, event: &SettlementEvent) -> anyhow::Result<()>;
}
