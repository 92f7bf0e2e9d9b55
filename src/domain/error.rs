//! Typed failures surfaced by every core operation.
//!
//! Each variant belongs to exactly one [`ErrorKind`], which tells the
//! adapter layer whether the caller should fix the request, refresh and
//! retry, or simply retry. `code()` is stable and meant for rendering
//! specific user-facing messages.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::market::{AccountId, LifecycleAction, MarketId, MarketStatus, Units};

/// Boxed source error from the store or another collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`SettlementError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Not retryable without correction.
    Validation,
    /// Wrong caller for the action. Not retryable.
    Authorization,
    /// Market or account not in the required state. Refresh, then maybe retry.
    StateConflict,
    /// Unknown market or account.
    NotFound,
    /// Store busy or transaction aborted by isolation. Safe to retry as a whole.
    Transient,
    /// Anything else. Reported, never panicked on.
    Internal,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid outcome {0:?}: expected YES or NO")]
    InvalidOutcome(String),

    #[error("invalid amount {0}: wagers must be positive")]
    InvalidAmount(Units),

    #[error("market question must not be empty")]
    InvalidQuestion,

    #[error("deadline {deadline} is not in the future")]
    InvalidDeadline { deadline: DateTime<Utc> },

    #[error("account {account_id} may not {action} market {market_id}")]
    Forbidden {
        market_id: MarketId,
        account_id: AccountId,
        action: LifecycleAction,
    },

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Units, requested: Units },

    #[error("market {market_id} is {status}, not open for wagers")]
    MarketNotOpen {
        market_id: MarketId,
        status: MarketStatus,
    },

    #[error("market {market_id} stopped accepting wagers at {deadline}")]
    MarketExpired {
        market_id: MarketId,
        deadline: DateTime<Utc>,
    },

    #[error("cannot {action} market {market_id} while it is {from}")]
    InvalidStateTransition {
        market_id: MarketId,
        from: MarketStatus,
        action: LifecycleAction,
    },

    #[error("market {market_id} is {status} and cannot be finalized")]
    NotFinalizable {
        market_id: MarketId,
        status: MarketStatus,
    },

    #[error("account {account_id} has balance {balance} and is not eligible for a bailout")]
    BailoutNotEligible { account_id: AccountId, balance: Units },

    #[error("market {0} not found")]
    MarketNotFound(MarketId),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("transient store failure: {0}")]
    Transient(#[source] BoxError),

    #[error("internal error: {0}")]
    Internal(#[source] BoxError),
}

impl SettlementError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidOutcome(_)
            | Self::InvalidAmount(_)
            | Self::InvalidQuestion
            | Self::InvalidDeadline { .. } => ErrorKind::Validation,
            Self::Forbidden { .. } => ErrorKind::Authorization,
            Self::InsufficientFunds { .. }
            | Self::MarketNotOpen { .. }
            | Self::MarketExpired { .. }
            | Self::InvalidStateTransition { .. }
            | Self::NotFinalizable { .. }
            | Self::BailoutNotEligible { .. } => ErrorKind::StateConflict,
            Self::MarketNotFound(_) | Self::AccountNotFound(_) => ErrorKind::NotFound,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for adapters.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidOutcome(_) => "INVALID_OUTCOME",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::InvalidQuestion => "INVALID_QUESTION",
            Self::InvalidDeadline { .. } => "INVALID_DEADLINE",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::MarketNotOpen { .. } => "MARKET_NOT_OPEN",
            Self::MarketExpired { .. } => "MARKET_EXPIRED",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::NotFinalizable { .. } => "NOT_FINALIZABLE",
            Self::BailoutNotEligible { .. } => "BAILOUT_NOT_ELIGIBLE",
            Self::MarketNotFound(_) => "MARKET_NOT_FOUND",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::Transient(_) => "TRANSIENT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}
