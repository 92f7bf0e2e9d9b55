//! Domain layer - Core settlement model and rules.
//!
//! Pure types and functions: the market lifecycle state machine, the
//! parimutuel payout arithmetic and the error taxonomy. Nothing here
//! touches the store, the clock or the network (hexagonal inner ring).

pub mod error;
pub mod market;
pub mod payout;

// Re-export core types for convenience
pub use error::{ErrorKind, SettlementError};
pub use market::{
    Account, AccountId, Caller, Dispute, EntrySource, LedgerEntry, LifecycleAction, Market,
    MarketId, MarketStatus, Outcome, OutcomeSource, PoolTotals, Units, Wager, WagerId,
};
pub use payout::{SettlementPlan, WagerResult, WagerSettlement, plan_settlement};
