//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with the ledger store and the ports.
//! Each service method is one business operation running in one
//! store transaction, retried as a whole on contention.
//!
//! Use cases:
//! - `WagerService`: Atomic wager placement and pool totals
//! - `LifecycleController`: Market creation and guarded transitions
//! - `SettlementEngine`: Parimutuel payout or refund on finalize
//! - `AccountService`: Grants, statements and the conservation audit
//! - `LifecycleScheduler`: Periodic auto-lock and auto-finalize

pub mod accounts;
pub mod context;
pub mod lifecycle;
pub mod retry;
pub mod scheduler;
pub mod settlement;
pub mod wager_placement;

#[cfg(test)]
pub(crate) mod test_support;

pub use accounts::{AccountService, AccountStatement};
pub use context::ServiceContext;
pub use lifecycle::LifecycleController;
pub use retry::RetryPolicy;
pub use scheduler::{LifecycleScheduler, TickReport};
pub use settlement::{SettlementEngine, SettlementReport};
pub use wager_placement::WagerService;
