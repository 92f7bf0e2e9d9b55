//! Persistence Adapters - SQLite Ledger Store
//!
//! Accounts, markets, wagers, ledger entries and disputes live in one
//! SQLite database accessed through `sqlx`. Money and lifecycle changes
//! happen inside a single transaction opened from `LedgerStore`.

pub mod primitives;
pub mod schema;
pub mod store;

pub use primitives::BalanceDiscrepancy;
pub use store::LedgerStore;
