//! Core settlement domain types.
//!
//! Defines the business entities: accounts, markets, wagers, ledger entries
//! and disputes, plus the market lifecycle state machine.
//!
//! Status, outcome and entry source are closed enums. They are only turned
//! into strings at the persistence boundary via `as_str` / `FromStr`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::SettlementError;

// ────────────────────────────────────────────
// Identifiers
// ────────────────────────────────────────────

/// Account primary key.
pub type AccountId = i64;

/// Market primary key.
pub type MarketId = i64;

/// Wager primary key.
pub type WagerId = i64;

/// Amount in the smallest currency unit. Never floating point.
pub type Units = i64;

// ────────────────────────────────────────────
// Enums shared across domain, store and ports
// ────────────────────────────────────────────

/// One side of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = SettlementError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            _ => Err(SettlementError::InvalidOutcome(s.to_string())),
        }
    }
}

/// Lifecycle status of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    /// Accepting wagers until the deadline.
    Active,
    /// Deadline passed, waiting for the creator's declaration.
    Locked,
    /// Outcome declared, dispute window running.
    Resolved,
    /// Declaration contested, waiting for an administrator.
    Disputed,
    /// Settled. Terminal.
    Finalized,
}

impl MarketStatus {
    pub const ALL: [Self; 5] = [
        Self::Active,
        Self::Locked,
        Self::Resolved,
        Self::Disputed,
        Self::Finalized,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Locked => "LOCKED",
            Self::Resolved => "RESOLVED",
            Self::Disputed => "DISPUTED",
            Self::Finalized => "FINALIZED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized)
    }

    /// Apply a lifecycle action, returning the next status.
    ///
    /// This is the single source of truth for legal transitions. Guards that
    /// depend on the caller (creator, administrator) are checked by the
    /// lifecycle controller before the transition is attempted.
    pub fn transition(self, action: LifecycleAction) -> Result<Self, IllegalTransition> {
        use LifecycleAction as A;
        use MarketStatus as S;

        match (self, action) {
            (S::Active, A::Lock) => Ok(S::Locked),
            (S::Active | S::Locked, A::Resolve) => Ok(S::Resolved),
            (S::Resolved, A::Dispute) => Ok(S::Disputed),
            (S::Resolved | S::Disputed, A::Finalize) => Ok(S::Finalized),
            (from, action) => Err(IllegalTransition { from, action }),
        }
    }

    /// Statuses from which `action` is legal.
    pub fn sources_for(action: LifecycleAction) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|s| s.transition(action).is_ok())
            .collect()
    }
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketStatus {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| SettlementError::Internal(format!("unknown market status {s:?}").into()))
    }
}

/// Triggers that move a market through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Deadline elapsed (scheduler).
    Lock,
    /// Creator declares the outcome.
    Resolve,
    /// An account holder contests the declaration.
    Dispute,
    /// Settlement (dispute window elapsed, or administrator decision).
    Finalize,
}

impl LifecycleAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Resolve => "resolve",
            Self::Dispute => "dispute",
            Self::Finalize => "finalize",
        }
    }

    /// Status a market ends up in after this action succeeds.
    pub const fn target(self) -> MarketStatus {
        match self {
            Self::Lock => MarketStatus::Locked,
            Self::Resolve => MarketStatus::Resolved,
            Self::Dispute => MarketStatus::Disputed,
            Self::Finalize => MarketStatus::Finalized,
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle action that is not legal from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: MarketStatus,
    pub action: LifecycleAction,
}

/// Where the settlement outcome comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSource {
    /// The creator's recorded declaration.
    Declared,
    /// Administrator decision, confirming or overriding the declaration.
    Overridden(Outcome),
}

/// Classification of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySource {
    Welcome,
    WagerPlaced,
    WinPayout,
    Refund,
    Bailout,
}

impl EntrySource {
    pub const ALL: [Self; 5] = [
        Self::Welcome,
        Self::WagerPlaced,
        Self::WinPayout,
        Self::Refund,
        Self::Bailout,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::WagerPlaced => "WAGER_PLACED",
            Self::WinPayout => "WIN_PAYOUT",
            Self::Refund => "REFUND",
            Self::Bailout => "BAILOUT",
        }
    }
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntrySource {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| SettlementError::Internal(format!("unknown ledger source {s:?}").into()))
    }
}

// ────────────────────────────────────────────
// Entities
// ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub balance: Units,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub question: String,
    pub creator_id: AccountId,
    /// Wagers are accepted strictly before this instant.
    pub deadline: DateTime<Utc>,
    pub status: MarketStatus,
    pub outcome: Option<Outcome>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Market {
    /// Whether wagers may still be placed at `now`.
    pub fn accepts_wagers_at(&self, now: DateTime<Utc>) -> bool {
        self.status == MarketStatus::Active && now < self.deadline
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub amount: Units,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: AccountId,
    pub market_id: Option<MarketId>,
    /// Signed: debits are negative.
    pub amount: Units,
    pub source: EntrySource,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: i64,
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sum of wager amounts per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTotals {
    pub yes: Units,
    pub no: Units,
}

impl PoolTotals {
    pub const fn total(&self) -> Units {
        self.yes + self.no
    }

    pub const fn for_outcome(&self, outcome: Outcome) -> Units {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }
}

/// Identity of whoever invokes a guarded operation, as supplied by the
/// authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub account_id: AccountId,
    pub is_admin: bool,
}

impl Caller {
    pub const fn account(account_id: AccountId) -> Self {
        Self {
            account_id,
            is_admin: false,
        }
    }

    pub const fn admin(account_id: AccountId) -> Self {
        Self {
            account_id,
            is_admin: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("YES".parse::<Outcome>().unwrap(), Outcome::Yes);
        assert_eq!(" no ".parse::<Outcome>().unwrap(), Outcome::No);
        assert!(matches!(
            "MAYBE".parse::<Outcome>(),
            Err(SettlementError::InvalidOutcome(_))
        ));
    }

    #[test]
    fn test_status_round_trips_through_storage_text() {
        for status in MarketStatus::ALL {
            assert_eq!(status.as_str().parse::<MarketStatus>().unwrap(), status);
        }
        assert!("active".parse::<MarketStatus>().is_err());
    }

    #[test]
    fn test_legal_transitions() {
        use LifecycleAction as A;
        use MarketStatus as S;

        assert_eq!(S::Active.transition(A::Lock), Ok(S::Locked));
        assert_eq!(S::Active.transition(A::Resolve), Ok(S::Resolved));
        assert_eq!(S::Locked.transition(A::Resolve), Ok(S::Resolved));
        assert_eq!(S::Resolved.transition(A::Dispute), Ok(S::Disputed));
        assert_eq!(S::Resolved.transition(A::Finalize), Ok(S::Finalized));
        assert_eq!(S::Disputed.transition(A::Finalize), Ok(S::Finalized));
    }

    #[test]
    fn test_illegal_transitions() {
        use LifecycleAction as A;
        use MarketStatus as S;

        assert!(S::Locked.transition(A::Lock).is_err());
        assert!(S::Resolved.transition(A::Resolve).is_err());
        assert!(S::Disputed.transition(A::Resolve).is_err());
        assert!(S::Active.transition(A::Dispute).is_err());
        assert!(S::Disputed.transition(A::Dispute).is_err());
        assert!(S::Active.transition(A::Finalize).is_err());
        assert!(S::Locked.transition(A::Finalize).is_err());

        for action in [A::Lock, A::Resolve, A::Dispute, A::Finalize] {
            let err = S::Finalized.transition(action).unwrap_err();
            assert_eq!(err.from, S::Finalized);
            assert_eq!(err.action, action);
        }
    }

    #[test]
    fn test_action_targets_agree_with_transitions() {
        for action in [
            LifecycleAction::Lock,
            LifecycleAction::Resolve,
            LifecycleAction::Dispute,
            LifecycleAction::Finalize,
        ] {
            for from in MarketStatus::sources_for(action) {
                assert_eq!(from.transition(action), Ok(action.target()));
            }
        }
    }

    #[test]
    fn test_sources_for_finalize() {
        assert_eq!(
            MarketStatus::sources_for(LifecycleAction::Finalize),
            vec![MarketStatus::Resolved, MarketStatus::Disputed]
        );
    }

    #[test]
    fn test_entry_source_text() {
        for source in EntrySource::ALL {
            assert_eq!(source.as_str().parse::<EntrySource>().unwrap(), source);
        }
        assert_eq!(EntrySource::WinPayout.to_string(), "WIN_PAYOUT");
    }

    #[test]
    fn test_pool_totals() {
        let pools = PoolTotals { yes: 100, no: 500 };
        assert_eq!(pools.total(), 600);
        assert_eq!(pools.for_outcome(Outcome::No), 500);
    }
}
