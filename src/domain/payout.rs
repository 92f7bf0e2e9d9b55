//! Parimutuel payout arithmetic.
//!
//! All wagers on a market form one pool. Winners split the whole pool in
//! proportion to their stake:
//!
//! ```text
//! payout = floor(stake × total_pool / winning_pool)
//! ```
//!
//! Arithmetic is integer-only (widened to `i128`) so results are exact and
//! reproducible. Floor division can strand a few units per market; that
//! remainder is reported, not redistributed. When nobody backed the winning
//! side every stake is returned unchanged.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::market::{AccountId, EntrySource, Outcome, Units, Wager, WagerId};

/// What happens to a single wager at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerResult {
    /// Backed the winning side. `payout` includes the returned stake.
    Won { payout: Units },
    /// Backed the losing side. No credit, no ledger entry.
    Lost,
    /// Winning pool was empty. Stake returned in full.
    Refunded,
}

/// Settlement decision for one wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerSettlement {
    pub wager_id: WagerId,
    pub account_id: AccountId,
    pub outcome: Outcome,
    pub stake: Units,
    pub result: WagerResult,
}

impl WagerSettlement {
    /// Units credited back to the account.
    pub const fn credit(&self) -> Units {
        match self.result {
            WagerResult::Won { payout } => payout,
            WagerResult::Refunded => self.stake,
            WagerResult::Lost => 0,
        }
    }

    /// Net change relative to the stake already debited at placement.
    pub const fn profit(&self) -> Units {
        self.credit() - self.stake
    }

    /// Ledger classification of the credit, if any.
    pub const fn entry_source(&self) -> Option<EntrySource> {
        match self.result {
            WagerResult::Won { .. } => Some(EntrySource::WinPayout),
            WagerResult::Refunded => Some(EntrySource::Refund),
            WagerResult::Lost => None,
        }
    }
}

/// Full settlement plan for a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    pub outcome: Outcome,
    pub total_pool: Units,
    pub winning_pool: Units,
    pub settlements: Vec<WagerSettlement>,
}

impl SettlementPlan {
    /// True when the winning side was empty and every stake is returned.
    pub const fn is_refund(&self) -> bool {
        self.winning_pool == 0
    }

    /// Settlements that move money.
    pub fn credits(&self) -> impl Iterator<Item = &WagerSettlement> {
        self.settlements.iter().filter(|s| s.credit() > 0)
    }

    /// Sum of all credits.
    pub fn total_credited(&self) -> Units {
        self.settlements.iter().map(WagerSettlement::credit).sum()
    }

    /// Units left undistributed by floor division.
    pub fn remainder(&self) -> Units {
        self.total_pool - self.total_credited()
    }

    /// Number of distinct accounts receiving a credit.
    pub fn accounts_credited(&self) -> usize {
        self.credits()
            .map(|s| s.account_id)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

/// Proportional share of the pool for one winning stake.
///
/// `stake <= winning_pool <= total_pool` bounds the quotient by
/// `total_pool`, so the saturating conversion never triggers for real pools.
pub fn proportional_payout(stake: Units, total_pool: Units, winning_pool: Units) -> Units {
    debug_assert!(winning_pool > 0, "payout requires a non-empty winning pool");
    let share = i128::from(stake) * i128::from(total_pool) / i128::from(winning_pool);
    Units::try_from(share).unwrap_or(Units::MAX)
}

/// Build the settlement plan for `wagers` resolved as `outcome`.
pub fn plan_settlement(wagers: &[Wager], outcome: Outcome) -> SettlementPlan {
    let total_pool: Units = wagers.iter().map(|w| w.amount).sum();
    let winning_pool: Units = wagers
        .iter()
        .filter(|w| w.outcome == outcome)
        .map(|w| w.amount)
        .sum();

    let settlements = wagers
        .iter()
        .map(|w| {
            let result = if winning_pool == 0 {
                WagerResult::Refunded
            } else if w.outcome == outcome {
                WagerResult::Won {
                    payout: proportional_payout(w.amount, total_pool, winning_pool),
                }
            } else {
                WagerResult::Lost
            };
            WagerSettlement {
                wager_id: w.id,
                account_id: w.account_id,
                outcome: w.outcome,
                stake: w.amount,
                result,
            }
        })
        .collect();

    SettlementPlan {
        outcome,
        total_pool,
        winning_pool,
        settlements,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn wager(id: WagerId, account_id: AccountId, outcome: Outcome, amount: Units) -> Wager {
        Wager {
            id,
            account_id,
            market_id: 1,
            outcome,
            amount,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_even_pools_double_the_winner() {
        let plan = plan_settlement(
            &[wager(1, 10, Outcome::Yes, 100), wager(2, 20, Outcome::No, 100)],
            Outcome::Yes,
        );
        assert_eq!(plan.total_pool, 200);
        assert_eq!(plan.winning_pool, 100);
        assert_eq!(plan.settlements[0].result, WagerResult::Won { payout: 200 });
        assert_eq!(plan.settlements[0].profit(), 100);
        assert_eq!(plan.settlements[1].result, WagerResult::Lost);
        assert_eq!(plan.settlements[1].credit(), 0);
        assert_eq!(plan.accounts_credited(), 1);
        assert_eq!(plan.remainder(), 0);
    }

    #[test]
    fn test_uneven_pools() {
        let plan = plan_settlement(
            &[wager(1, 10, Outcome::Yes, 100), wager(2, 20, Outcome::No, 500)],
            Outcome::Yes,
        );
        assert_eq!(plan.settlements[0].credit(), 600);
        assert_eq!(plan.settlements[0].profit(), 500);
    }

    #[test]
    fn test_empty_winning_side_refunds_everyone() {
        let plan = plan_settlement(&[wager(1, 10, Outcome::Yes, 100)], Outcome::No);
        assert!(plan.is_refund());
        assert_eq!(plan.settlements[0].result, WagerResult::Refunded);
        assert_eq!(plan.settlements[0].credit(), 100);
        assert_eq!(plan.settlements[0].profit(), 0);
        assert_eq!(plan.settlements[0].entry_source(), Some(EntrySource::Refund));
        assert_eq!(plan.remainder(), 0);
    }

    #[test]
    fn test_floor_division_strands_remainder() {
        // 3 winners of 1 unit each share a pool of 10: 10/3 = 3 each, 1 stranded.
        let plan = plan_settlement(
            &[
                wager(1, 10, Outcome::Yes, 1),
                wager(2, 11, Outcome::Yes, 1),
                wager(3, 12, Outcome::Yes, 1),
                wager(4, 20, Outcome::No, 7),
            ],
            Outcome::Yes,
        );
        assert_eq!(plan.total_pool, 10);
        for s in plan.settlements.iter().take(3) {
            assert_eq!(s.credit(), 3);
        }
        assert_eq!(plan.total_credited(), 9);
        assert_eq!(plan.remainder(), 1);
    }

    #[test]
    fn test_multiple_wagers_same_account_count_once() {
        let plan = plan_settlement(
            &[
                wager(1, 10, Outcome::No, 50),
                wager(2, 10, Outcome::No, 25),
                wager(3, 20, Outcome::Yes, 75),
            ],
            Outcome::No,
        );
        assert_eq!(plan.settlements[0].credit(), 100);
        assert_eq!(plan.settlements[1].credit(), 50);
        assert_eq!(plan.accounts_credited(), 1);
    }

    #[test]
    fn test_no_wagers() {
        let plan = plan_settlement(&[], Outcome::Yes);
        assert!(plan.is_refund());
        assert!(plan.settlements.is_empty());
        assert_eq!(plan.accounts_credited(), 0);
    }

    #[test]
    fn test_large_amounts_do_not_overflow() {
        let big = Units::MAX / 4;
        let plan = plan_settlement(
            &[wager(1, 10, Outcome::Yes, big), wager(2, 20, Outcome::No, big)],
            Outcome::Yes,
        );
        assert_eq!(plan.settlements[0].credit(), big * 2);
    }
}
