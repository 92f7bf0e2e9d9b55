//! Account Service - Grants, Statements and the Conservation Audit
//!
//! Every balance change pairs with a ledger line in the same
//! transaction, so `balance == Σ ledger` holds for every account.
//! `audit_conservation` checks exactly that.

use serde::Serialize;
use tracing::{error, info, instrument};

use crate::adapters::persistence::primitives::{self, NewEntry};
use crate::adapters::persistence::BalanceDiscrepancy;
use crate::config::AccountsConfig;
use crate::domain::error::SettlementError;
use crate::domain::market::{Account, AccountId, EntrySource, LedgerEntry, Units};

use super::context::ServiceContext;

/// An account with its full ledger history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatement {
  pub account: Account,
  pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Clone)]
pub struct AccountService {
  ctx: ServiceContext,
  welcome_bonus: Units,
  bailout_amount: Units,
}

impl AccountService {
  pub fn new(ctx: ServiceContext, config: &AccountsConfig) -> Self {
    Self {
      ctx,
      welcome_bonus: config.welcome_bonus.max(0),
      bailout_amount: config.bailout_amount,
    }
  }

  /// Create an account and grant the welcome bonus, if any.
  #[instrument(skip(self))]
  pub async fn open_account(&self, name: &str) -> Result<Account, SettlementError> {
    let result = self
      .ctx
      .retry
      .run("open_account", move || self.try_open(name))
      .await;
    self.ctx.record_rejection("open_account", &result);

    if let Ok(account) = &result {
      info!(account_id = account.id, balance = account.balance, "Account opened");
    }
    result
  }

  async fn try_open(&self, name: &str) -> Result<Account, SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;

    let account_id = primitives::insert_account(&mut tx, name, now).await?;
    if self.welcome_bonus > 0 {
      primitives::credit_account(&mut tx, account_id, self.welcome_bonus).await?;
      primitives::append_entry(
        &mut tx,
        &NewEntry {
          account_id,
          market_id: None,
          amount: self.welcome_bonus,
          source: EntrySource::Welcome,
          description: "welcome bonus",
        },
        now,
      )
      .await?;
    }

    let account = primitives::fetch_account(&mut tx, account_id)
      .await?
      .ok_or(SettlementError::AccountNotFound(account_id))?;
    tx.commit().await?;
    Ok(account)
  }

  /// Top up a broke account.
  ///
  /// # Errors
  /// `AccountNotFound`, or `BailoutNotEligible` unless the balance is
  /// exactly zero.
  #[instrument(skip(self))]
  pub async fn claim_bailout(&self, account_id: AccountId) -> Result<Account, SettlementError> {
    let result = self
      .ctx
      .retry
      .run("claim_bailout", move || self.try_bailout(account_id))
      .await;
    self.ctx.record_rejection("claim_bailout", &result);

    if let Ok(account) = &result {
      info!(account_id, balance = account.balance, "Bailout granted");
    }
    result
  }

  async fn try_bailout(&self, account_id: AccountId) -> Result<Account, SettlementError> {
    let now = self.ctx.clock.now();
    let mut tx = self.ctx.store.begin().await?;

    let balance = primitives::account_balance(&mut tx, account_id)
      .await?
      .ok_or(SettlementError::AccountNotFound(account_id))?;
    if balance != 0 || !primitives::credit_if_empty(&mut tx, account_id, self.bailout_amount).await? {
      return Err(SettlementError::BailoutNotEligible {
        account_id,
        balance,
      });
    }
    primitives::append_entry(
      &mut tx,
      &NewEntry {
        account_id,
        market_id: None,
        amount: self.bailout_amount,
        source: EntrySource::Bailout,
        description: "bailout",
      },
      now,
    )
    .await?;

    let account = primitives::fetch_account(&mut tx, account_id)
      .await?
      .ok_or(SettlementError::AccountNotFound(account_id))?;
    tx.commit().await?;
    Ok(account)
  }

  /// Account plus every ledger entry, oldest first.
  pub async fn statement(&self, account_id: AccountId) -> Result<AccountStatement, SettlementError> {
    let mut conn = self.ctx.store.begin().await?;
    let account = primitives::fetch_account(&mut conn, account_id)
      .await?
      .ok_or(SettlementError::AccountNotFound(account_id))?;
    let entries = primitives::ledger_for_account(&mut conn, account_id).await?;
    conn.commit().await?;
    Ok(AccountStatement { account, entries })
  }

  /// Accounts whose balance differs from their ledger sum. Any result
  /// other than empty is a bug and is logged as an error.
  #[instrument(skip(self))]
  pub async fn audit_conservation(&self) -> Result<Vec<BalanceDiscrepancy>, SettlementError> {
    let violations = self.ctx.store.conservation_violations().await?;
    for v in &violations {
      error!(
        account_id = v.account_id,
        balance = v.balance,
        ledger_sum = v.ledger_sum,
        "Balance does not match ledger"
      );
    }
    Ok(violations)
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::domain::market::Outcome;
  use crate::usecases::test_support::Harness;

  #[tokio::test]
  async fn test_open_account_grants_welcome() {
    let h = Harness::new().await;
    let account = h.accounts.open_account("alice").await.unwrap();
    assert_eq!(account.balance, 1_000);

    let statement = h.accounts.statement(account.id).await.unwrap();
    assert_eq!(statement.entries.len(), 1);
    assert_eq!(statement.entries[0].source, EntrySource::Welcome);
    assert_eq!(statement.entries[0].amount, 1_000);
    assert!(h.accounts.audit_conservation().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_bailout_only_when_broke() {
    let h = Harness::new().await;
    let alice = h.funded_account("alice", 30).await;
    let market = h.open_market(alice, Duration::hours(1)).await;

    let err = h.accounts.claim_bailout(alice).await.unwrap_err();
    assert!(matches!(
      err,
      SettlementError::BailoutNotEligible { balance: 30, .. }
    ));

    h.bet(alice, market.id, Outcome::Yes, 30).await;
    let account = h.accounts.claim_bailout(alice).await.unwrap();
    assert_eq!(account.balance, 100);

    let statement = h.accounts.statement(alice).await.unwrap();
    let sources: Vec<_> = statement.entries.iter().map(|e| e.source).collect();
    assert_eq!(
      sources,
      vec![EntrySource::Welcome, EntrySource::WagerPlaced, EntrySource::Bailout]
    );
    assert!(h.accounts.audit_conservation().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unknown_account() {
    let h = Harness::new().await;
    assert!(matches!(
      h.accounts.claim_bailout(42).await.unwrap_err(),
      SettlementError::AccountNotFound(42)
    ));
    assert!(matches!(
      h.accounts.statement(42).await.unwrap_err(),
      SettlementError::AccountNotFound(42)
    ));
  }

  #[tokio::test]
  async fn test_audit_flags_tampering() {
    let h = Harness::new().await;
    let alice = h.funded_account("alice", 10).await;
    sqlx::query("UPDATE accounts SET balance = balance + 5 WHERE id = ?")
      .bind(alice)
      .execute(h.ctx.store.pool())
      .await
      .unwrap();

    let violations = h.accounts.audit_conservation().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].balance, 15);
    assert_eq!(violations[0].ledger_sum, 10);
  }
}
