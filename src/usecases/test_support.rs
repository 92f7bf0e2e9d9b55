//! Shared fixtures for the usecase unit tests.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::adapters::metrics::MetricsRegistry;
use crate::adapters::persistence::primitives::{self, NewEntry};
use crate::adapters::persistence::LedgerStore;
use crate::config::AccountsConfig;
use crate::domain::market::{AccountId, EntrySource, Market, MarketId, Outcome, Units};
use crate::ports::clock::ManualClock;
use crate::ports::notifier::{Notifier, NullNotifier};

use super::accounts::AccountService;
use super::context::ServiceContext;
use super::lifecycle::LifecycleController;
use super::retry::RetryPolicy;
use super::settlement::SettlementEngine;
use super::wager_placement::WagerService;

pub fn t0() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
  pub ctx: ServiceContext,
  pub clock: Arc<ManualClock>,
  pub wagers: WagerService,
  pub lifecycle: LifecycleController,
  pub settlement: SettlementEngine,
  pub accounts: AccountService,
}

impl Harness {
  pub async fn new() -> Self {
    Self::with_notifier(NullNotifier).await
  }

  pub async fn with_notifier<N: Notifier>(notifier: N) -> Self {
    let store = LedgerStore::in_memory().await.unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    let ctx = ServiceContext::new(
      store,
      clock.clone(),
      Arc::new(notifier),
      Arc::new(MetricsRegistry::new().unwrap()),
      RetryPolicy::none(),
    );
    let settlement = SettlementEngine::new(ctx.clone());
    Self {
      wagers: WagerService::new(ctx.clone()),
      lifecycle: LifecycleController::new(ctx.clone(), settlement.clone()),
      accounts: AccountService::new(ctx.clone(), &AccountsConfig::default()),
      settlement,
      clock,
      ctx,
    }
  }

  /// Account holding `amount`, backed by a matching WELCOME entry.
  pub async fn funded_account(&self, name: &str, amount: Units) -> AccountId {
    let mut tx = self.ctx.store.begin().await.unwrap();
    let id = primitives::insert_account(&mut tx, name, t0()).await.unwrap();
    if amount > 0 {
      primitives::credit_account(&mut tx, id, amount).await.unwrap();
      primitives::append_entry(
        &mut tx,
        &NewEntry {
          account_id: id,
          market_id: None,
          amount,
          source: EntrySource::Welcome,
          description: "test funding",
        },
        t0(),
      )
      .await
      .unwrap();
    }
    tx.commit().await.unwrap();
    id
  }

  /// ACTIVE market whose deadline is `open_for` after the current time.
  pub async fn open_market(&self, creator_id: AccountId, open_for: Duration) -> Market {
    let deadline = self.clock_now() + open_for;
    self
      .lifecycle
      .create_market(creator_id, "Will it rain tomorrow?", deadline)
      .await
      .unwrap()
  }

  pub async fn bet(&self, account_id: AccountId, market_id: MarketId, outcome: Outcome, amount: Units) {
    self
      .wagers
      .place_wager(account_id, market_id, outcome, amount)
      .await
      .unwrap();
  }

  pub async fn declare(&self, market_id: MarketId, creator_id: AccountId, outcome: Outcome) {
    self
      .lifecycle
      .declare_outcome(market_id, creator_id, outcome)
      .await
      .unwrap();
  }

  pub async fn balance(&self, account_id: AccountId) -> Units {
    self.ctx.store.account(account_id).await.unwrap().unwrap().balance
  }

  fn clock_now(&self) -> DateTime<Utc> {
    use crate::ports::clock::Clock;
    self.clock.now()
  }
}
