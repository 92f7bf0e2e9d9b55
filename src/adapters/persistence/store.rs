//! Ledger Store - Pooled SQLite Handle
//!
//! Owns the connection pool and hands out transactions. Usecases open a
//! transaction with `begin()`, compose `primitives` on it, and commit.
//! Read-only helpers acquire a pooled connection for a single query.
//!
//! SQLite serializes writers, so every transaction is serializable.
//! Contention surfaces as `SettlementError::Transient`.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};
use tracing::{info, instrument, warn};

use super::primitives::{self, BalanceDiscrepancy};
use super::schema;
use crate::config::DatabaseConfig;
use crate::domain::error::SettlementError;
use crate::domain::market::{
    Account, AccountId, Dispute, EntrySource, LedgerEntry, Market, MarketId, MarketStatus,
    PoolTotals, Wager,
};

/// Shared handle to the ledger database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (creating if needed) the database described by `config` and
    /// apply the schema.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SettlementError> {
        let in_memory = config.url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));
        if !in_memory {
            if let Some(dir) = options.get_filename().parent().filter(|d| !d.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| SettlementError::Internal(Box::new(e)))?;
            }
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // An in-memory database lives and dies with its one connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(config.max_connections)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect_with(options)
            .await?;

        schema::migrate(&pool).await?;

        info!(
            in_memory,
            max_connections = pool.options().get_max_connections(),
            "Ledger store connected"
        );
        Ok(Self { pool })
    }

    /// Private in-memory store, mostly for tests.
    pub async fn in_memory() -> Result<Self, SettlementError> {
        Self::connect(&DatabaseConfig::in_memory()).await
    }

    /// Start a transaction. Dropping it without `commit()` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, SettlementError> {
        Ok(self.pool.begin().await?)
    }

    /// Underlying pool, for maintenance queries.
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn conn(&self) -> Result<PoolConnection<Sqlite>, SettlementError> {
        Ok(self.pool.acquire().await?)
    }

    /// Check the database answers a trivial query.
    pub async fn is_healthy(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Ledger store health check failed");
                false
            }
        }
    }

    /// Close all connections, waiting for checked-out ones to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ── Read-only queries ───────────────────────────────────

    pub async fn account(&self, account_id: AccountId) -> Result<Option<Account>, SettlementError> {
        primitives::fetch_account(&mut *self.conn().await?, account_id).await
    }

    pub async fn market(&self, market_id: MarketId) -> Result<Option<Market>, SettlementError> {
        primitives::fetch_market(&mut *self.conn().await?, market_id).await
    }

    pub async fn markets_by_status(
        &self,
        status: MarketStatus,
    ) -> Result<Vec<Market>, SettlementError> {
        primitives::markets_by_status(&mut *self.conn().await?, status).await
    }

    pub async fn wagers_for_market(&self, market_id: MarketId) -> Result<Vec<Wager>, SettlementError> {
        primitives::wagers_for_market(&mut *self.conn().await?, market_id).await
    }

    /// Sum of wagers per outcome, recomputed on every call.
    pub async fn pool_totals(&self, market_id: MarketId) -> Result<PoolTotals, SettlementError> {
        primitives::pool_totals(&mut *self.conn().await?, market_id).await
    }

    pub async fn ledger_for_account(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<LedgerEntry>, SettlementError> {
        primitives::ledger_for_account(&mut *self.conn().await?, account_id).await
    }

    pub async fn ledger_for_market(
        &self,
        market_id: MarketId,
        source: Option<EntrySource>,
    ) -> Result<Vec<LedgerEntry>, SettlementError> {
        primitives::ledger_for_market(&mut *self.conn().await?, market_id, source).await
    }

    pub async fn disputes_for_market(
        &self,
        market_id: MarketId,
    ) -> Result<Vec<Dispute>, SettlementError> {
        primitives::disputes_for_market(&mut *self.conn().await?, market_id).await
    }

    /// ACTIVE markets whose deadline has passed at `now`.
    pub async fn pending_auto_lock(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketId>, SettlementError> {
        primitives::pending_auto_lock(&mut *self.conn().await?, now).await
    }

    /// RESOLVED markets whose dispute window has elapsed at `now`.
    pub async fn pending_auto_finalize(
        &self,
        now: DateTime<Utc>,
        dispute_window: chrono::Duration,
    ) -> Result<Vec<MarketId>, SettlementError> {
        // A window reaching past the representable range means nothing is due.
        let Some(cutoff) = now.checked_sub_signed(dispute_window) else {
            return Ok(Vec::new());
        };
        primitives::pending_auto_finalize(&mut *self.conn().await?, cutoff).await
    }

    /// Accounts whose balance differs from their ledger. Empty when the
    /// books balance.
    pub async fn conservation_violations(&self) -> Result<Vec<BalanceDiscrepancy>, SettlementError> {
        primitives::conservation_violations(&mut *self.conn().await?).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::domain::market::Outcome;
    use crate::domain::market::LifecycleAction;
    use crate::adapters::persistence::primitives::NewEntry;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    async fn seeded() -> (LedgerStore, AccountId, Market) {
        let store = LedgerStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let alice = primitives::insert_account(&mut tx, "alice", t0()).await.unwrap();
        let market = primitives::insert_market(&mut tx, alice, "Rain tomorrow?", t0() + Duration::hours(1), t0())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (store, alice, market)
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let store = LedgerStore::in_memory().await.unwrap();
        schema::migrate(&store.pool).await.unwrap();
        assert!(store.is_healthy().await);
    }

    #[tokio::test]
    async fn test_market_round_trip() {
        let (store, alice, market) = seeded().await;
        let loaded = store.market(market.id).await.unwrap().unwrap();
        assert_eq!(loaded, market);
        assert_eq!(loaded.creator_id, alice);
        assert_eq!(loaded.status, MarketStatus::Active);
        assert_eq!(loaded.outcome, None);
        assert_eq!(loaded.deadline, t0() + Duration::hours(1));
        assert!(store.market(market.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_debit_refuses_overdraft() {
        let (store, alice, _) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        primitives::credit_account(&mut tx, alice, 50).await.unwrap();
        assert!(!primitives::debit_account(&mut tx, alice, 51).await.unwrap());
        assert!(primitives::debit_account(&mut tx, alice, 50).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.account(alice).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_credit_unknown_account() {
        let (store, _, _) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let err = primitives::credit_account(&mut tx, 999, 10).await.unwrap_err();
        assert!(matches!(err, SettlementError::AccountNotFound(999)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let (store, alice, _) = seeded().await;
        {
            let mut tx = store.begin().await.unwrap();
            primitives::credit_account(&mut tx, alice, 500).await.unwrap();
        }
        assert_eq!(store.account(alice).await.unwrap().unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_schema_rejects_outcome_without_resolution() {
        let (store, _, market) = seeded().await;
        let result = sqlx::query("UPDATE markets SET status = 'RESOLVED' WHERE id = ?")
            .bind(market.id)
            .execute(&store.pool)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_conditional_outcome_update() {
        let (store, _, market) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        assert!(
            primitives::apply_outcome(&mut tx, market.id, LifecycleAction::Resolve, Outcome::Yes, t0())
                .await
                .unwrap()
        );
        // Already RESOLVED: a second declaration does not apply.
        assert!(
            !primitives::apply_outcome(&mut tx, market.id, LifecycleAction::Resolve, Outcome::No, t0())
                .await
                .unwrap()
        );
        tx.commit().await.unwrap();

        let loaded = store.market(market.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, MarketStatus::Resolved);
        assert_eq!(loaded.outcome, Some(Outcome::Yes));
        assert_eq!(loaded.resolved_at, Some(t0()));
    }

    #[tokio::test]
    async fn test_pending_auto_finalize_respects_window() {
        let (store, _, market) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        primitives::apply_outcome(&mut tx, market.id, LifecycleAction::Resolve, Outcome::No, t0())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let window = Duration::hours(24);
        assert!(store.pending_auto_finalize(t0() + Duration::hours(23), window).await.unwrap().is_empty());
        assert_eq!(
            store.pending_auto_finalize(t0() + window, window).await.unwrap(),
            vec![market.id]
        );

        // Cutoff before the earliest representable instant: nothing is due.
        let huge = Duration::seconds(9_000_000_000_000);
        assert!(store.pending_auto_finalize(t0(), huge).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_expired_is_bulk_and_selective() {
        let (store, alice, expired) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let open = primitives::insert_market(&mut tx, alice, "Later?", t0() + Duration::days(1), t0())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let now = t0() + Duration::hours(2);
        assert_eq!(store.pending_auto_lock(now).await.unwrap(), vec![expired.id]);

        let mut tx = store.begin().await.unwrap();
        let locked = primitives::lock_expired(&mut tx, now).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].id, expired.id);
        assert_eq!(locked[0].status, MarketStatus::Locked);
        assert_eq!(
            store.market(open.id).await.unwrap().unwrap().status,
            MarketStatus::Active
        );
        assert!(store.pending_auto_lock(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pool_totals_and_ledger_sum() {
        let (store, alice, market) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        primitives::insert_wager(&mut tx, alice, market.id, Outcome::Yes, 30, t0()).await.unwrap();
        primitives::insert_wager(&mut tx, alice, market.id, Outcome::Yes, 20, t0()).await.unwrap();
        primitives::insert_wager(&mut tx, alice, market.id, Outcome::No, 5, t0()).await.unwrap();
        primitives::append_entry(
            &mut tx,
            &NewEntry {
                account_id: alice,
                market_id: None,
                amount: 40,
                source: EntrySource::Welcome,
                description: "welcome",
            },
            t0(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.pool_totals(market.id).await.unwrap(), PoolTotals { yes: 50, no: 5 });
        assert_eq!(store.pool_totals(market.id + 1).await.unwrap(), PoolTotals::default());

        // Balance is 0 but the ledger says 40: the audit must catch it.
        let violations = store.conservation_violations().await.unwrap();
        assert_eq!(
            violations,
            vec![BalanceDiscrepancy {
                account_id: alice,
                balance: 0,
                ledger_sum: 40,
            }]
        );
    }
}
