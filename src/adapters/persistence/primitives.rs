//! Ledger Primitives - Row-level Reads and Writes
//!
//! Every function takes a `&mut SqliteConnection` so callers decide the
//! transaction boundary: pass `&mut tx` to compose several primitives
//! atomically, or a pooled connection for a standalone read.
//!
//! State-changing writes are conditional (`WHERE status IN (..)`,
//! `WHERE balance >= ?`) and report whether they applied. A `false`
//! means another transaction won the race; the caller maps that to the
//! matching state-conflict error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::error::SettlementError;
use crate::domain::market::{
    Account, AccountId, Dispute, EntrySource, LedgerEntry, LifecycleAction, Market, MarketId,
    MarketStatus, Outcome, PoolTotals, Units, Wager,
};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

const ACCOUNT_COLUMNS: &str = "id, name, balance, created_at";
const MARKET_COLUMNS: &str =
    "id, question, creator_id, deadline, status, outcome, resolved_at, created_at";
const WAGER_COLUMNS: &str = "id, account_id, market_id, outcome, amount, placed_at";
const LEDGER_COLUMNS: &str = "id, account_id, market_id, amount, source, description, created_at";
const DISPUTE_COLUMNS: &str = "id, market_id, account_id, reason, created_at";

// ────────────────────────────────────────────
// Error and timestamp mapping
// ────────────────────────────────────────────

/// Whether the store failed because of contention rather than a fault.
///
/// SQLite reports lock contention and snapshot conflicts as (extended)
/// `SQLITE_BUSY` / `SQLITE_LOCKED`; the low byte is the primary code.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
        _ => false,
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(err: sqlx::Error) -> Self {
        if is_transient(&err) {
            Self::Transient(Box::new(err))
        } else {
            Self::Internal(Box::new(err))
        }
    }
}

/// Timestamps are stored as Unix milliseconds.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, SettlementError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SettlementError::Internal(format!("timestamp {ms} out of range").into()))
}

fn status_list(statuses: &[MarketStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

// ────────────────────────────────────────────
// Row mapping
// ────────────────────────────────────────────

fn account_from_row(row: &SqliteRow) -> Result<Account, SettlementError> {
    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        balance: row.try_get("balance")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn market_from_row(row: &SqliteRow) -> Result<Market, SettlementError> {
    let status: String = row.try_get("status")?;
    let outcome: Option<String> = row.try_get("outcome")?;
    let resolved_at: Option<i64> = row.try_get("resolved_at")?;

    Ok(Market {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        creator_id: row.try_get("creator_id")?,
        deadline: from_millis(row.try_get("deadline")?)?,
        status: status.parse()?,
        outcome: outcome.as_deref().map(str::parse::<Outcome>).transpose()?,
        resolved_at: resolved_at.map(from_millis).transpose()?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn wager_from_row(row: &SqliteRow) -> Result<Wager, SettlementError> {
    let outcome: String = row.try_get("outcome")?;
    Ok(Wager {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        market_id: row.try_get("market_id")?,
        outcome: outcome.parse()?,
        amount: row.try_get("amount")?,
        placed_at: from_millis(row.try_get("placed_at")?)?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, SettlementError> {
    let source: String = row.try_get("source")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        market_id: row.try_get("market_id")?,
        amount: row.try_get("amount")?,
        source: source.parse()?,
        description: row.try_get("description")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn dispute_from_row(row: &SqliteRow) -> Result<Dispute, SettlementError> {
    Ok(Dispute {
        id: row.try_get("id")?,
        market_id: row.try_get("market_id")?,
        account_id: row.try_get("account_id")?,
        reason: row.try_get("reason")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

// ────────────────────────────────────────────
// Accounts and ledger
// ────────────────────────────────────────────

/// A ledger line waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub account_id: AccountId,
    pub market_id: Option<MarketId>,
    pub amount: Units,
    pub source: EntrySource,
    pub description: &'a str,
}

/// An account whose balance disagrees with its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceDiscrepancy {
    pub account_id: AccountId,
    pub balance: Units,
    pub ledger_sum: Units,
}

pub async fn insert_account(
    conn: &mut SqliteConnection,
    name: &str,
    now: DateTime<Utc>,
) -> Result<AccountId, SettlementError> {
    let result = sqlx::query("INSERT INTO accounts (name, balance, created_at) VALUES (?, 0, ?)")
        .bind(name)
        .bind(to_millis(now))
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn fetch_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Option<Account>, SettlementError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(account_from_row).transpose()
}

pub async fn account_balance(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Option<Units>, SettlementError> {
    let row = sqlx::query("SELECT balance FROM accounts WHERE id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.try_get::<Units, _>("balance")).transpose()?)
}

/// Add `amount` to the balance. Fails with `AccountNotFound` if missing.
pub async fn credit_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    amount: Units,
) -> Result<(), SettlementError> {
    let result = sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ?")
        .bind(amount)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(SettlementError::AccountNotFound(account_id));
    }
    Ok(())
}

/// Credit `amount` only if the balance is exactly zero.
pub async fn credit_if_empty(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    amount: Units,
) -> Result<bool, SettlementError> {
    let result = sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = ? AND balance = 0")
        .bind(amount)
        .bind(account_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Subtract `amount` only if the balance covers it.
pub async fn debit_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    amount: Units,
) -> Result<bool, SettlementError> {
    let result =
        sqlx::query("UPDATE accounts SET balance = balance - ? WHERE id = ? AND balance >= ?")
            .bind(amount)
            .bind(account_id)
            .bind(amount)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn append_entry(
    conn: &mut SqliteConnection,
    entry: &NewEntry<'_>,
    now: DateTime<Utc>,
) -> Result<i64, SettlementError> {
    let result = sqlx::query(
        "INSERT INTO ledger_entries (account_id, market_id, amount, source, description, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.account_id)
    .bind(entry.market_id)
    .bind(entry.amount)
    .bind(entry.source.as_str())
    .bind(entry.description)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn ledger_for_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Vec<LedgerEntry>, SettlementError> {
    let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE account_id = ? ORDER BY id");
    let rows = sqlx::query(&sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(entry_from_row).collect()
}

/// Ledger entries tied to a market, optionally filtered by source.
pub async fn ledger_for_market(
    conn: &mut SqliteConnection,
    market_id: MarketId,
    source: Option<EntrySource>,
) -> Result<Vec<LedgerEntry>, SettlementError> {
    let sql = format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries
         WHERE market_id = ? AND (? IS NULL OR source = ?) ORDER BY id"
    );
    let source = source.map(EntrySource::as_str);
    let rows = sqlx::query(&sql)
        .bind(market_id)
        .bind(source)
        .bind(source)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(entry_from_row).collect()
}

/// Accounts whose balance differs from the sum of their ledger entries.
pub async fn conservation_violations(
    conn: &mut SqliteConnection,
) -> Result<Vec<BalanceDiscrepancy>, SettlementError> {
    let rows = sqlx::query(
        "SELECT a.id AS account_id, a.balance AS balance, COALESCE(SUM(l.amount), 0) AS ledger_sum
         FROM accounts a
         LEFT JOIN ledger_entries l ON l.account_id = a.id
         GROUP BY a.id, a.balance
         HAVING a.balance <> COALESCE(SUM(l.amount), 0)
         ORDER BY a.id",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<BalanceDiscrepancy, SettlementError> {
            Ok(BalanceDiscrepancy {
                account_id: row.try_get("account_id")?,
                balance: row.try_get("balance")?,
                ledger_sum: row.try_get("ledger_sum")?,
            })
        })
        .collect()
}

// ────────────────────────────────────────────
// Markets
// ────────────────────────────────────────────

pub async fn insert_market(
    conn: &mut SqliteConnection,
    creator_id: AccountId,
    question: &str,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Market, SettlementError> {
    let result = sqlx::query(
        "INSERT INTO markets (question, creator_id, deadline, status, created_at)
         VALUES (?, ?, ?, 'ACTIVE', ?)",
    )
    .bind(question)
    .bind(creator_id)
    .bind(to_millis(deadline))
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;

    let market_id = result.last_insert_rowid();
    fetch_market(conn, market_id)
        .await?
        .ok_or(SettlementError::MarketNotFound(market_id))
}

pub async fn fetch_market(
    conn: &mut SqliteConnection,
    market_id: MarketId,
) -> Result<Option<Market>, SettlementError> {
    let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE id = ?");
    let row = sqlx::query(&sql)
        .bind(market_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(market_from_row).transpose()
}

pub async fn markets_by_status(
    conn: &mut SqliteConnection,
    status: MarketStatus,
) -> Result<Vec<Market>, SettlementError> {
    let sql = format!("SELECT {MARKET_COLUMNS} FROM markets WHERE status = ? ORDER BY id");
    let rows = sqlx::query(&sql)
        .bind(status.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(market_from_row).collect()
}

/// ACTIVE markets whose deadline is at or before `now`.
pub async fn pending_auto_lock(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<MarketId>, SettlementError> {
    let rows = sqlx::query(
        "SELECT id FROM markets WHERE status = 'ACTIVE' AND deadline <= ? ORDER BY id",
    )
    .bind(to_millis(now))
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .iter()
        .map(|row| row.try_get::<MarketId, _>("id"))
        .collect::<Result<_, _>>()?)
}

/// RESOLVED markets declared at or before `cutoff`. DISPUTED markets are
/// never returned.
pub async fn pending_auto_finalize(
    conn: &mut SqliteConnection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<MarketId>, SettlementError> {
    let rows = sqlx::query(
        "SELECT id FROM markets WHERE status = 'RESOLVED' AND resolved_at <= ? ORDER BY id",
    )
    .bind(to_millis(cutoff))
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows
        .iter()
        .map(|row| row.try_get::<MarketId, _>("id"))
        .collect::<Result<_, _>>()?)
}

/// Lock every expired ACTIVE market in one statement. Returns the markets
/// that were locked, already carrying their new status.
pub async fn lock_expired(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<Vec<Market>, SettlementError> {
    let sql = format!(
        "SELECT {MARKET_COLUMNS} FROM markets WHERE status = 'ACTIVE' AND deadline <= ? ORDER BY id"
    );
    let rows = sqlx::query(&sql)
        .bind(to_millis(now))
        .fetch_all(&mut *conn)
        .await?;
    let mut markets = rows
        .iter()
        .map(market_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    if markets.is_empty() {
        return Ok(markets);
    }

    let result =
        sqlx::query("UPDATE markets SET status = 'LOCKED' WHERE status = 'ACTIVE' AND deadline <= ?")
            .bind(to_millis(now))
            .execute(&mut *conn)
            .await?;

    if usize::try_from(result.rows_affected()).ok() != Some(markets.len()) {
        return Err(SettlementError::Internal(
            format!(
                "bulk lock touched {} rows, expected {}",
                result.rows_affected(),
                markets.len()
            )
            .into(),
        ));
    }

    for market in &mut markets {
        market.status = MarketStatus::Locked;
    }
    Ok(markets)
}

/// Move a market to `action.target()` if it is in a legal source status.
/// Outcome and resolution timestamp are left untouched.
pub async fn apply_status(
    conn: &mut SqliteConnection,
    market_id: MarketId,
    action: LifecycleAction,
) -> Result<bool, SettlementError> {
    let sql = format!(
        "UPDATE markets SET status = ? WHERE id = ? AND status IN ({})",
        status_list(&MarketStatus::sources_for(action))
    );
    let result = sqlx::query(&sql)
        .bind(action.target().as_str())
        .bind(market_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Move a market to `action.target()` and stamp outcome + resolution time,
/// if it is in a legal source status.
pub async fn apply_outcome(
    conn: &mut SqliteConnection,
    market_id: MarketId,
    action: LifecycleAction,
    outcome: Outcome,
    at: DateTime<Utc>,
) -> Result<bool, SettlementError> {
    let sql = format!(
        "UPDATE markets SET status = ?, outcome = ?, resolved_at = ? WHERE id = ? AND status IN ({})",
        status_list(&MarketStatus::sources_for(action))
    );
    let result = sqlx::query(&sql)
        .bind(action.target().as_str())
        .bind(outcome.as_str())
        .bind(to_millis(at))
        .bind(market_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

// ────────────────────────────────────────────
// Wagers
// ────────────────────────────────────────────

pub async fn insert_wager(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    market_id: MarketId,
    outcome: Outcome,
    amount: Units,
    now: DateTime<Utc>,
) -> Result<Wager, SettlementError> {
    let result = sqlx::query(
        "INSERT INTO wagers (account_id, market_id, outcome, amount, placed_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(account_id)
    .bind(market_id)
    .bind(outcome.as_str())
    .bind(amount)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;

    Ok(Wager {
        id: result.last_insert_rowid(),
        account_id,
        market_id,
        outcome,
        amount,
        placed_at: from_millis(to_millis(now))?,
    })
}

pub async fn wagers_for_market(
    conn: &mut SqliteConnection,
    market_id: MarketId,
) -> Result<Vec<Wager>, SettlementError> {
    let sql = format!("SELECT {WAGER_COLUMNS} FROM wagers WHERE market_id = ? ORDER BY id");
    let rows = sqlx::query(&sql)
        .bind(market_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(wager_from_row).collect()
}

pub async fn pool_totals(
    conn: &mut SqliteConnection,
    market_id: MarketId,
) -> Result<PoolTotals, SettlementError> {
    let row = sqlx::query(
        "SELECT
            COALESCE(SUM(CASE WHEN outcome = 'YES' THEN amount END), 0) AS yes_total,
            COALESCE(SUM(CASE WHEN outcome = 'NO' THEN amount END), 0) AS no_total
         FROM wagers WHERE market_id = ?",
    )
    .bind(market_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(PoolTotals {
        yes: row.try_get("yes_total")?,
        no: row.try_get("no_total")?,
    })
}

// ────────────────────────────────────────────
// Disputes
// ────────────────────────────────────────────

pub async fn insert_dispute(
    conn: &mut SqliteConnection,
    market_id: MarketId,
    account_id: AccountId,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Dispute, SettlementError> {
    let result = sqlx::query(
        "INSERT INTO disputes (market_id, account_id, reason, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(market_id)
    .bind(account_id)
    .bind(reason)
    .bind(to_millis(now))
    .execute(&mut *conn)
    .await?;

    Ok(Dispute {
        id: result.last_insert_rowid(),
        market_id,
        account_id,
        reason: reason.map(str::to_string),
        created_at: from_millis(to_millis(now))?,
    })
}

pub async fn disputes_for_market(
    conn: &mut SqliteConnection,
    market_id: MarketId,
) -> Result<Vec<Dispute>, SettlementError> {
    let sql = format!("SELECT {DISPUTE_COLUMNS} FROM disputes WHERE market_id = ? ORDER BY id");
    let rows = sqlx::query(&sql)
        .bind(market_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(dispute_from_row).collect()
}
