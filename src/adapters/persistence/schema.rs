//! Ledger Schema - Relations and Column Constraints
//!
//! The schema carries the invariants that must hold no matter which code
//! path writes: non-negative balances, positive wagers, closed status and
//! outcome vocabularies, and outcome presence tied to market status.
//! Business rules stay in the usecases layer.

use sqlx::SqlitePool;
use tracing::{info, instrument};

/// DDL statements, applied in order. Idempotent.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT    NOT NULL,
        balance     INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        created_at  INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS markets (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        question    TEXT    NOT NULL CHECK (length(trim(question)) > 0),
        creator_id  INTEGER NOT NULL REFERENCES accounts(id),
        deadline    INTEGER NOT NULL,
        status      TEXT    NOT NULL DEFAULT 'ACTIVE'
                    CHECK (status IN ('ACTIVE', 'LOCKED', 'RESOLVED', 'DISPUTED', 'FINALIZED')),
        outcome     TEXT    CHECK (outcome IN ('YES', 'NO')),
        resolved_at INTEGER,
        created_at  INTEGER NOT NULL,
        CHECK ((status IN ('RESOLVED', 'DISPUTED', 'FINALIZED')) = (outcome IS NOT NULL)),
        CHECK ((outcome IS NULL) = (resolved_at IS NULL))
    )",
    "CREATE INDEX IF NOT EXISTS idx_markets_status_deadline ON markets (status, deadline)",
    "CREATE INDEX IF NOT EXISTS idx_markets_status_resolved ON markets (status, resolved_at)",
    "CREATE TABLE IF NOT EXISTS wagers (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id  INTEGER NOT NULL REFERENCES accounts(id),
        market_id   INTEGER NOT NULL REFERENCES markets(id),
        outcome     TEXT    NOT NULL CHECK (outcome IN ('YES', 'NO')),
        amount      INTEGER NOT NULL CHECK (amount > 0),
        placed_at   INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_wagers_market ON wagers (market_id)",
    "CREATE INDEX IF NOT EXISTS idx_wagers_account ON wagers (account_id)",
    "CREATE TABLE IF NOT EXISTS ledger_entries (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        account_id  INTEGER NOT NULL REFERENCES accounts(id),
        market_id   INTEGER REFERENCES markets(id),
        amount      INTEGER NOT NULL,
        source      TEXT    NOT NULL
                    CHECK (source IN ('WELCOME', 'WAGER_PLACED', 'WIN_PAYOUT', 'REFUND', 'BAILOUT')),
        description TEXT    NOT NULL DEFAULT '',
        created_at  INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_ledger_account ON ledger_entries (account_id)",
    "CREATE INDEX IF NOT EXISTS idx_ledger_market_source ON ledger_entries (market_id, source)",
    "CREATE TABLE IF NOT EXISTS disputes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        market_id   INTEGER NOT NULL REFERENCES markets(id),
        account_id  INTEGER NOT NULL REFERENCES accounts(id),
        reason      TEXT,
        created_at  INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_disputes_market ON disputes (market_id)",
];

/// Create all relations and indexes if missing.
#[instrument(skip(pool))]
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(*statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "Ledger schema ready");
    Ok(())
}
