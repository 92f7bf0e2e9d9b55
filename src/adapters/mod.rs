//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Concrete infrastructure behind the core: the SQLite ledger store,
//! the queued notifier, and the metrics/health HTTP surface.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics export and health checks
//! - `notify`: Bounded notification queue and log sink
//! - `persistence`: SQLite ledger store and transactional primitives

pub mod metrics;
pub mod notify;
pub mod persistence;
