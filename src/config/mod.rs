//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`.
//! Grant sizes, scheduler cadence and the dispute window are
//! externalized here - nothing is hardcoded in the usecases layer.

pub mod loader;

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Longest accepted dispute window (ten years).
pub const MAX_DISPUTE_WINDOW_SECS: u64 = 10 * 365 * 86_400;

/// Longest accepted initial retry backoff.
pub const MAX_BASE_DELAY_MS: u64 = 60_000;

/// Top-level service configuration.
///
/// Loaded from `config.toml` at startup. Every section has defaults,
/// so an empty file is a valid (in-memory) configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  #[serde(default)]
  pub service: ServiceConfig,
  /// Ledger database.
  #[serde(default)]
  pub database: DatabaseConfig,
  /// Lifecycle scheduler cadence and dispute window.
  #[serde(default)]
  pub scheduler: SchedulerConfig,
  /// Account grants.
  #[serde(default)]
  pub accounts: AccountsConfig,
  /// Retry budget for transient store failures.
  #[serde(default)]
  pub retry: RetryConfig,
  /// Outbound notification queue.
  #[serde(default)]
  pub notifications: NotificationConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name, attached to the root span.
  #[serde(default = "default_service_name")]
  pub name: String,
  /// Log level used when `RUST_LOG` is unset.
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_service_name(),
      log_level: default_log_level(),
    }
  }
}

/// SQLite connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
  /// sqlx connection URL, e.g. `sqlite://data/ledger.db` or `sqlite::memory:`.
  #[serde(default = "default_database_url")]
  pub url: String,
  /// Pool size for file databases. In-memory databases always use one.
  #[serde(default = "default_max_connections")]
  pub max_connections: u32,
  /// How long SQLite waits on a locked database before reporting BUSY.
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms: u64,
  /// How long a caller waits for a pooled connection.
  #[serde(default = "default_acquire_timeout_ms")]
  pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
  /// Private in-memory database.
  pub fn in_memory() -> Self {
    Self {
      url: "sqlite::memory:".to_string(),
      ..Self::default()
    }
  }
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      url: default_database_url(),
      max_connections: default_max_connections(),
      busy_timeout_ms: default_busy_timeout_ms(),
      acquire_timeout_ms: default_acquire_timeout_ms(),
    }
  }
}

/// Lifecycle scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
  /// Seconds between scheduler ticks.
  #[serde(default = "default_tick_interval")]
  pub tick_interval_secs: u64,
  /// Seconds a RESOLVED market stays open to disputes.
  #[serde(default = "default_dispute_window")]
  pub dispute_window_secs: u64,
}

impl SchedulerConfig {
  pub const fn tick_interval(&self) -> Duration {
    Duration::from_secs(self.tick_interval_secs)
  }

  pub fn dispute_window(&self) -> anyhow::Result<chrono::Duration> {
    i64::try_from(self.dispute_window_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .with_context(|| format!("dispute window of {}s is out of range", self.dispute_window_secs))
  }
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      tick_interval_secs: default_tick_interval(),
      dispute_window_secs: default_dispute_window(),
    }
  }
}

/// Play-money grants.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
  /// Units granted when an account is opened. Zero disables the grant.
  #[serde(default = "default_welcome_bonus")]
  pub welcome_bonus: i64,
  /// Units granted to a broke account on request.
  #[serde(default = "default_bailout_amount")]
  pub bailout_amount: i64,
}

impl Default for AccountsConfig {
  fn default() -> Self {
    Self {
      welcome_bonus: default_welcome_bonus(),
      bailout_amount: default_bailout_amount(),
    }
  }
}

/// Retry configuration for `SettlementError::Transient`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  /// Total attempts, including the first.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Backoff before the second attempt; doubles after each retry.
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_max_attempts(),
      base_delay_ms: default_base_delay_ms(),
    }
  }
}

/// Notification queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  /// Events buffered before new ones are dropped.
  #[serde(default = "default_queue_capacity")]
  pub queue_capacity: usize,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      queue_capacity: default_queue_capacity(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: default_true(),
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_service_name() -> String {
  "parimutuel-settlement".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_database_url() -> String {
  "sqlite::memory:".to_string()
}

fn default_max_connections() -> u32 {
  8
}

fn default_busy_timeout_ms() -> u64 {
  5_000
}

fn default_acquire_timeout_ms() -> u64 {
  10_000
}

fn default_tick_interval() -> u64 {
  30
}

fn default_dispute_window() -> u64 {
  86_400 // 24 h
}

fn default_welcome_bonus() -> i64 {
  1_000
}

fn default_bailout_amount() -> i64 {
  100
}

fn default_max_attempts() -> u32 {
  5
}

fn default_base_delay_ms() -> u64 {
  20
}

fn default_queue_capacity() -> usize {
  1_024
}

fn default_true() -> bool {
  true
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
