//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{AppConfig, MAX_BASE_DELAY_MS, MAX_DISPUTE_WINDOW_SECS};

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    database = %config.database.url,
    tick_secs = config.scheduler.tick_interval_secs,
    dispute_window_secs = config.scheduler.dispute_window_secs,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content)
    .with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  anyhow::ensure!(
    !config.service.name.trim().is_empty(),
    "service.name must not be empty"
  );

  // Database
  anyhow::ensure!(
    config.database.url.starts_with("sqlite:"),
    "database.url must be a sqlite URL, got {}",
    config.database.url
  );
  anyhow::ensure!(
    config.database.max_connections > 0,
    "database.max_connections must be positive"
  );

  // Scheduler
  anyhow::ensure!(
    config.scheduler.tick_interval_secs > 0,
    "scheduler.tick_interval_secs must be positive"
  );
  anyhow::ensure!(
    config.scheduler.dispute_window_secs <= MAX_DISPUTE_WINDOW_SECS,
    "scheduler.dispute_window_secs must be at most {MAX_DISPUTE_WINDOW_SECS}, got {}",
    config.scheduler.dispute_window_secs
  );

  // Grants
  anyhow::ensure!(
    config.accounts.welcome_bonus >= 0,
    "accounts.welcome_bonus must not be negative, got {}",
    config.accounts.welcome_bonus
  );
  anyhow::ensure!(
    config.accounts.bailout_amount > 0,
    "accounts.bailout_amount must be positive, got {}",
    config.accounts.bailout_amount
  );

  // Retry
  anyhow::ensure!(
    (1..=20).contains(&config.retry.max_attempts),
    "retry.max_attempts must be in [1, 20], got {}",
    config.retry.max_attempts
  );
  anyhow::ensure!(
    config.retry.base_delay_ms <= MAX_BASE_DELAY_MS,
    "retry.base_delay_ms must be at most {MAX_BASE_DELAY_MS}, got {}",
    config.retry.base_delay_ms
  );

  anyhow::ensure!(
    config.notifications.queue_capacity > 0,
    "notifications.queue_capacity must be positive"
  );

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = parse_config("").unwrap();
    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.scheduler.dispute_window_secs, 86_400);
    assert_eq!(config.accounts.welcome_bonus, 1_000);
    assert!(config.metrics.enabled);
  }

  #[test]
  fn test_partial_sections() {
    let config = parse_config(
      r#"
      [database]
      url = "sqlite://data/ledger.db"

      [scheduler]
      dispute_window_secs = 60
      "#,
    )
    .unwrap();
    assert_eq!(config.database.url, "sqlite://data/ledger.db");
    assert_eq!(config.database.busy_timeout_ms, 5_000);
    assert_eq!(config.scheduler.dispute_window().unwrap(), chrono::Duration::seconds(60));
    assert_eq!(config.scheduler.tick_interval_secs, 30);
  }

  #[test]
  fn test_rejects_bad_values() {
    assert!(parse_config("[accounts]\nbailout_amount = 0").is_err());
    assert!(parse_config("[retry]\nmax_attempts = 0").is_err());
    assert!(parse_config("[database]\nurl = \"postgres://x\"").is_err());
    assert!(parse_config("[scheduler]\ntick_interval_secs = 0").is_err());
  }

  #[test]
  fn test_rejects_oversized_windows_and_delays() {
    assert!(parse_config("[scheduler]\ndispute_window_secs = 9223372036854775807").is_err());
    assert!(parse_config("[scheduler]\ndispute_window_secs = 315360001").is_err());
    assert!(parse_config("[retry]\nbase_delay_ms = 18446744073709551615").is_err());

    let config = parse_config("[scheduler]\ndispute_window_secs = 315360000").unwrap();
    assert_eq!(
      config.scheduler.dispute_window().unwrap(),
      chrono::Duration::days(3650)
    );
  }

  #[test]
  fn test_unvalidated_window_does_not_panic() {
    let scheduler = crate::config::SchedulerConfig {
      tick_interval_secs: 30,
      dispute_window_secs: u64::MAX,
    };
    assert!(scheduler.dispute_window().is_err());

    let scheduler = crate::config::SchedulerConfig {
      tick_interval_secs: 30,
      dispute_window_secs: i64::MAX as u64,
    };
    assert!(scheduler.dispute_window().is_err());
  }
}
