//! Retry Policy - Exponential Backoff for Transient Store Failures
//!
//! SQLite reports write contention as BUSY/LOCKED. The usecases treat
//! that as a lost race, roll back, and rerun the whole operation.
//! Every other error returns immediately.

use std::future::Future;
use std::time::Duration;

use prometheus::IntCounterVec;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::domain::error::SettlementError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  /// Total attempts, including the first.
  max_attempts: u32,
  /// Delay before the first retry; doubles each time.
  base_delay: Duration,
  /// Optional counter labelled by operation.
  retries: Option<IntCounterVec>,
}

impl RetryPolicy {
  pub fn new(config: &RetryConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      base_delay: Duration::from_millis(config.base_delay_ms),
      retries: None,
    }
  }

  /// Single attempt, no backoff.
  pub const fn none() -> Self {
    Self {
      max_attempts: 1,
      base_delay: Duration::ZERO,
      retries: None,
    }
  }

  #[must_use]
  pub fn with_counter(mut self, retries: IntCounterVec) -> Self {
    self.retries = Some(retries);
    self
  }

  /// Delay after the `attempt`-th failure. Saturates instead of overflowing.
  fn backoff(&self, attempt: u32) -> Duration {
    self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
  }

  /// Run `op` until it succeeds, fails permanently, or the attempt
  /// budget is spent. The last transient error is returned as-is.
  pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, SettlementError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
  {
    let mut attempt = 1;
    loop {
      match op().await {
        Err(e) if e.is_retryable() && attempt < self.max_attempts => {
          let delay = self.backoff(attempt);
          debug!(
            operation,
            attempt,
            delay_ms = delay.as_millis(),
            error = %e,
            "Transient store failure, retrying"
          );
          if let Some(counter) = &self.retries {
            counter.with_label_values(&[operation]).inc();
          }
          sleep(delay).await;
          attempt += 1;
        }
        Err(e) if e.is_retryable() => {
          warn!(operation, attempts = attempt, error = %e, "Retry budget exhausted");
          return Err(e);
        }
        other => return other,
      }
    }
  }
}
