//! Service Context - Shared Collaborators for the Use Cases
//!
//! Built once in `main` and cloned into every service. Holds no
//! business state of its own.

use std::sync::Arc;

use crate::adapters::metrics::MetricsRegistry;
use crate::adapters::persistence::LedgerStore;
use crate::domain::error::SettlementError;
use crate::ports::clock::Clock;
use crate::ports::notifier::{Notifier, SettlementEvent};

use super::retry::RetryPolicy;

#[derive(Clone)]
pub struct ServiceContext {
  pub store: LedgerStore,
  pub clock: Arc<dyn Clock>,
  pub notifier: Arc<dyn Notifier>,
  pub metrics: Arc<MetricsRegistry>,
  pub retry: RetryPolicy,
}

impl ServiceContext {
  /// Wire the collaborators. Retries are counted on `metrics`.
  pub fn new(
    store: LedgerStore,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsRegistry>,
    retry: RetryPolicy,
  ) -> Self {
    let retry = retry.with_counter(metrics.retries.clone());
    Self {
      store,
      clock,
      notifier,
      metrics,
      retry,
    }
  }

  /// Count a rejected operation by its error code. Transient and
  /// internal failures are counted too; they carry their own codes.
  pub fn record_rejection<T>(&self, operation: &str, result: &Result<T, SettlementError>) {
    if let Err(e) = result {
      self
        .metrics
        .rejections
        .with_label_values(&[operation, e.code()])
        .inc();
    }
  }

  /// Hand committed events to the notifier, in order.
  pub fn publish(&self, events: impl IntoIterator<Item = SettlementEvent>) {
    for event in events {
      self.notifier.notify(event);
    }
  }
}

impl std::fmt::Debug for ServiceContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServiceContext")
      .field("store", &self.store)
      .field("retry", &self.retry)
      .finish_non_exhaustive()
  }
}
