//! Queued Notifier - Bounded Hand-off to a Dispatcher Task
//!
//! `notify` never waits: events go through `try_send` on a bounded
//! channel. A full or closed queue drops the event with a warning.
//! The dispatcher task delivers events in order and exits once every
//! sender is gone and the queue is drained.

use std::sync::Arc;

use prometheus::IntCounter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ports::notifier::{NotificationSink, Notifier, SettlementEvent};

/// `Notifier` backed by a bounded mpsc queue.
#[derive(Debug, Clone)]
pub struct QueuedNotifier {
    tx: mpsc::Sender<SettlementEvent>,
    dropped: Option<IntCounter>,
}

impl QueuedNotifier {
    /// Create the queue and spawn its dispatcher on the current runtime.
    ///
    /// `dropped` is incremented for every event that could not be queued.
    pub fn spawn<S: NotificationSink>(
        capacity: usize,
        sink: Arc<S>,
        dropped: Option<IntCounter>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(dispatch(rx, sink));
        (Self { tx, dropped }, handle)
    }
}

impl Notifier for QueuedNotifier {
    fn notify(&self, event: SettlementEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(ev) => ("queue full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("queue closed", ev),
            };
            warn!(
                market_id = event.market_id(),
                kind = event.kind(),
                reason,
                "Dropping settlement event"
            );
            if let Some(counter) = &self.dropped {
                counter.inc();
            }
        }
    }
}

async fn dispatch<S: NotificationSink>(mut rx: mpsc::Receiver<SettlementEvent>, sink: Arc<S>) {
    let mut delivered = 0_u64;
    while let Some(event) = rx.recv().await {
        match sink.deliver(&event).await {
            Ok(()) => {
                delivered += 1;
                debug!(kind = event.kind(), market_id = event.market_id(), "Event delivered");
            }
            Err(e) => warn!(
                error = %e,
                kind = event.kind(),
                market_id = event.market_id(),
                "Notification delivery failed"
            ),
        }
    }
    info!(delivered, "Notification dispatcher stopped");
}
