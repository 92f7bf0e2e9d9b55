//! Log Sink - Settlement Events as Structured Log Lines

use async_trait::async_trait;
use tracing::info;

use crate::ports::notifier::{NotificationSink, SettlementEvent};

/// Writes each event as a JSON payload on the `notifications` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, event: &SettlementEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(
            target: "notifications",
            market_id = event.market_id(),
            kind = event.kind(),
            payload = %payload,
            "Settlement event"
        );
        Ok(())
    }
}
