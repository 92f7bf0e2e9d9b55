//! Notification Adapters
//!
//! `QueuedNotifier` implements the `Notifier` port with a bounded
//! queue drained by a dispatcher task. `LogSink` is the default
//! delivery target: one structured log line per event.

pub mod log_sink;
pub mod queued;

pub use log_sink::LogSink;
pub use queued::QueuedNotifier;
