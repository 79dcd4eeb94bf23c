//! Notification sinks for triggered alerts.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::condition::Metric;

/// A condition that held for a freshly stored observation.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    /// Normalized location name
    pub location: String,
    pub metric: Metric,
    pub value: f64,
    /// Canonical condition text
    pub condition: String,
    pub observed_at: DateTime<Utc>,
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WEATHER ALERT: {} {} is {} (Condition: {})",
            self.location, self.metric, self.value, self.condition
        )
    }
}

/// Receives alert events. Delivery transport is up to the implementation.
///
/// Called from scheduler tasks, so implementations must not block for long.
pub trait AlertSink: Send + Sync {
    fn notify(&self, event: &AlertEvent);
}

/// Writes alerts to the log at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn notify(&self, event: &AlertEvent) {
        tracing::warn!(
            location = %event.location,
            metric = %event.metric,
            value = event.value,
            condition = %event.condition,
            "{}",
            event
        );
    }
}

/// Forwards alerts to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn notify(&self, event: &AlertEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!("Alert receiver dropped, discarding: {}", event);
        }
    }
}
