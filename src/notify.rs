//! Notification and webhook sinks
//!
//! The core never delivers anything itself: collaborators hand it a
//! [`NotificationSink`] for internal events and a [`WebhookSink`] for
//! outbound dispatch, and the core publishes without ever blocking on
//! delivery. The bundled channel sink drops events when its buffer fills
//! rather than stall a run; the log sink is the default no-infrastructure
//! fallback.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

// ============================================================================
// Contracts
// ============================================================================

/// Event publication contract the core consumes
///
/// Implementations must return promptly; delivery happens elsewhere.
pub trait NotificationSink: Send + Sync {
    /// Publish an event; never blocks on delivery
    fn publish(&self, event: &str, payload: Value);
}

/// Opaque webhook dispatcher contract
#[async_trait]
pub trait WebhookSink: Send + Sync {
    /// Hand off one webhook event for delivery
    async fn dispatch(&self, event_type: &str, payload: Value, event_id: &str);
}

// ============================================================================
// Bundled implementations
// ============================================================================

/// A published event
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

/// Buffered channel sink; full buffers drop events instead of blocking
pub struct ChannelSink {
    sender: mpsc::Sender<Event>,
}

impl ChannelSink {
    /// Create a sink and the receiving end for a delivery worker
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: &str, payload: Value) {
        let event = Event {
            name: event.to_string(),
            payload,
        };
        if let Err(e) = self.sender.try_send(event) {
            tracing::warn!(error = %e, "notification buffer full, event dropped");
        }
    }
}

/// Sink that writes events to the structured log
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, event: &str, payload: Value) {
        tracing::info!(event = %event, payload = %payload, "event published");
    }
}

#[async_trait]
impl WebhookSink for LogSink {
    async fn dispatch(&self, event_type: &str, payload: Value, event_id: &str) {
        tracing::info!(
            event_type = %event_type,
            event_id = %event_id,
            payload = %payload,
            "webhook dispatched to log sink"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut receiver) = ChannelSink::new(4);
        sink.publish("run.completed", json!({"run_id": "r1", "best_score": 0.97}));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.name, "run.completed");
        assert_eq!(event.payload["run_id"], "r1");
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut receiver) = ChannelSink::new(1);
        sink.publish("first", json!(1));
        // Buffer full; this one is dropped, publish does not block
        sink.publish("second", json!(2));

        assert_eq!(receiver.recv().await.unwrap().name, "first");
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_log_sink_does_not_panic() {
        LogSink.publish("swap.executed", json!({"swap_id": "s1"}));
    }
}
