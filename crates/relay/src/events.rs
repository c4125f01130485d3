//! Push events for relay clients, fanned out over a broadcast channel.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    ConnectionStatus {
        connected: bool,
        last_update: Option<String>,
    },
    /// Metadata of a newly mirrored result; the image is fetched separately.
    NewData {
        connected: bool,
        timestamp: Option<String>,
        has_image: bool,
        segments_count: usize,
        total_volume: f64,
    },
    ConnectionError {
        error: String,
    },
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::NewData { .. } => "new_data",
            Self::ConnectionError { .. } => "connection_error",
        }
    }

    /// One Server-Sent Events frame: `event:` line, JSON `data:` line, blank line.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        let mut chunk = String::with_capacity(json.len() + 32);
        chunk.push_str("event: ");
        chunk.push_str(self.name());
        chunk.push('\n');
        chunk.push_str("data: ");
        chunk.push_str(&json);
        chunk.push_str("\n\n");
        chunk
    }
}

/// Fan-out point for relay events. Slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<RelayEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver `event` to current subscribers and return how many there were.
    pub fn publish(&self, event: RelayEvent) -> usize {
        metrics::counter!("relay_events_published_total", "event" => event.name()).increment(1);
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!("no subscribers for {}", event.name());
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}
