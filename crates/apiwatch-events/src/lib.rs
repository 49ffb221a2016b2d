use apiwatch_protocol::{EventKind, RequestDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

pub mod topics;

/// Minimal event envelope (RFC3339 time).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

/// Payload published for every poll outcome.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PollNotice {
    pub id: String,
    pub method: String,
    pub url: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PollNotice {
    pub fn for_request(request: &RequestDescriptor) -> Self {
        Self {
            id: request.id().to_string(),
            method: request.method().to_string(),
            url: request.url().to_string(),
            user: request.user().to_string(),
            event: None,
            status: None,
            detail: None,
        }
    }

    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_failure(mut self, status: Option<u16>, detail: impl Into<String>) -> Self {
        self.status = status;
        self.detail = Some(detail.into());
        self
    }
}

/// A simple broadcast bus for JSON-serializable events.
///
/// Used as the out-of-band channel for outcomes that happen on the poll
/// worker, where no caller is waiting for a return value.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn publish<T: Serialize>(&self, kind: &str, payload: &T) {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let val = serde_json::to_value(payload).unwrap_or_else(|err| {
            tracing::warn!(%err, kind, "event payload failed to serialize");
            serde_json::json!({"_ser":"error"})
        });
        // no receivers is fine; the bus is best-effort
        let _ = self.tx.send(Envelope {
            time: now,
            kind: kind.to_string(),
            payload: val,
        });
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(256)
    }
}
