use std::time::Duration;

use apiwatch_protocol::RequestDescriptor;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::WatchConfig;

/// What happens to a request whose poll produced an error response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamPolicy {
    /// Stop polling it; the caller has to schedule it again.
    #[default]
    Drop,
    /// Poll it again after `retry_after`.
    Retry,
}

/// A queued check: due time, insertion sequence for tie-breaks, and the request.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPoll {
    pub due_at: DateTime<Utc>,
    pub seq: u64,
    pub request: RequestDescriptor,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub enable_event_queue: bool,
    pub initial_delay: Duration,
    pub on_upstream_error: UpstreamPolicy,
    pub retry_after: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for SchedulerOptions {
    fn from(cfg: &WatchConfig) -> Self {
        Self {
            enable_event_queue: cfg.enable_event_queue,
            initial_delay: cfg.initial_delay(),
            on_upstream_error: cfg.on_upstream_error,
            retry_after: cfg.retry_after(),
        }
    }
}
