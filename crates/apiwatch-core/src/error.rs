use apiwatch_protocol::{HttpMethod, RequestId, UnknownMethod};

/// Errors raised by request building, scheduling and configuration.
///
/// Validation variants are returned synchronously and abort the whole batch.
/// `UpstreamError` only ever travels out of band (logs and the event bus),
/// because the poll worker has no caller to return it to.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("required parameter '{0}' not supplied")]
    MissingRequiredParameter(String),
    #[error("parameter '{0}' has no values")]
    EmptyParameter(String),
    #[error(
        "parameter '{name}' has {found} values; every batch parameter needs one value or {expected}"
    )]
    InconsistentBatchLength {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("number of users must be 1 or {expected} (batch length), got {found}")]
    InconsistentUserCount { expected: usize, found: usize },
    #[error("events are disabled; enable them with `enable_event_queue` in the config")]
    EventsDisabled,
    #[error("upstream error for {id}: {message}")]
    UpstreamError {
        id: RequestId,
        status: Option<u16>,
        message: String,
    },
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
    #[error("no operation documented for {method} {path}")]
    UnknownPath { method: HttpMethod, path: String },
    #[error("invalid api document: {0}")]
    Document(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<UnknownMethod> for WatchError {
    fn from(err: UnknownMethod) -> Self {
        WatchError::UnknownOperation(err.0)
    }
}

pub type Result<T, E = WatchError> = std::result::Result<T, E>;
