//! Client-side API watching: turn parameter bundles into batches of HTTP
//! requests, then poll them on their cache expiry and notify subscribers
//! when responses arrive or change.

pub mod cache;
pub mod config;
pub mod document;
mod error;
pub mod params;
pub mod registry;
pub mod request;
pub mod scheduler;
pub mod transport;
pub mod util;
mod watcher;

#[cfg(test)]
mod test_support;

pub use apiwatch_protocol as protocol;

pub use cache::{CacheCoordinator, MemoryCache};
pub use config::{config_schema_json, load_config, parse_config, WatchConfig};
pub use document::{ApiDocument, OperationProvider};
pub use error::{Result, WatchError};
pub use params::{classify, ClassifiedParameters, ParameterBundle, TokenCarrier, TokenSpec};
pub use registry::{callback, Callback, SubscriptionRegistry};
pub use request::RequestBuilder;
pub use scheduler::{PendingPoll, PollScheduler, SchedulerOptions, UpstreamPolicy};
pub use transport::{HttpTransport, StaticTokens, TokenSource, Transport, TransportError, TransportReply};
pub use watcher::{TypedResponse, Watcher};
