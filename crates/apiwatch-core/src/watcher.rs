use std::sync::Arc;

use apiwatch_events::Bus;
use apiwatch_protocol::{ApiResponse, EventKind, HttpMethod, RequestDescriptor};
use serde::de::DeserializeOwned;

use crate::cache::CacheCoordinator;
use crate::config::WatchConfig;
use crate::document::OperationProvider;
use crate::error::{Result, WatchError};
use crate::params::ParameterBundle;
use crate::registry::Callback;
use crate::request::RequestBuilder;
use crate::scheduler::{PollScheduler, SchedulerOptions};

/// A response together with its body decoded as `T`.
pub type TypedResponse<T> = (RequestDescriptor, ApiResponse, serde_json::Result<T>);

/// Entry point tying the request builder to the cache and the poll scheduler.
#[derive(Clone)]
pub struct Watcher {
    builder: RequestBuilder,
    scheduler: PollScheduler,
    cache: Arc<dyn CacheCoordinator>,
}

impl Watcher {
    pub fn new(
        provider: Arc<dyn OperationProvider>,
        cache: Arc<dyn CacheCoordinator>,
        config: &WatchConfig,
        bus: Option<Bus>,
    ) -> Self {
        let options = SchedulerOptions::from(config);
        let scheduler = match bus {
            Some(bus) => PollScheduler::with_bus(cache.clone(), options, bus),
            None => PollScheduler::new(cache.clone(), options),
        };
        Self {
            builder: RequestBuilder::new(provider, config.token.clone()),
            scheduler,
            cache,
        }
    }

    pub fn builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn requests(
        &self,
        method: HttpMethod,
        path: &str,
        bundle: &ParameterBundle,
    ) -> Result<Vec<RequestDescriptor>> {
        self.builder.requests(method, path, bundle)
    }

    /// Build the batch and resolve it once through the cache, in batch order.
    pub async fn fetch(
        &self,
        method: HttpMethod,
        path: &str,
        bundle: &ParameterBundle,
    ) -> Result<Vec<(RequestDescriptor, ApiResponse)>> {
        let requests = self.requests(method, path, bundle)?;
        let responses = self.cache.resolve_batch(&requests).await;
        Ok(requests.into_iter().zip(responses).collect())
    }

    /// [`Watcher::fetch`] with each body deserialized as JSON into `T`.
    ///
    /// Items fail individually: an error response or a body that does not
    /// match `T` yields `Err` for that index only.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        bundle: &ParameterBundle,
    ) -> Result<Vec<TypedResponse<T>>> {
        let fetched = self.fetch(method, path, bundle).await?;
        Ok(fetched
            .into_iter()
            .map(|(request, response)| {
                let value = response.json::<T>();
                if let Err(err) = &value {
                    tracing::debug!(%request, %err, "typed body unavailable");
                }
                (request, response, value)
            })
            .collect())
    }

    /// Build the batch and subscribe `callback` for `kind` on every request.
    pub async fn watch(
        &self,
        method: HttpMethod,
        path: &str,
        bundle: &ParameterBundle,
        kind: EventKind,
        callback: Callback,
    ) -> Result<Vec<RequestDescriptor>> {
        if !self.scheduler.options().enable_event_queue {
            return Err(WatchError::EventsDisabled);
        }
        let requests = self.requests(method, path, bundle)?;
        for request in &requests {
            self.scheduler
                .subscribe(request, kind, callback.clone())
                .await?;
        }
        tracing::info!(%method, path, kind = %kind, requests = requests.len(), "watching");
        Ok(requests)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
