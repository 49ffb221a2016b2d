use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use apiwatch_protocol::{ApiResponse, RequestDescriptor, RequestId};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::transport::{TokenSource, Transport, TransportReply};
use crate::util::after;

/// The cache contract the poll scheduler depends on.
#[async_trait]
pub trait CacheCoordinator: Send + Sync {
    /// Current cached entry, expired or not. Never touches the network.
    async fn peek(&self, id: &RequestId) -> Option<ApiResponse>;

    /// Unexpired cached data or a fresh round trip. Failures come back as
    /// [`ApiResponse::Error`], never as a panic or an `Err`.
    async fn resolve(&self, request: &RequestDescriptor) -> ApiResponse;

    /// Resolve several requests; output order matches input order.
    async fn resolve_batch(&self, requests: &[RequestDescriptor]) -> Vec<ApiResponse> {
        futures_util::future::join_all(requests.iter().map(|r| self.resolve(r))).await
    }
}

/// Keeps the latest successful response per request identity and revalidates
/// with `If-None-Match` once it expires.
pub struct MemoryCache {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    entries: RwLock<HashMap<RequestId, ApiResponse>>,
    error_ttl: Duration,
}

impl MemoryCache {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            transport,
            tokens,
            entries: RwLock::new(HashMap::new()),
            error_ttl: Duration::from_secs(5),
        }
    }

    /// Expiry stamped on transport failures, which carry no headers.
    pub fn with_error_ttl(mut self, ttl: Duration) -> Self {
        self.error_ttl = ttl;
        self
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn invalidate(&self, id: &RequestId) -> Option<ApiResponse> {
        self.entries.write().await.remove(id)
    }

    async fn store(&self, id: &RequestId, response: &ApiResponse) {
        self.entries
            .write()
            .await
            .insert(id.clone(), response.clone());
    }
}

#[async_trait]
impl CacheCoordinator for MemoryCache {
    async fn peek(&self, id: &RequestId) -> Option<ApiResponse> {
        self.entries.read().await.get(id).cloned()
    }

    async fn resolve(&self, request: &RequestDescriptor) -> ApiResponse {
        let id = request.id();
        let now = Utc::now();
        let cached = self.peek(id).await;
        if let Some(hit) = cached.as_ref().filter(|c| !c.is_expired_at(now)) {
            tracing::trace!(id = %id.short(), "cache hit");
            return hit.clone();
        }

        let token = if request.scope().is_empty() {
            None
        } else {
            self.tokens.token(request.user(), request.scope()).await
        };
        if !request.scope().is_empty() && token.is_none() {
            tracing::debug!(user = %request.user(), scope = %request.scope(), "no token for scoped request");
        }
        let etag = cached.as_ref().and_then(|c| c.etag());

        match self.transport.send(request, token.as_deref(), etag).await {
            Ok(TransportReply::Fresh(response)) => {
                if !response.is_error() {
                    self.store(id, &response).await;
                }
                response
            }
            Ok(TransportReply::NotModified { expires_at }) => match cached {
                Some(previous) => {
                    let refreshed = previous.refreshed(expires_at);
                    self.store(id, &refreshed).await;
                    refreshed
                }
                None => ApiResponse::error(
                    Some(304),
                    "not modified without a cached entry",
                    after(now, self.error_ttl),
                ),
            },
            Err(err) => {
                tracing::debug!(id = %id.short(), %err, "transport failure");
                ApiResponse::error(None, err.to_string(), after(now, self.error_ttl))
            }
        }
    }
}
