//! Time-ordered polling of scheduled requests and dispatch of Update/Change
//! callbacks from a single background worker.

mod queue;
mod types;

pub use types::{PendingPoll, SchedulerOptions, UpstreamPolicy};

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use apiwatch_events::{topics, Bus, PollNotice};
use apiwatch_protocol::{ApiResponse, EventKind, RequestDescriptor, RequestId, ResponseError};
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::cache::CacheCoordinator;
use crate::error::{Result, WatchError};
use crate::registry::{Callback, SubscriptionRegistry};
use crate::util::{after, until};
use queue::{Completion, PendingQueue};

/// Handle to a poll scheduler. Clones share the same queue and worker.
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<PendingQueue>,
    wake: Notify,
    registry: SubscriptionRegistry,
    cache: Arc<dyn CacheCoordinator>,
    options: SchedulerOptions,
    bus: Option<Bus>,
    started: AtomicBool,
    stop: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(cache: Arc<dyn CacheCoordinator>, options: SchedulerOptions) -> Self {
        Self::build(cache, options, None)
    }

    /// Like [`PollScheduler::new`], also publishing poll outcomes on `bus`.
    pub fn with_bus(cache: Arc<dyn CacheCoordinator>, options: SchedulerOptions, bus: Bus) -> Self {
        Self::build(cache, options, Some(bus))
    }

    fn build(cache: Arc<dyn CacheCoordinator>, options: SchedulerOptions, bus: Option<Bus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(PendingQueue::default()),
                wake: Notify::new(),
                registry: SubscriptionRegistry::new(),
                cache,
                options,
                bus,
                started: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.inner.options
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Queue the first check of each request not already tracked.
    ///
    /// Returns how many requests were newly queued. Fails without touching
    /// anything when the event queue is disabled.
    pub async fn schedule(&self, requests: &[RequestDescriptor], kind: EventKind) -> Result<usize> {
        if !self.inner.options.enable_event_queue {
            return Err(WatchError::EventsDisabled);
        }
        let due = after(Utc::now(), self.inner.options.initial_delay);
        let mut added = 0;
        {
            let mut queue = self.inner.queue.lock().await;
            for request in requests {
                self.inner.registry.reserve(request.id().clone(), kind);
                if queue.insert(due, request.clone()) {
                    added += 1;
                    tracing::debug!(id = %request.id().short(), %request, %due, "poll scheduled");
                    self.inner.publish(topics::TOPIC_POLL_SCHEDULED, PollNotice::for_request(request));
                }
            }
        }
        self.inner.wake.notify_one();
        self.ensure_worker().await;
        Ok(added)
    }

    /// Attach `callback` for (request, kind) and schedule the request.
    pub async fn subscribe(
        &self,
        request: &RequestDescriptor,
        kind: EventKind,
        callback: Callback,
    ) -> Result<()> {
        if !self.inner.options.enable_event_queue {
            return Err(WatchError::EventsDisabled);
        }
        self.inner
            .registry
            .register(request.id().clone(), kind, callback);
        self.schedule(std::slice::from_ref(request), kind).await?;
        Ok(())
    }

    /// Detach the callback for (id, kind). Polling continues.
    pub fn unsubscribe(&self, id: &RequestId, kind: EventKind) -> bool {
        self.inner.registry.unregister(id, kind)
    }

    /// Stop polling a request. Returns whether it was tracked.
    pub async fn unschedule(&self, id: &RequestId) -> bool {
        let removed = self.inner.queue.lock().await.remove(id);
        if removed {
            tracing::debug!(id = %id.short(), "poll unscheduled");
        }
        removed
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Pending, or currently being polled.
    pub async fn is_tracked(&self, id: &RequestId) -> bool {
        self.inner.queue.lock().await.is_tracked(id)
    }

    /// Queued polls in due order.
    pub async fn pending(&self) -> Vec<PendingPoll> {
        self.inner.queue.lock().await.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.stop.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for it to exit. Pending entries are kept; a
    /// later `schedule` starts a new worker.
    pub async fn shutdown(&self) {
        // held until the flags are reset so no worker starts mid-shutdown
        let mut worker = self.inner.worker.lock().await;
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
        if let Some(handle) = worker.take() {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "poll worker ended abnormally");
            }
        }
        self.inner.started.store(false, Ordering::SeqCst);
        self.inner.stop.store(false, Ordering::SeqCst);
    }

    async fn ensure_worker(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let inner = self.inner.clone();
        *worker = Some(tokio::spawn(async move { inner.run().await }));
        self.inner.started.store(true, Ordering::SeqCst);
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        tracing::info!("poll worker started");
        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let next_due = self.queue.lock().await.next_due();
            let Some(due) = next_due else {
                self.wake.notified().await;
                continue;
            };
            let wait = until(due, Utc::now());
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    // something was queued or removed; recompute the earliest due
                    _ = self.wake.notified() => continue,
                }
            }
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            let popped = self.queue.lock().await.pop_due(Utc::now());
            if let Some(request) = popped {
                self.process(request).await;
            }
        }
        tracing::info!("poll worker stopped");
    }

    async fn process(&self, request: RequestDescriptor) {
        let id = request.id();
        let previous = self
            .cache
            .peek(id)
            .await
            .filter(|prev| !prev.is_error());
        let current = self.cache.resolve(&request).await;

        if let ApiResponse::Error(ResponseError {
            status, message, ..
        }) = &current
        {
            let err = WatchError::UpstreamError {
                id: id.clone(),
                status: *status,
                message: message.clone(),
            };
            tracing::warn!(%request, status = ?status, error = %err, "poll failed");
            self.publish(
                topics::TOPIC_POLL_FAILED,
                PollNotice::for_request(&request).with_failure(*status, message.clone()),
            );
            let next_due = match self.options.on_upstream_error {
                UpstreamPolicy::Drop => None,
                UpstreamPolicy::Retry => Some(after(Utc::now(), self.options.retry_after)),
            };
            self.finish(request, next_due).await;
            return;
        }

        self.dispatch(&request, EventKind::Update, &current, previous.as_ref());
        if let Some(prev) = previous.as_ref() {
            if prev.version() != current.version() {
                self.dispatch(&request, EventKind::Change, &current, Some(prev));
            }
        }
        self.finish(request, Some(current.expires_at())).await;
    }

    async fn finish(&self, request: RequestDescriptor, next_due: Option<chrono::DateTime<Utc>>) {
        let notice = PollNotice::for_request(&request);
        let id = request.id().short().to_string();
        let outcome = self.queue.lock().await.complete(request, next_due);
        match outcome {
            Completion::Reinserted(due) => tracing::debug!(%id, %due, "poll rescheduled"),
            Completion::Cancelled => tracing::debug!(%id, "poll cancelled while in flight"),
            Completion::Dropped => {
                tracing::debug!(%id, "poll dropped");
                self.publish(topics::TOPIC_POLL_DROPPED, notice);
            }
        }
    }

    fn dispatch(
        &self,
        request: &RequestDescriptor,
        kind: EventKind,
        current: &ApiResponse,
        previous: Option<&ApiResponse>,
    ) {
        let topic = match kind {
            EventKind::Update => topics::TOPIC_POLL_UPDATED,
            EventKind::Change => topics::TOPIC_POLL_CHANGED,
        };
        self.publish(topic, PollNotice::for_request(request).with_event(kind));

        let Some(callback) = self.registry.lookup(request.id(), kind) else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(current, previous))).is_err() {
            tracing::warn!(%request, event = %kind, "subscriber callback panicked");
        }
    }

    fn publish(&self, topic: &str, notice: PollNotice) {
        if let Some(bus) = &self.bus {
            bus.publish(topic, &notice);
        }
    }
}
