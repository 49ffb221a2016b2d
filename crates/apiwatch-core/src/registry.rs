use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use apiwatch_protocol::{ApiResponse, EventKind, RequestId};

/// Called with (current response, previous response if any).
pub type Callback = Arc<dyn Fn(&ApiResponse, Option<&ApiResponse>) + Send + Sync>;

pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&ApiResponse, Option<&ApiResponse>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Maps (request identity, event kind) to at most one callback.
///
/// Registration is last-write-wins: registering a second callback for the
/// same key replaces the first and hands the replaced callback back to the
/// caller. Callers that need several listeners on one request must fan out
/// inside a single callback.
#[derive(Default)]
pub struct SubscriptionRegistry {
    slots: RwLock<HashMap<(RequestId, EventKind), Option<Callback>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `callback` for the key, returning the callback it replaced.
    pub fn register(&self, id: RequestId, kind: EventKind, callback: Callback) -> Option<Callback> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = slots.insert((id.clone(), kind), Some(callback)).flatten();
        if replaced.is_some() {
            tracing::debug!(id = %id.short(), event = %kind, "subscription callback replaced");
        }
        replaced
    }

    /// Make sure the key exists without attaching a callback.
    pub fn reserve(&self, id: RequestId, kind: EventKind) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.entry((id, kind)).or_insert(None);
    }

    pub fn lookup(&self, id: &RequestId, kind: EventKind) -> Option<Callback> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(&(id.clone(), kind)).cloned().flatten()
    }

    pub fn contains(&self, id: &RequestId, kind: EventKind) -> bool {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.contains_key(&(id.clone(), kind))
    }

    /// Remove the key entirely. Returns whether it existed.
    pub fn unregister(&self, id: &RequestId, kind: EventKind) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(&(id.clone(), kind)).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiwatch_protocol::{HttpMethod, RequestDescriptor};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(url: &str) -> RequestId {
        RequestDescriptor::new(HttpMethod::Get, url, BTreeMap::new(), "", "")
            .id()
            .clone()
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let first_hits = hits.clone();
        assert!(registry
            .register(
                id("https://x/a"),
                EventKind::Update,
                callback(move |_, _| {
                    first_hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .is_none());
        let second_hits = hits.clone();
        let replaced = registry.register(
            id("https://x/a"),
            EventKind::Update,
            callback(move |_, _| {
                second_hits.fetch_add(10, Ordering::SeqCst);
            }),
        );
        assert!(replaced.is_some());
        assert_eq!(registry.len(), 1);

        let cb = registry.lookup(&id("https://x/a"), EventKind::Update).unwrap();
        cb(&ApiResponse::ok("{}", Utc::now()), None);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn reserved_keys_have_no_callback() {
        let registry = SubscriptionRegistry::new();
        registry.reserve(id("https://x/a"), EventKind::Change);
        assert!(registry.contains(&id("https://x/a"), EventKind::Change));
        assert!(registry.lookup(&id("https://x/a"), EventKind::Change).is_none());
        assert!(!registry.contains(&id("https://x/a"), EventKind::Update));

        // reserving never clears an attached callback
        registry.register(id("https://x/a"), EventKind::Change, callback(|_, _| {}));
        registry.reserve(id("https://x/a"), EventKind::Change);
        assert!(registry.lookup(&id("https://x/a"), EventKind::Change).is_some());
    }

    #[test]
    fn unregister_removes_key() {
        let registry = SubscriptionRegistry::new();
        registry.register(id("https://x/a"), EventKind::Update, callback(|_, _| {}));
        assert!(registry.unregister(&id("https://x/a"), EventKind::Update));
        assert!(!registry.unregister(&id("https://x/a"), EventKind::Update));
        assert!(registry.is_empty());
    }
}
