use std::collections::{BTreeMap, HashMap};

use apiwatch_protocol::{RequestDescriptor, RequestId};
use chrono::{DateTime, Utc};

use super::types::PendingPoll;

/// Outcome of handing a processed request back to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    Reinserted(DateTime<Utc>),
    /// Unscheduled while in flight.
    Cancelled,
    /// No next due time was given.
    Dropped,
}

struct InFlight {
    id: RequestId,
    cancelled: bool,
}

/// Time-ordered pending polls, at most one entry per request identity.
///
/// Ordering key is (due_at, insertion sequence) so equal due times pop in
/// insertion order.
#[derive(Default)]
pub(crate) struct PendingQueue {
    order: BTreeMap<(DateTime<Utc>, u64), RequestDescriptor>,
    index: HashMap<RequestId, (DateTime<Utc>, u64)>,
    next_seq: u64,
    in_flight: Option<InFlight>,
}

impl PendingQueue {
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Pending, or in flight and not cancelled.
    pub(crate) fn is_tracked(&self, id: &RequestId) -> bool {
        self.index.contains_key(id)
            || self
                .in_flight
                .as_ref()
                .is_some_and(|f| &f.id == id && !f.cancelled)
    }

    /// Insert unless already tracked. Returns whether an entry was added.
    pub(crate) fn insert(&mut self, due_at: DateTime<Utc>, request: RequestDescriptor) -> bool {
        if self.is_tracked(request.id()) {
            return false;
        }
        self.push(due_at, request);
        true
    }

    fn push(&mut self, due_at: DateTime<Utc>, request: RequestDescriptor) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(request.id().clone(), (due_at, seq));
        self.order.insert((due_at, seq), request);
    }

    pub(crate) fn next_due(&self) -> Option<DateTime<Utc>> {
        self.order.keys().next().map(|(due, _)| *due)
    }

    /// Pop the earliest entry if it is due at `now`, marking it in flight.
    pub(crate) fn pop_due(&mut self, now: DateTime<Utc>) -> Option<RequestDescriptor> {
        let (&key, _) = self.order.iter().next()?;
        if key.0 > now {
            return None;
        }
        let request = self.order.remove(&key)?;
        self.index.remove(request.id());
        self.in_flight = Some(InFlight {
            id: request.id().clone(),
            cancelled: false,
        });
        Some(request)
    }

    /// Hand a processed request back, with the next due time if it should stay.
    pub(crate) fn complete(
        &mut self,
        request: RequestDescriptor,
        next_due: Option<DateTime<Utc>>,
    ) -> Completion {
        let cancelled = match self.in_flight.take() {
            Some(flight) if &flight.id == request.id() => flight.cancelled,
            other => {
                self.in_flight = other;
                false
            }
        };
        if cancelled {
            return Completion::Cancelled;
        }
        let Some(due) = next_due else {
            return Completion::Dropped;
        };
        self.push(due, request);
        Completion::Reinserted(due)
    }

    /// Drop a request: removes its pending entry and stops an in-flight one
    /// from being reinserted. Returns whether anything was tracked.
    pub(crate) fn remove(&mut self, id: &RequestId) -> bool {
        let mut found = false;
        if let Some(key) = self.index.remove(id) {
            self.order.remove(&key);
            found = true;
        }
        if let Some(flight) = self.in_flight.as_mut().filter(|f| &f.id == id) {
            found |= !flight.cancelled;
            flight.cancelled = true;
        }
        found
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingPoll> {
        self.order
            .iter()
            .map(|(&(due_at, seq), request)| PendingPoll {
                due_at,
                seq,
                request: request.clone(),
            })
            .collect()
    }
}
