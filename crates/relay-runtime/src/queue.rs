//! Durable FIFO buffer for events awaiting batch dispatch.

use std::sync::{Arc, Mutex, MutexGuard};

use relay_core::{DeliveryError, Event};
use relay_platform::{RecordStorage, StorageError, StorageScope};

/// FIFO event buffer persisted as one JSON document per tenant.
///
/// Every mutation rewrites the full pending list, so the on-disk record is
/// always a consistent snapshot. Persistence failures are logged and the
/// queue keeps serving from memory; the worst case is losing the pending
/// batch on process death, never corrupting it.
pub struct DurableEventQueue {
    events: Mutex<Vec<Event>>,
    storage: Arc<dyn RecordStorage>,
    scope: StorageScope,
    record_name: String,
}

impl DurableEventQueue {
    /// Reopen the queue for a tenant, restoring any pending events.
    ///
    /// A missing record means a fresh install; an unreadable one is dropped
    /// with a warning rather than blocking event delivery.
    pub fn restore(storage: Arc<dyn RecordStorage>, scope: StorageScope, tenant_id: u32) -> Self {
        let record_name = format!("pending-events-{tenant_id}.json");
        let events = match storage.load_record(scope, &record_name) {
            Ok(raw) => match serde_json::from_str::<Vec<Event>>(&raw) {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(record = %record_name, error = %err, "discarding unreadable pending-event record");
                    Vec::new()
                }
            },
            Err(StorageError::NotFound) => Vec::new(),
            Err(err) => {
                tracing::warn!(record = %record_name, error = %err, "could not restore pending events");
                Vec::new()
            }
        };

        Self {
            events: Mutex::new(events),
            storage,
            scope,
            record_name,
        }
    }

    /// Append one event to the tail and persist the new list.
    pub fn enqueue(&self, event: Event) {
        let mut events = self.lock();
        events.push(event);
        self.persist(&events);
    }

    /// Oldest pending events, up to `limit`, without removing them.
    pub fn first(&self, limit: usize) -> Vec<Event> {
        let events = self.lock();
        events.iter().take(limit).cloned().collect()
    }

    /// Remove one event by identity. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        let mut events = self.lock();
        let before = events.len();
        events.retain(|event| event.id != id);
        let removed = events.len() != before;
        if removed {
            self.persist(&events);
        }
        removed
    }

    /// Remove every event whose id is listed, rewriting the record once.
    ///
    /// Returns how many events were removed.
    pub fn remove_all(&self, ids: &[String]) -> usize {
        let mut events = self.lock();
        let before = events.len();
        events.retain(|event| !ids.contains(&event.id));
        let removed = before - events.len();
        if removed > 0 {
            self.persist(&events);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, events: &[Event]) {
        if let Err(err) = self.try_persist(events) {
            tracing::warn!(record = %self.record_name, error = %err, "could not persist pending events");
        }
    }

    fn try_persist(&self, events: &[Event]) -> Result<(), DeliveryError> {
        let raw = serde_json::to_string(events)
            .map_err(|err| DeliveryError::Persistence(err.to_string()))?;
        self.storage
            .save_record(self.scope, &self.record_name, &raw)
            .map_err(|err| DeliveryError::Persistence(err.to_string()))
    }
}
