use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Category assigned to events reported by the host application.
pub const TENANT_EVENT_CATEGORY: &str = "tenant";
/// Category assigned to events the SDK synthesizes itself (screen visits).
pub const CORE_EVENT_CATEGORY: &str = "core";

/// Name of the built-in event produced from `ReportScreenEvent`.
pub const SCREEN_VISIT_EVENT: &str = "screen_visit";

/// Unit of work submitted by the host application into the pipeline.
///
/// Operations are immutable once created; only their effects (queued events,
/// registration payloads) are ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Operation {
    /// Associate the current installation with a user identifier.
    SetUserId {
        /// The new user identifier.
        user_id: String,
    },
    /// Report a custom analytics event.
    Report {
        /// Event as handed in by the host app, prior to normalization.
        event: RawEvent,
    },
    /// Report a screen-visit event.
    ReportScreenEvent {
        /// Screen path, for example `checkout/payment`.
        path: String,
        /// Human-readable screen title.
        title: String,
        /// Optional screen category.
        category: Option<String>,
    },
    /// Flush pending analytics events immediately (advisory).
    DispatchNow,
    /// Register a platform push token for this installation.
    DeviceToken {
        /// Raw token bytes as provided by the platform.
        token: Vec<u8>,
    },
    /// Subscribe the installation to a push topic.
    SubscribeTopic {
        /// Topic name.
        topic: String,
    },
    /// Unsubscribe the installation from a push topic.
    UnsubscribeTopic {
        /// Topic name.
        topic: String,
    },
    /// Link the previously set user identifier as an alias on the backend.
    MigrateUser,
    /// Opt the installation in to push delivery.
    OptIn,
    /// Opt the installation out of push delivery.
    OptOut,
}

/// Analytics event as reported by the host application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawEvent {
    /// Event name prior to normalization.
    pub name: String,
    /// Parameters prior to normalization.
    pub context: BTreeMap<String, Value>,
}

impl RawEvent {
    /// Build a raw event from a name and parameter pairs.
    pub fn new(name: impl Into<String>, context: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            context,
        }
    }
}

/// Normalized, validated and decorated analytics event.
///
/// Owned by whichever queue currently holds it; removed once dispatched and
/// acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unique event id, used for removal-by-identity in queues.
    pub id: String,
    /// Normalized event name.
    pub name: String,
    /// Creation time in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
    /// Event category (`tenant` or `core`).
    pub category: String,
    /// Normalized parameters plus decorated metadata.
    pub context: BTreeMap<String, Value>,
    /// Whether the matched configuration routes this event to realtime.
    pub is_realtime: bool,
}

impl Event {
    /// Build an event with a fresh unique id.
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        timestamp_ms: u64,
        context: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp_ms,
            category: category.into(),
            context,
            is_realtime: false,
        }
    }
}

/// Operation-in-flight flowing through the handler chain.
///
/// Created at `submit`, consumed by the last handler that acts on it. The
/// normalizer attaches the produced [`Event`] for downstream stages.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationContext {
    /// The operation as submitted.
    pub operation: Operation,
    /// Normalized event, present after the normalizer ran for report
    /// operations.
    pub normalized: Option<Event>,
    /// Submission time in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

impl OperationContext {
    /// Wrap an operation with the current timestamp.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            normalized: None,
            timestamp_ms: now_millis(),
        }
    }
}

/// Current time in milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_get_unique_ids() {
        let a = Event::new("purchase", TENANT_EVENT_CATEGORY, 1, BTreeMap::new());
        let b = Event::new("purchase", TENANT_EVENT_CATEGORY, 1, BTreeMap::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn operation_context_carries_submission_time() {
        let ctx = OperationContext::new(Operation::DispatchNow);
        assert!(ctx.timestamp_ms > 0);
        assert_eq!(ctx.normalized, None);
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut context = BTreeMap::new();
        context.insert("amount".to_owned(), Value::from(12.5));
        let event = Event::new("purchase", TENANT_EVENT_CATEGORY, 42, context);

        let encoded = serde_json::to_string(&event).expect("event should serialize");
        let decoded: Event = serde_json::from_str(&encoded).expect("event should deserialize");
        assert_eq!(decoded, event);
    }
}
