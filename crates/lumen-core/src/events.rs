//! Event bus for resource mutations and subscription notifications.
//!
//! A tokio broadcast channel carries events to any number of listeners.
//! A listener registered before a mutation always observes it; sending
//! never blocks the mutating thread (slow receivers lag and drop).

use crate::types::MutationKind;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_BUFFER_SIZE: usize = 1024;

/// A resource mutation observed by the store.
#[derive(Debug, Clone)]
pub struct ResourceChange {
    pub resource_type: String,
    pub id: String,
    pub kind: MutationKind,
    /// The post-mutation state; `None` for deletes.
    pub resource: Option<Value>,
}

/// The "send" signal raised when a subscription trigger fires. Delivery
/// transport is owned by an external dispatcher listening on the bus.
#[derive(Debug, Clone)]
pub struct SubscriptionNotice {
    pub subscription_id: String,
    pub topic_url: String,
    pub event_number: u64,
    pub focus: Option<String>,
}

#[derive(Debug, Clone)]
pub enum StoreEvent {
    Resource(ResourceChange),
    Notification(SubscriptionNotice),
}

/// Cloneable multi-producer multi-consumer event bus.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Send an event to all subscribers, returning the receiver count.
    pub fn send(&self, event: StoreEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    pub fn send_change(
        &self,
        resource_type: impl Into<String>,
        id: impl Into<String>,
        kind: MutationKind,
        resource: Option<Value>,
    ) -> usize {
        self.send(StoreEvent::Resource(ResourceChange {
            resource_type: resource_type.into(),
            id: id.into(),
            kind,
            resource,
        }))
    }

    pub fn send_notice(&self, notice: SubscriptionNotice) -> usize {
        self.send(StoreEvent::Notification(notice))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
