//! Convenience wrappers around a shared [`PubSubService`].

use std::sync::{Mutex, MutexGuard};

use tracing::debug;
use uuid::Uuid;

use voicebus_types::bus::{Metadata, Payload, Priority};
use voicebus_types::error::BusError;

use super::handler::HandlerRef;
use super::service::PubSubService;

/// Publishes to a bus, optionally with a default topic.
#[derive(Debug, Clone)]
pub struct Publisher {
    bus: PubSubService,
    default_topic: Option<String>,
}

impl Publisher {
    pub fn new(bus: PubSubService, default_topic: Option<String>) -> Self {
        Self { bus, default_topic }
    }

    pub fn default_topic(&self) -> Option<&str> {
        self.default_topic.as_deref()
    }

    /// Publish to `topic`, or the default topic when `topic` is `None`.
    pub fn publish(
        &self,
        payload: impl Into<Payload>,
        topic: Option<&str>,
        priority: Priority,
        metadata: Metadata,
    ) -> Result<Uuid, BusError> {
        let topic = topic
            .or(self.default_topic.as_deref())
            .ok_or(BusError::NoTopic)?;
        self.bus.publish(topic, payload, priority, metadata)
    }
}

/// Tracks the subscriptions it made so they can be torn down together.
pub struct Subscriber {
    bus: PubSubService,
    subscriptions: Mutex<Vec<(String, HandlerRef)>>,
}

impl Subscriber {
    pub fn new(bus: PubSubService) -> Self {
        Self {
            bus,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, HandlerRef)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe and remember the pair. Duplicates are not recorded twice.
    pub fn subscribe(&self, topic: &str, handler: HandlerRef) -> bool {
        let added = self.bus.subscribe(topic, handler.clone());
        if added {
            self.lock().push((topic.to_string(), handler));
        }
        added
    }

    /// Remove every subscription made through this subscriber.
    pub fn unsubscribe_all(&self) {
        let subscriptions = std::mem::take(&mut *self.lock());
        let count = subscriptions.len();
        for (topic, handler) in subscriptions {
            self.bus.unsubscribe(&topic, &handler);
        }
        debug!(count, "removed subscriptions");
    }

    /// Topics this subscriber is currently registered on, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().iter().map(|(topic, _)| topic.clone()).collect()
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("subscriptions", &self.subscriptions())
            .finish()
    }
}
