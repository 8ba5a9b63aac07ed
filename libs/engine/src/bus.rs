//! In-process event bus
//!
//! Topic-keyed pub/sub used by the event-bus trigger, the publish step,
//! and the state machine engine's transition notifications. Slow
//! subscribers lag rather than block publishers.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events per topic before a slow subscriber starts lagging
const TOPIC_CAPACITY: usize = 64;

/// An event delivered to bus subscribers
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Topic the event was published on
    pub topic: String,

    /// Event payload
    pub payload: Value,
}

/// Topic-keyed in-process pub/sub
#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusEvent>>>,
}

impl EventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event to a topic.
    ///
    /// Returns the number of subscribers that received it; publishing to
    /// a topic nobody listens on is not an error.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let topics = self.topics.read().expect("event bus lock poisoned");
        let Some(sender) = topics.get(topic) else {
            return 0;
        };
        sender
            .send(BusEvent {
                topic: topic.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    /// Subscribe to a topic
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusEvent> {
        let mut topics = self.topics.write().expect("event bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("orders");

        let delivered = bus.publish("orders", serde_json::json!({"id": 1}));
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "orders");
        assert_eq!(event.payload["id"], 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("nowhere", Value::Null), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let mut orders = bus.subscribe("orders");
        let mut billing = bus.subscribe("billing");

        bus.publish("billing", serde_json::json!({"invoice": 7}));

        let event = billing.recv().await.unwrap();
        assert_eq!(event.payload["invoice"], 7);
        assert!(orders.try_recv().is_err());
    }
}
