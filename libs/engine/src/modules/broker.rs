//! In-process message broker module
//!
//! A topic-keyed broker with per-subscription mailboxes. It stands in
//! for external broker integrations during development and testing and
//! gives message triggers something to subscribe to without any
//! network configuration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigMap;
use crate::registry::{
    BrokerError, MessageBroker, Module, ModuleError, ModuleFactoryRegistry, Service,
    ServiceRegistry,
};

/// Register the `broker.memory` factory
pub fn register(registry: &mut ModuleFactoryRegistry) {
    registry.register(
        "broker.memory",
        Arc::new(|name: &str, _config: &ConfigMap| {
            Ok(Arc::new(MemoryBrokerModule {
                name: name.to_string(),
                broker: Arc::new(MemoryBroker::default()),
            }) as Arc<dyn Module>)
        }),
    );
}

// =============================================================================
// Broker
// =============================================================================

/// Topic-keyed broker delivering to every live subscription
#[derive(Default)]
pub struct MemoryBroker {
    topics: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BrokerError> {
        let mut topics = self.topics.write().expect("broker lock poisoned");
        if let Some(senders) = topics.get_mut(topic) {
            // Deliver and drop subscriptions whose receiver is gone
            senders.retain(|sender| sender.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .write()
            .expect("broker lock poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

// =============================================================================
// Module
// =============================================================================

struct MemoryBrokerModule {
    name: String,
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl Module for MemoryBrokerModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, services: &ServiceRegistry) -> Result<(), ModuleError> {
        services.register(
            &self.name,
            Service::Broker(Arc::clone(&self.broker) as Arc<dyn MessageBroker>),
        )?;
        Ok(())
    }

    async fn start(&self, _token: CancellationToken) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fanout_to_subscribers() {
        let broker = MemoryBroker::default();
        let mut a = broker.subscribe("orders");
        let mut b = broker.subscribe("orders");

        broker
            .publish("orders", serde_json::json!({"id": 1}))
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap()["id"], 1);
        assert_eq!(b.recv().await.unwrap()["id"], 1);
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_pruned() {
        let broker = MemoryBroker::default();
        let rx = broker.subscribe("orders");
        drop(rx);

        broker
            .publish("orders", serde_json::json!({}))
            .await
            .unwrap();

        let topics = broker.topics.read().unwrap();
        assert!(topics.get("orders").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_module_registers_service() {
        let module = MemoryBrokerModule {
            name: "events".to_string(),
            broker: Arc::new(MemoryBroker::default()),
        };

        let services = ServiceRegistry::new();
        module.init(&services).await.unwrap();
        assert!(services.broker("events").is_ok());
    }
}
