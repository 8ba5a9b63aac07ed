//! Service registry
//!
//! A mapping from unique service name to capability handle. Handles are
//! tagged variants for the capability kinds the engine knows about,
//! with an escape hatch for user-defined kinds; consumers look up by
//! name and perform a checked downcast.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::bus::EventBus;
use crate::modules::http::HttpServerHandle;

// =============================================================================
// Errors
// =============================================================================

/// Service registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A service with this name is already registered; names are write-once
    #[error("service '{0}' already registered")]
    DuplicateService(String),

    /// No service with this name
    #[error("service '{0}' not found")]
    ServiceNotFound(String),

    /// The service exists but advertises a different capability
    #[error("service '{name}' does not provide {expected}")]
    WrongKind {
        /// Service name
        name: String,
        /// Expected capability
        expected: &'static str,
    },
}

/// Message broker failure
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker rejected or could not route the message
    #[error("publish to '{topic}' failed: {message}")]
    Publish {
        /// Target topic
        topic: String,
        /// Failure detail
        message: String,
    },
}

/// Artifact store failure
#[derive(Debug, Error)]
#[error("artifact store error: {0}")]
pub struct ArtifactError(pub String);

// =============================================================================
// Capability Traits
// =============================================================================

/// Topic-based message broker capability
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Value) -> Result<(), BrokerError>;

    /// Subscribe to a topic; the receiver yields every payload published
    /// after the subscription was made
    fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Value>;
}

/// Keyed artifact store capability
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a value under a key, replacing any previous value
    async fn put(&self, key: &str, value: Value) -> Result<(), ArtifactError>;

    /// Fetch a value by key
    async fn get(&self, key: &str) -> Result<Option<Value>, ArtifactError>;
}

// =============================================================================
// Service Handles
// =============================================================================

/// A capability handle exposed by a module
#[derive(Clone)]
pub enum Service {
    /// Shared HTTP server: trigger route table plus serving control
    Http(Arc<HttpServerHandle>),

    /// Message broker
    Broker(Arc<dyn MessageBroker>),

    /// Artifact store
    Artifacts(Arc<dyn ArtifactStore>),

    /// In-process event bus
    EventBus(Arc<EventBus>),

    /// User-defined capability; consumers downcast to the concrete type
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Service {
    /// The capability this handle advertises
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Broker(_) => "broker",
            Self::Artifacts(_) => "artifacts",
            Self::EventBus(_) => "eventbus",
            Self::Custom(_) => "custom",
        }
    }

    /// Downcast to the HTTP server capability
    #[must_use]
    pub fn as_http(&self) -> Option<Arc<HttpServerHandle>> {
        match self {
            Self::Http(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Downcast to the broker capability
    #[must_use]
    pub fn as_broker(&self) -> Option<Arc<dyn MessageBroker>> {
        match self {
            Self::Broker(broker) => Some(Arc::clone(broker)),
            _ => None,
        }
    }

    /// Downcast to the artifact store capability
    #[must_use]
    pub fn as_artifacts(&self) -> Option<Arc<dyn ArtifactStore>> {
        match self {
            Self::Artifacts(store) => Some(Arc::clone(store)),
            _ => None,
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Write-once mapping from service name to capability handle
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Service>>,
}

impl ServiceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service. Each name can be registered exactly once.
    pub fn register(&self, name: &str, service: Service) -> Result<(), RegistryError> {
        let mut services = self.services.write().expect("service registry poisoned");
        if services.contains_key(name) {
            return Err(RegistryError::DuplicateService(name.to_string()));
        }
        services.insert(name.to_string(), service);
        Ok(())
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Result<Service, RegistryError> {
        self.services
            .read()
            .expect("service registry poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ServiceNotFound(name.to_string()))
    }

    /// Look up a broker capability by name
    pub fn broker(&self, name: &str) -> Result<Arc<dyn MessageBroker>, RegistryError> {
        self.get(name)?
            .as_broker()
            .ok_or(RegistryError::WrongKind {
                name: name.to_string(),
                expected: "a message broker",
            })
    }

    /// Look up an HTTP server capability by name
    pub fn http(&self, name: &str) -> Result<Arc<HttpServerHandle>, RegistryError> {
        self.get(name)?.as_http().ok_or(RegistryError::WrongKind {
            name: name.to_string(),
            expected: "an HTTP server",
        })
    }

    /// First registered artifact store, if any
    #[must_use]
    pub fn find_artifacts(&self) -> Option<(String, Arc<dyn ArtifactStore>)> {
        let services = self.services.read().expect("service registry poisoned");
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();
        names.into_iter().find_map(|name| {
            services
                .get(name)
                .and_then(Service::as_artifacts)
                .map(|store| (name.clone(), store))
        })
    }

    /// Service names and the capability each advertises
    #[must_use]
    pub fn catalogue(&self) -> Vec<(String, &'static str)> {
        let services = self.services.read().expect("service registry poisoned");
        let mut entries: Vec<(String, &'static str)> = services
            .iter()
            .map(|(name, service)| (name.clone(), service.kind()))
            .collect();
        entries.sort();
        entries
    }

    /// Replace the whole registry contents; used by fail-safe reload
    /// after a new module graph passed init validation.
    pub fn replace_with(&self, other: Self) {
        let mut services = self.services.write().expect("service registry poisoned");
        *services = other.services.into_inner().expect("service registry poisoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_once() {
        let registry = ServiceRegistry::new();
        registry
            .register("bus", Service::EventBus(Arc::new(EventBus::new())))
            .unwrap();

        let err = registry
            .register("bus", Service::EventBus(Arc::new(EventBus::new())))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateService(_)));
    }

    #[test]
    fn test_lookup_miss() {
        let registry = ServiceRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(RegistryError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_checked_downcast() {
        let registry = ServiceRegistry::new();
        registry
            .register("bus", Service::EventBus(Arc::new(EventBus::new())))
            .unwrap();

        assert!(matches!(
            registry.broker("bus"),
            Err(RegistryError::WrongKind { .. })
        ));
        assert_eq!(registry.get("bus").unwrap().kind(), "eventbus");
    }

    #[test]
    fn test_custom_escape_hatch() {
        struct Gauge(u64);

        let registry = ServiceRegistry::new();
        registry
            .register("gauge", Service::Custom(Arc::new(Gauge(9))))
            .unwrap();

        let service = registry.get("gauge").unwrap();
        let Service::Custom(any) = service else {
            panic!("expected custom service");
        };
        assert_eq!(any.downcast_ref::<Gauge>().unwrap().0, 9);
    }
}
