//! Module contract and factory registry
//!
//! A module is a named, typed, lifecycle-aware component built from
//! declarative config. `init` registers services and must not touch the
//! network; `start` may block on I/O; `stop` releases everything.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigMap, FactoryError};

use super::services::{RegistryError, ServiceRegistry};

// =============================================================================
// Lifecycle
// =============================================================================

/// Module lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Built by a factory, not yet initialised
    Created,
    /// Services registered
    Initialised,
    /// Running
    Started,
    /// Stopped cleanly
    Stopped,
    /// A lifecycle phase failed
    Failed,
}

/// Module lifecycle error
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Invalid module configuration
    #[error("module configuration error: {0}")]
    Config(String),

    /// Factory-time validation failed
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// Service registration failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// I/O failure while starting or stopping
    #[error("module I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Module Trait
// =============================================================================

/// Lifecycle contract every module obeys
#[async_trait]
pub trait Module: Send + Sync {
    /// The module's configured name
    fn name(&self) -> &str;

    /// Register services into the registry. Called once, in dependency
    /// order, before any module starts. No external communication.
    async fn init(&self, services: &ServiceRegistry) -> Result<(), ModuleError>;

    /// Start doing work. May block on I/O; long-running work must
    /// observe the token.
    async fn start(&self, token: CancellationToken) -> Result<(), ModuleError>;

    /// Release resources and wait for owned tasks to exit
    async fn stop(&self) -> Result<(), ModuleError>;
}

// =============================================================================
// Factory Registry
// =============================================================================

/// Builds a module from its declaration. Pure configuration validation,
/// no I/O.
pub type ModuleFactory =
    Arc<dyn Fn(&str, &ConfigMap) -> Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

/// Registry of module factories keyed by type tag
#[derive(Default)]
pub struct ModuleFactoryRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleFactoryRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in module types
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::modules::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under a type tag
    pub fn register(&mut self, tag: impl Into<String>, factory: ModuleFactory) {
        self.factories.insert(tag.into(), factory);
    }

    /// Whether a type tag is registered
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Build a module of the given type
    pub fn create(
        &self,
        tag: &str,
        name: &str,
        config: &ConfigMap,
    ) -> Result<Arc<dyn Module>, ModuleError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| ModuleError::Config(format!("unknown module type '{tag}'")))?;
        factory(name, config)
    }

    /// All registered type tags, sorted for stable catalogue output
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}
