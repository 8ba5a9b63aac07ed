//! Service registry and module lifecycle
//!
//! Declarative module declarations are materialised into live modules,
//! initialised and started in dependency order, and expose capability
//! handles into a write-once service registry.

pub mod host;
pub mod module;
pub mod services;

pub use host::{LifecycleError, ModuleHost};
pub use module::{Module, ModuleError, ModuleFactory, ModuleFactoryRegistry, ModuleState};
pub use services::{
    ArtifactError, ArtifactStore, BrokerError, MessageBroker, RegistryError, Service,
    ServiceRegistry,
};
