//! Built-in module types
//!
//! Concrete integrations live outside the engine as modules obeying the
//! lifecycle contract. These built-ins cover the capabilities the engine
//! itself needs to be useful out of the box: a shared HTTP server, an
//! in-process message broker, and an in-memory artifact store.

pub mod artifact;
pub mod broker;
pub mod http;

use crate::registry::ModuleFactoryRegistry;

/// Register every built-in module factory
pub fn register_builtins(registry: &mut ModuleFactoryRegistry) {
    http::register(registry);
    broker::register(registry);
    artifact::register(registry);
}
