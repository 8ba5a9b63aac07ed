//! In-memory artifact store module
//!
//! Keyed storage for values produced during pipeline executions. The
//! first registered artifact store is seeded onto every execution's
//! rails.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigMap;
use crate::registry::{
    ArtifactError, ArtifactStore, Module, ModuleError, ModuleFactoryRegistry, Service,
    ServiceRegistry,
};

/// Register the `artifact.memory` factory
pub fn register(registry: &mut ModuleFactoryRegistry) {
    registry.register(
        "artifact.memory",
        Arc::new(|name: &str, _config: &ConfigMap| {
            Ok(Arc::new(MemoryArtifactModule {
                name: name.to_string(),
                store: Arc::new(MemoryArtifactStore::default()),
            }) as Arc<dyn Module>)
        }),
    );
}

/// Keyed in-memory value store
#[derive(Default)]
pub struct MemoryArtifactStore {
    entries: RwLock<HashMap<String, Value>>,
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &str, value: Value) -> Result<(), ArtifactError> {
        self.entries
            .write()
            .expect("artifact store lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, ArtifactError> {
        Ok(self
            .entries
            .read()
            .expect("artifact store lock poisoned")
            .get(key)
            .cloned())
    }
}

struct MemoryArtifactModule {
    name: String,
    store: Arc<MemoryArtifactStore>,
}

#[async_trait]
impl Module for MemoryArtifactModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, services: &ServiceRegistry) -> Result<(), ModuleError> {
        services.register(
            &self.name,
            Service::Artifacts(Arc::clone(&self.store) as Arc<dyn ArtifactStore>),
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
    async fn test_put_get() {
        let store = MemoryArtifactStore::default();
        store
            .put("report", serde_json::json!({"rows": 3}))
            .await
            .unwrap();

        let value = store.get("report").await.unwrap().unwrap();
        assert_eq!(value["rows"], 3);
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
