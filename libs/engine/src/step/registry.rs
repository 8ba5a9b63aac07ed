//! Step factory registry
//!
//! Factories build steps from declarative config. They are registered
//! under `step.<type>` tags, a namespace separate from module names.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConfigMap, FactoryError};
use crate::engine::EngineHandle;

use super::builtin;
use super::PipelineStep;

/// A step factory: validates declarative config and produces a step.
/// No I/O happens here; factories only check and coerce configuration.
pub type StepFactory = Arc<
    dyn Fn(&str, &ConfigMap, &EngineHandle) -> Result<Arc<dyn PipelineStep>, FactoryError>
        + Send
        + Sync,
>;

/// Registry of step factories keyed by `step.<type>` tags
#[derive(Default)]
pub struct StepFactoryRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepFactoryRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the built-in step types
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under a type tag. Later registrations replace
    /// earlier ones, which is how deployments override a built-in.
    pub fn register(&mut self, tag: impl Into<String>, factory: StepFactory) {
        self.factories.insert(tag.into(), factory);
    }

    /// Build a step of the given type
    pub fn create(
        &self,
        tag: &str,
        name: &str,
        config: &ConfigMap,
        handle: &EngineHandle,
    ) -> Result<Arc<dyn PipelineStep>, FactoryError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| FactoryError::UnknownType(tag.to_string()))?;
        factory(name, config, handle)
    }

    /// All registered type tags, sorted for stable catalogue output
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = StepFactoryRegistry::with_builtins();
        let types = registry.types();

        for expected in [
            "step.artifact_put",
            "step.delay",
            "step.fail",
            "step.http_response",
            "step.log",
            "step.publish",
            "step.set",
            "step.transition",
        ] {
            assert!(types.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_unknown_type() {
        let registry = StepFactoryRegistry::with_builtins();
        let handle = EngineHandle::for_tests();

        let err = registry
            .create("step.nope", "s", &ConfigMap::default(), &handle)
            .err().unwrap();
        assert!(matches!(err, FactoryError::UnknownType(_)));
    }
}
