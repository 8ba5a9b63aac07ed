//! Module host
//!
//! Owns every module for the engine's lifetime. Builds the dependency
//! graph from declarations and connections, computes a topological
//! order, and drives init/start in that order and stop in reverse.

use std::collections::HashMap;
use std::sync::RwLock;

use petgraph::algo;
use petgraph::graph::DiGraph;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionDecl, ModuleDecl};

use super::module::{Module, ModuleError, ModuleFactoryRegistry, ModuleState};
use super::services::ServiceRegistry;

// =============================================================================
// Errors
// =============================================================================

/// Module graph and lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The dependency graph has a cycle
    #[error("cyclic module graph involving: {}", cycle.join(" -> "))]
    CyclicModuleGraph {
        /// Modules on the cycle
        cycle: Vec<String>,
    },

    /// A declared dependency does not exist
    #[error("module '{module}' depends on unknown module '{missing}'")]
    UnknownDependency {
        /// Depending module
        module: String,
        /// Missing dependency
        missing: String,
    },

    /// Two modules share a name
    #[error("duplicate module name '{0}'")]
    DuplicateName(String),

    /// No factory for the declared type
    #[error("unknown module type '{0}'")]
    UnknownModuleType(String),

    /// A factory rejected its configuration
    #[error("module '{module}' configuration rejected: {source}")]
    Factory {
        /// Module name
        module: String,
        /// Factory error
        #[source]
        source: ModuleError,
    },

    /// Init failed; startup aborts
    #[error("module '{module}' failed to initialise: {source}")]
    Init {
        /// Module name
        module: String,
        /// Module error
        #[source]
        source: ModuleError,
    },

    /// Start failed; startup aborts
    #[error("module '{module}' failed to start: {source}")]
    Start {
        /// Module name
        module: String,
        /// Module error
        #[source]
        source: ModuleError,
    },
}

// =============================================================================
// Host
// =============================================================================

struct Entry {
    name: String,
    module_type: String,
    module: std::sync::Arc<dyn Module>,
}

/// Owns the module arena and drives lifecycle in dependency order
pub struct ModuleHost {
    /// Arena of modules; `order` indexes into it
    entries: Vec<Entry>,

    /// Topological order: dependencies before dependents
    order: Vec<usize>,

    /// Lifecycle state per arena slot
    states: RwLock<Vec<ModuleState>>,
}

impl ModuleHost {
    /// Build the host from declarations.
    ///
    /// Factories run here (pure validation); nothing is initialised or
    /// started yet.
    pub fn build(
        decls: &[ModuleDecl],
        connections: &[ConnectionDecl],
        factories: &ModuleFactoryRegistry,
    ) -> Result<Self, LifecycleError> {
        let mut entries = Vec::with_capacity(decls.len());
        let mut index_of: HashMap<&str, usize> = HashMap::new();

        for decl in decls {
            if index_of.contains_key(decl.name.as_str()) {
                return Err(LifecycleError::DuplicateName(decl.name.clone()));
            }
            if !factories.contains(&decl.module_type) {
                return Err(LifecycleError::UnknownModuleType(decl.module_type.clone()));
            }

            let module = factories
                .create(
                    &decl.module_type,
                    &decl.name,
                    &decl.config.clone().into(),
                )
                .map_err(|source| LifecycleError::Factory {
                    module: decl.name.clone(),
                    source,
                })?;

            index_of.insert(decl.name.as_str(), entries.len());
            entries.push(Entry {
                name: decl.name.clone(),
                module_type: decl.module_type.clone(),
                module,
            });
        }

        // Dependency edges: declaration order plus connections
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for decl in decls {
            let from = index_of[decl.name.as_str()];
            for dep in &decl.depends_on {
                let to = *index_of.get(dep.as_str()).ok_or_else(|| {
                    LifecycleError::UnknownDependency {
                        module: decl.name.clone(),
                        missing: dep.clone(),
                    }
                })?;
                edges.push((from, to));
            }
        }
        for conn in connections {
            let from = *index_of.get(conn.from.as_str()).ok_or_else(|| {
                LifecycleError::UnknownDependency {
                    module: conn.from.clone(),
                    missing: conn.from.clone(),
                }
            })?;
            let to = *index_of.get(conn.to.as_str()).ok_or_else(|| {
                LifecycleError::UnknownDependency {
                    module: conn.from.clone(),
                    missing: conn.to.clone(),
                }
            })?;
            edges.push((from, to));
        }

        let order = topological_order(&entries, &edges)?;
        let states = RwLock::new(vec![ModuleState::Created; entries.len()]);

        Ok(Self {
            entries,
            order,
            states,
        })
    }

    /// Initialise every module in dependency order. Registration only;
    /// a failure aborts and leaves the failing module marked.
    pub async fn init_all(&self, services: &ServiceRegistry) -> Result<(), LifecycleError> {
        for &idx in &self.order {
            let entry = &self.entries[idx];
            tracing::debug!(module = %entry.name, "initialising module");

            if let Err(source) = entry.module.init(services).await {
                self.set_state(idx, ModuleState::Failed);
                return Err(LifecycleError::Init {
                    module: entry.name.clone(),
                    source,
                });
            }
            self.set_state(idx, ModuleState::Initialised);
        }
        Ok(())
    }

    /// Start every module in dependency order
    pub async fn start_all(&self, token: &CancellationToken) -> Result<(), LifecycleError> {
        for &idx in &self.order {
            let entry = &self.entries[idx];
            tracing::info!(module = %entry.name, kind = %entry.module_type, "starting module");

            if let Err(source) = entry.module.start(token.child_token()).await {
                self.set_state(idx, ModuleState::Failed);
                return Err(LifecycleError::Start {
                    module: entry.name.clone(),
                    source,
                });
            }
            self.set_state(idx, ModuleState::Started);
        }
        Ok(())
    }

    /// Stop every module in reverse dependency order. Best-effort: no
    /// stop is skipped because an earlier one failed; failures are
    /// returned for reporting.
    pub async fn stop_all(&self) -> Vec<(String, ModuleError)> {
        let mut failures = Vec::new();

        for &idx in self.order.iter().rev() {
            let entry = &self.entries[idx];
            tracing::info!(module = %entry.name, "stopping module");

            match entry.module.stop().await {
                Ok(()) => self.set_state(idx, ModuleState::Stopped),
                Err(error) => {
                    self.set_state(idx, ModuleState::Failed);
                    failures.push((entry.name.clone(), error));
                }
            }
        }

        failures
    }

    /// Lifecycle state of every module, in declaration order
    #[must_use]
    pub fn states(&self) -> Vec<(String, ModuleState)> {
        let states = self.states.read().expect("module state lock poisoned");
        self.entries
            .iter()
            .zip(states.iter())
            .map(|(entry, state)| (entry.name.clone(), *state))
            .collect()
    }

    /// Number of modules in the host
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the host holds no modules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set_state(&self, idx: usize, state: ModuleState) {
        self.states.write().expect("module state lock poisoned")[idx] = state;
    }
}

/// Topological order with dependencies first
fn topological_order(
    entries: &[Entry],
    edges: &[(usize, usize)],
) -> Result<Vec<usize>, LifecycleError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<_> = (0..entries.len()).map(|i| graph.add_node(i)).collect();

    for &(from, to) in edges {
        graph.add_edge(nodes[from], nodes[to], ());
    }

    match algo::toposort(&graph, None) {
        // Edges point from dependent to dependency, so reverse to get
        // dependencies first
        Ok(sorted) => Ok(sorted.into_iter().rev().map(|n| graph[n]).collect()),
        Err(_) => {
            let sccs = algo::kosaraju_scc(&graph);
            let cycle = sccs
                .iter()
                .find(|scc| scc.len() > 1)
                .map(|scc| {
                    scc.iter()
                        .map(|&n| entries[graph[n]].name.clone())
                        .collect()
                })
                .unwrap_or_default();
            Err(LifecycleError::CyclicModuleGraph { cycle })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::Map;

    use crate::config::ConfigMap;

    /// Records lifecycle calls in a shared log
    struct ProbeModule {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_stop: bool,
    }

    #[async_trait]
    impl Module for ProbeModule {
        fn name(&self) -> &str {
            &self.name
        }

        async fn init(&self, _services: &ServiceRegistry) -> Result<(), ModuleError> {
            self.log.lock().unwrap().push(format!("init:{}", self.name));
            Ok(())
        }

        async fn start(&self, _token: CancellationToken) -> Result<(), ModuleError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) -> Result<(), ModuleError> {
            self.log.lock().unwrap().push(format!("stop:{}", self.name));
            if self.fail_stop {
                return Err(ModuleError::Other("stop failed".to_string()));
            }
            Ok(())
        }
    }

    fn probe_registry(log: &Arc<Mutex<Vec<String>>>) -> ModuleFactoryRegistry {
        let mut registry = ModuleFactoryRegistry::new();
        let log = Arc::clone(log);
        registry.register(
            "probe",
            Arc::new(move |name: &str, config: &ConfigMap| {
                Ok(Arc::new(ProbeModule {
                    name: name.to_string(),
                    log: Arc::clone(&log),
                    fail_stop: config.bool_or("fail_stop", false)?,
                }) as Arc<dyn Module>)
            }),
        );
        registry
    }

    fn decl(name: &str, deps: &[&str]) -> ModuleDecl {
        ModuleDecl {
            name: name.to_string(),
            module_type: "probe".to_string(),
            config: Map::new(),
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = probe_registry(&log);

        // c depends on b depends on a; declaration order is shuffled
        let decls = vec![decl("c", &["b"]), decl("a", &[]), decl("b", &["a"])];
        let host = ModuleHost::build(&decls, &[], &registry).unwrap();

        let services = ServiceRegistry::new();
        host.init_all(&services).await.unwrap();
        host.start_all(&CancellationToken::new()).await.unwrap();
        let failures = host.stop_all().await;
        assert!(failures.is_empty());

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "init:a", "init:b", "init:c", "start:a", "start:b", "start:c", "stop:c",
                "stop:b", "stop:a",
            ]
        );
    }

    #[tokio::test]
    async fn test_connections_are_edges() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = probe_registry(&log);

        let decls = vec![decl("x", &[]), decl("y", &[])];
        let connections = vec![ConnectionDecl {
            from: "x".to_string(),
            to: "y".to_string(),
        }];
        let host = ModuleHost::build(&decls, &connections, &registry).unwrap();

        let services = ServiceRegistry::new();
        host.init_all(&services).await.unwrap();

        // x requires y, so y initialises first
        assert_eq!(*log.lock().unwrap(), vec!["init:y", "init:x"]);
    }

    #[test]
    fn test_cycle_detected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = probe_registry(&log);

        let decls = vec![decl("a", &["b"]), decl("b", &["a"])];
        let err = ModuleHost::build(&decls, &[], &registry).err().unwrap();
        assert!(matches!(err, LifecycleError::CyclicModuleGraph { .. }));
    }

    #[test]
    fn test_unknown_dependency() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = probe_registry(&log);

        let decls = vec![decl("a", &["ghost"])];
        let err = ModuleHost::build(&decls, &[], &registry).err().unwrap();
        assert!(matches!(
            err,
            LifecycleError::UnknownDependency { ref missing, .. } if missing == "ghost"
        ));
    }

    #[test]
    fn test_duplicate_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = probe_registry(&log);

        let decls = vec![decl("a", &[]), decl("a", &[])];
        let err = ModuleHost::build(&decls, &[], &registry).err().unwrap();
        assert!(matches!(err, LifecycleError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn test_stop_is_best_effort() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = probe_registry(&log);

        let mut failing = decl("b", &["a"]);
        failing
            .config
            .insert("fail_stop".to_string(), serde_json::Value::Bool(true));
        let decls = vec![decl("a", &[]), failing];

        let host = ModuleHost::build(&decls, &[], &registry).unwrap();
        let services = ServiceRegistry::new();
        host.init_all(&services).await.unwrap();

        let failures = host.stop_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "b");

        // a was still stopped after b's failure
        let log = log.lock().unwrap();
        assert!(log.contains(&"stop:a".to_string()));
    }
}
