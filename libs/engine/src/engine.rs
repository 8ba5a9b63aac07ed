//! Workflow engine facade
//!
//! Binds the declarative document's modules, pipelines, state machines,
//! and triggers into one runtime. The facade owns lifecycle (start,
//! stop, fail-safe reload); the cheap cloneable [`EngineHandle`] is what
//! steps, triggers, and embedding applications use to invoke workflows
//! and look up services.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::config::{
    validate_document, ConfigDocument, ConfigMap, TypeCatalogue, WorkflowDecl,
};
use crate::context::{meta, PipelineContext};
use crate::error::EngineError;
use crate::executor::{Pipeline, StepSlot};
use crate::registry::{ModuleFactoryRegistry, ModuleHost, ServiceRegistry};
use crate::statemachine::StateMachineEngine;
use crate::step::{PipelineStep, StepFactoryRegistry};
use crate::trigger::{build_trigger, trigger_types, Trigger};

// =============================================================================
// Builder
// =============================================================================

/// Assembles the factory registries an engine is built with
pub struct EngineBuilder {
    steps: StepFactoryRegistry,
    modules: ModuleFactoryRegistry,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Builder with the built-in step and module types
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: StepFactoryRegistry::with_builtins(),
            modules: ModuleFactoryRegistry::with_builtins(),
        }
    }

    /// Register an additional step factory under `step.<type>`
    #[must_use]
    pub fn with_step_factory(
        mut self,
        tag: impl Into<String>,
        factory: crate::step::StepFactory,
    ) -> Self {
        self.steps.register(tag, factory);
        self
    }

    /// Register an additional module factory
    #[must_use]
    pub fn with_module_factory(
        mut self,
        tag: impl Into<String>,
        factory: crate::registry::ModuleFactory,
    ) -> Self {
        self.modules.register(tag, factory);
        self
    }

    /// The type tags this builder knows
    #[must_use]
    pub fn type_catalogue(&self) -> TypeCatalogue {
        TypeCatalogue {
            module_types: self.modules.types(),
            step_types: self.steps.types(),
            trigger_types: trigger_types(),
        }
    }

    /// Validate a document against the known types without building
    pub fn validate(&self, doc: &ConfigDocument) -> Result<(), crate::config::ConfigError> {
        validate_document(doc, &self.type_catalogue())
    }

    /// Build an engine from a validated document
    pub fn build(self, doc: ConfigDocument) -> Result<WorkflowEngine, EngineError> {
        self.validate(&doc)?;

        let bus = Arc::new(EventBus::new());
        let shared = Arc::new(EngineShared {
            services: ServiceRegistry::new(),
            state_machines: Arc::new(StateMachineEngine::new(Arc::clone(&bus))),
            bus,
            workflows: RwLock::new(HashMap::new()),
            tags: RwLock::new(doc.tags.clone()),
            admin_router: std::sync::Mutex::new(None),
            root: CancellationToken::new(),
        });
        let handle = EngineHandle { shared };

        register_state_machines(&handle, &doc.workflows, false)?;
        let workflows = build_workflows(&doc.workflows, &self.steps, &handle)?;
        *handle.shared.workflows.write().expect("workflow map poisoned") = workflows;

        let host = ModuleHost::build(&doc.modules, &doc.connections, &self.modules)?;
        let triggers = build_triggers(&doc.workflows)?;

        Ok(WorkflowEngine {
            handle,
            runtime: tokio::sync::Mutex::new(Runtime { host, triggers }),
            steps: self.steps,
            modules: self.modules,
            document: RwLock::new(doc),
            state: RwLock::new(EngineStatus {
                state: EngineState::Created,
                started_at: None,
            }),
        })
    }
}

// =============================================================================
// Shared State & Handle
// =============================================================================

struct WorkflowRuntime {
    default_action: String,
    pipelines: HashMap<String, Arc<Pipeline>>,
}

impl WorkflowRuntime {
    fn resolve(&self, action: Option<&str>) -> Option<Arc<Pipeline>> {
        let action = action.unwrap_or(&self.default_action);
        self.pipelines.get(action).cloned()
    }
}

struct EngineShared {
    services: ServiceRegistry,
    state_machines: Arc<StateMachineEngine>,
    bus: Arc<EventBus>,
    workflows: RwLock<HashMap<String, WorkflowRuntime>>,
    tags: RwLock<Map<String, Value>>,
    admin_router: std::sync::Mutex<Option<axum::Router>>,
    root: CancellationToken,
}

/// Cheap cloneable handle to the running engine
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// The service registry
    #[must_use]
    pub fn services(&self) -> &ServiceRegistry {
        &self.shared.services
    }

    /// The state machine engine
    #[must_use]
    pub fn state_machines(&self) -> &Arc<StateMachineEngine> {
        &self.shared.state_machines
    }

    /// The in-process event bus
    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    /// A fresh execution token, cancelled when the engine shuts down
    #[must_use]
    pub fn execution_token(&self) -> CancellationToken {
        self.shared.root.child_token()
    }

    /// Build a fresh execution context from trigger data, seeding the
    /// execution id, engine tags, and the artifact store rail.
    #[must_use]
    pub fn new_context(&self, data: Map<String, Value>) -> PipelineContext {
        let mut pc = PipelineContext::new(data);

        pc.set_meta(
            meta::EXECUTION_ID,
            Value::String(Uuid::new_v4().to_string()),
        );
        for (key, value) in self.shared.tags.read().expect("tags lock poisoned").iter() {
            pc.set_meta(key, value.clone());
        }
        if let Some((name, store)) = self.shared.services.find_artifacts() {
            pc.set_meta(meta::ARTIFACT_STORE, Value::String(name));
            pc.rails.artifacts = Some(store);
        }

        pc
    }

    /// Resolve a workflow action and execute its pipeline with a fresh
    /// context built from `data`. Returns the finished context so the
    /// caller can surface outputs.
    pub async fn trigger_workflow(
        &self,
        token: &CancellationToken,
        workflow: &str,
        action: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<PipelineContext, EngineError> {
        let pc = self.new_context(data);
        self.run(token, workflow, action, pc).await
    }

    /// Execute a workflow action against an already-prepared context.
    /// This is the entry point for triggers that seed rails.
    pub async fn run(
        &self,
        token: &CancellationToken,
        workflow: &str,
        action: Option<&str>,
        mut pc: PipelineContext,
    ) -> Result<PipelineContext, EngineError> {
        let pipeline = {
            let workflows = self.shared.workflows.read().expect("workflow map poisoned");
            workflows
                .get(workflow)
                .and_then(|runtime| runtime.resolve(action))
        };
        let Some(pipeline) = pipeline else {
            return Err(EngineError::NoSuchWorkflow {
                workflow: workflow.to_string(),
                action: action.map(str::to_string),
            });
        };

        pipeline.execute(token, &mut pc).await?;
        Ok(pc)
    }

    /// A handle over empty engine state, for factory and step tests
    #[cfg(test)]
    #[must_use]
    pub(crate) fn for_tests() -> Self {
        let bus = Arc::new(EventBus::new());
        Self {
            shared: Arc::new(EngineShared {
                services: ServiceRegistry::new(),
                state_machines: Arc::new(StateMachineEngine::new(Arc::clone(&bus))),
                bus,
                workflows: RwLock::new(HashMap::new()),
                tags: RwLock::new(Map::new()),
                admin_router: std::sync::Mutex::new(None),
                root: CancellationToken::new(),
            }),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Engine lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Built, not yet started
    Created,
    /// Modules and triggers running
    Started,
    /// Shut down
    Stopped,
}

struct EngineStatus {
    state: EngineState,
    started_at: Option<DateTime<Utc>>,
}

struct Runtime {
    host: ModuleHost,
    triggers: Vec<Arc<dyn Trigger>>,
}

/// The assembled runtime: module host, trigger plane, pipelines, state
/// machines, and the shared handle
pub struct WorkflowEngine {
    handle: EngineHandle,
    runtime: tokio::sync::Mutex<Runtime>,
    steps: StepFactoryRegistry,
    modules: ModuleFactoryRegistry,
    document: RwLock<ConfigDocument>,
    state: RwLock<EngineStatus>,
}

impl WorkflowEngine {
    /// Build an engine with the default factories
    pub fn from_document(doc: ConfigDocument) -> Result<Self, EngineError> {
        EngineBuilder::new().build(doc)
    }

    /// A cloneable handle to this engine
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Convenience pass-through to [`EngineHandle::trigger_workflow`]
    pub async fn trigger_workflow(
        &self,
        token: &CancellationToken,
        workflow: &str,
        action: Option<&str>,
        data: Map<String, Value>,
    ) -> Result<PipelineContext, EngineError> {
        self.handle
            .trigger_workflow(token, workflow, action, data)
            .await
    }

    /// Start the runtime: init modules in dependency order, configure
    /// triggers, start modules, start triggers.
    pub async fn start(&self) -> Result<(), EngineError> {
        let runtime = self.runtime.lock().await;

        runtime.host.init_all(&self.handle.shared.services).await?;
        self.attach_http_services();

        for trigger in &runtime.triggers {
            trigger.configure(&self.handle).await?;
        }

        runtime.host.start_all(&self.handle.shared.root).await?;

        for trigger in &runtime.triggers {
            trigger
                .start(self.handle.shared.root.child_token())
                .await?;
            tracing::info!(trigger = %trigger.name(), "trigger started");
        }

        let mut status = self.state.write().expect("engine state lock poisoned");
        status.state = EngineState::Started;
        status.started_at = Some(Utc::now());
        Ok(())
    }

    /// Stop the runtime: triggers first (waiting for in-flight work),
    /// then modules in reverse dependency order, then cancel every
    /// outstanding execution token.
    pub async fn stop(&self) {
        let runtime = self.runtime.lock().await;
        Self::stop_runtime(&runtime).await;
        self.handle.shared.root.cancel();

        let mut status = self.state.write().expect("engine state lock poisoned");
        status.state = EngineState::Stopped;
    }

    async fn stop_runtime(runtime: &Runtime) {
        for trigger in &runtime.triggers {
            if let Err(error) = trigger.stop().await {
                tracing::error!(trigger = %trigger.name(), %error, "trigger stop failed");
            }
        }
        for (module, error) in runtime.host.stop_all().await {
            tracing::error!(module, %error, "module stop failed");
        }
    }

    /// Apply a new document without losing the running engine on
    /// failure: the new module graph is built and initialised first,
    /// and only then is the old runtime stopped and replaced.
    pub async fn reload(&self, doc: ConfigDocument) -> Result<(), EngineError> {
        self.validate(&doc)?;

        let mut runtime = self.runtime.lock().await;

        // Stage the new graph; any failure leaves the old one running
        let staging = ServiceRegistry::new();
        let new_host = ModuleHost::build(&doc.modules, &doc.connections, &self.modules)?;
        new_host.init_all(&staging).await?;

        register_state_machines(&self.handle, &doc.workflows, true)?;
        let new_workflows = build_workflows(&doc.workflows, &self.steps, &self.handle)?;
        let new_triggers = build_triggers(&doc.workflows)?;

        // Commit: tear down the old runtime, swap everything in
        Self::stop_runtime(&runtime).await;
        self.handle.shared.services.replace_with(staging);
        self.attach_http_services();
        *self
            .handle
            .shared
            .workflows
            .write()
            .expect("workflow map poisoned") = new_workflows;
        *self.handle.shared.tags.write().expect("tags lock poisoned") = doc.tags.clone();

        for trigger in &new_triggers {
            trigger.configure(&self.handle).await?;
        }
        new_host.start_all(&self.handle.shared.root).await?;
        for trigger in &new_triggers {
            trigger
                .start(self.handle.shared.root.child_token())
                .await?;
        }

        *runtime = Runtime {
            host: new_host,
            triggers: new_triggers,
        };
        *self.document.write().expect("document lock poisoned") = doc;

        tracing::info!("configuration reloaded");
        Ok(())
    }

    /// Validate a candidate document against this engine's type
    /// catalogue
    pub fn validate(&self, doc: &ConfigDocument) -> Result<(), crate::config::ConfigError> {
        validate_document(
            doc,
            &TypeCatalogue {
                module_types: self.modules.types(),
                step_types: self.steps.types(),
                trigger_types: trigger_types(),
            },
        )
    }

    /// The currently applied document
    #[must_use]
    pub fn document(&self) -> ConfigDocument {
        self.document.read().expect("document lock poisoned").clone()
    }

    /// Type catalogue for the admin surface
    #[must_use]
    pub fn catalogue(&self) -> Value {
        serde_json::json!({
            "modules": self.modules.types(),
            "steps": self.steps.types(),
            "triggers": trigger_types(),
        })
    }

    /// Engine status map for the admin surface
    pub async fn status(&self) -> Value {
        let runtime = self.runtime.lock().await;
        let (state, started_at) = {
            let status = self.state.read().expect("engine state lock poisoned");
            (status.state, status.started_at)
        };
        let uptime_seconds = started_at
            .filter(|_| state == EngineState::Started)
            .map(|at| (Utc::now() - at).num_seconds());

        let modules: Vec<Value> = runtime
            .host
            .states()
            .into_iter()
            .map(|(name, state)| serde_json::json!({"name": name, "state": state}))
            .collect();
        let triggers: Vec<Value> = runtime
            .triggers
            .iter()
            .map(|t| serde_json::json!({"name": t.name(), "state": t.state()}))
            .collect();
        let workflows: Vec<String> = {
            let map = self
                .handle
                .shared
                .workflows
                .read()
                .expect("workflow map poisoned");
            let mut names: Vec<String> = map.keys().cloned().collect();
            names.sort();
            names
        };

        serde_json::json!({
            "state": state,
            "uptime_seconds": uptime_seconds,
            "modules": modules,
            "triggers": triggers,
            "workflows": workflows,
            "services": self
                .handle
                .shared
                .services
                .catalogue()
                .into_iter()
                .map(|(name, kind)| serde_json::json!({"name": name, "capability": kind}))
                .collect::<Vec<_>>(),
            "state_machines": {
                "definitions": self.handle.shared.state_machines.definition_names(),
                "instances": self.handle.shared.state_machines.instance_count(),
            },
        })
    }

    /// Router served next to the trigger routes on every shared HTTP
    /// server. Must be set before `start`.
    pub fn set_admin_router(&self, router: axum::Router) {
        *self
            .handle
            .shared
            .admin_router
            .lock()
            .expect("admin router lock poisoned") = Some(router);
    }

    /// Give every HTTP server service the engine handle its dispatcher
    /// invokes workflows on, plus the admin router when one is set
    fn attach_http_services(&self) {
        let admin = self
            .handle
            .shared
            .admin_router
            .lock()
            .expect("admin router lock poisoned")
            .clone();

        for (name, kind) in self.handle.shared.services.catalogue() {
            if kind == "http" {
                if let Ok(http) = self.handle.shared.services.http(&name) {
                    http.attach_engine(self.handle.clone());
                    if let Some(router) = admin.clone() {
                        http.set_admin_router(router);
                    }
                }
            }
        }
    }
}

// =============================================================================
// Construction Helpers
// =============================================================================

/// Register every declared state machine definition. With
/// `skip_existing` (reload), definitions already registered are kept as
/// they are so live instances stay valid.
fn register_state_machines(
    handle: &EngineHandle,
    workflows: &[WorkflowDecl],
    skip_existing: bool,
) -> Result<(), EngineError> {
    let existing = handle.shared.state_machines.definition_names();

    for workflow in workflows {
        for decl in &workflow.state_machines {
            if skip_existing && existing.iter().any(|name| name == &decl.name) {
                tracing::debug!(definition = %decl.name, "keeping existing state machine definition");
                continue;
            }
            handle
                .shared
                .state_machines
                .register_definition(decl.into())?;
        }
    }
    Ok(())
}

fn build_workflows(
    workflows: &[WorkflowDecl],
    steps: &StepFactoryRegistry,
    handle: &EngineHandle,
) -> Result<HashMap<String, WorkflowRuntime>, EngineError> {
    let mut map = HashMap::new();

    for workflow in workflows {
        let mut pipelines = HashMap::new();

        for decl in &workflow.pipelines {
            let mut slots = Vec::with_capacity(decl.steps.len());
            for step in &decl.steps {
                let built = steps.create(
                    &step.step_type,
                    &step.name,
                    &ConfigMap::from(step.config.clone()),
                    handle,
                )?;
                slots.push(StepSlot {
                    name: step.name.clone(),
                    step: built,
                    static_next: step.next.clone(),
                    on_error: step.on_error,
                });
            }

            let mut compensation: Vec<(String, Arc<dyn PipelineStep>)> =
                Vec::with_capacity(decl.compensation.len());
            for step in &decl.compensation {
                let built = steps.create(
                    &step.step_type,
                    &step.name,
                    &ConfigMap::from(step.config.clone()),
                    handle,
                )?;
                compensation.push((step.name.clone(), built));
            }

            // Validated upstream; treat a bad duration here as absent
            let timeout = decl
                .timeout
                .as_deref()
                .and_then(|t| humantime::parse_duration(t).ok());

            let pipeline = Pipeline::new(
                format!("{}/{}", workflow.name, decl.name),
                slots,
                decl.on_error,
                compensation,
                timeout,
            )?;
            pipelines.insert(decl.name.clone(), Arc::new(pipeline));
        }

        let default_action = workflow.pipelines[0].name.clone();
        map.insert(
            workflow.name.clone(),
            WorkflowRuntime {
                default_action,
                pipelines,
            },
        );
    }

    Ok(map)
}

fn build_triggers(workflows: &[WorkflowDecl]) -> Result<Vec<Arc<dyn Trigger>>, EngineError> {
    let mut triggers = Vec::new();
    for workflow in workflows {
        for decl in &workflow.triggers {
            triggers.push(build_trigger(decl, &workflow.name)?);
        }
    }
    Ok(triggers)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::config::parse_document;

    fn object(json: Value) -> Map<String, Value> {
        match json {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn build(yaml: &str) -> WorkflowEngine {
        WorkflowEngine::from_document(parse_document(yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_trigger_workflow_end_to_end() {
        let engine = build(
            r#"
tags:
  environment: test
workflows:
  - name: greeting
    pipelines:
      - name: default
        steps:
          - name: compose
            type: step.set
            config:
              values:
                message: "hello {{ trigger.user }}"
          - name: decorate
            type: step.set
            config:
              values:
                decorated: "[{{ steps.compose.message }}]"
"#,
        );

        let pc = engine
            .trigger_workflow(
                &CancellationToken::new(),
                "greeting",
                None,
                object(serde_json::json!({"user": "ada"})),
            )
            .await
            .unwrap();

        assert_eq!(pc.current["message"], "hello ada");
        assert_eq!(pc.current["decorated"], "[hello ada]");
        assert_eq!(pc.meta("environment").unwrap(), "test");
        assert!(pc.meta(meta::EXECUTION_ID).is_some());
        assert!(pc.meta(meta::COMPLETED_AT).is_some());
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_action() {
        let engine = build(
            r#"
workflows:
  - name: greeting
    pipelines:
      - name: default
        steps:
          - name: compose
            type: step.set
"#,
        );

        let err = engine
            .trigger_workflow(&CancellationToken::new(), "missing", None, Map::new())
            .await
            .err().unwrap();
        assert!(matches!(err, EngineError::NoSuchWorkflow { .. }));

        let err = engine
            .trigger_workflow(
                &CancellationToken::new(),
                "greeting",
                Some("other"),
                Map::new(),
            )
            .await
            .err().unwrap();
        assert!(matches!(err, EngineError::NoSuchWorkflow { .. }));
    }

    #[tokio::test]
    async fn test_state_machine_driven_by_pipeline() {
        let engine = build(
            r#"
workflows:
  - name: orders
    state_machines:
      - name: order
        initial_state: new
        states:
          - name: new
          - name: submitted
          - name: done
            is_final: true
        transitions:
          - name: submit
            from: new
            to: submitted
          - name: complete
            from: submitted
            to: done
    pipelines:
      - name: submit
        steps:
          - name: advance
            type: step.transition
            config:
              instance: "{{ trigger.order_id }}"
              transition: submit
              data:
                submitted_by: "{{ trigger.user }}"
"#,
        );

        let handle = engine.handle();
        handle
            .state_machines()
            .create_workflow("order", "o-1", Map::new())
            .unwrap();

        let pc = engine
            .trigger_workflow(
                &CancellationToken::new(),
                "orders",
                Some("submit"),
                object(serde_json::json!({"order_id": "o-1", "user": "ada"})),
            )
            .await
            .unwrap();

        assert_eq!(pc.current["state"], "submitted");

        let instance = handle.state_machines().get_instance("o-1").unwrap();
        assert_eq!(instance.current_state, "submitted");
        assert_eq!(instance.data["submitted_by"], "ada");
    }

    #[tokio::test]
    async fn test_artifact_store_seeded() {
        let engine = build(
            r#"
modules:
  - name: artifacts
    type: artifact.memory
workflows:
  - name: keeper
    pipelines:
      - name: default
        steps:
          - name: save
            type: step.artifact_put
            config:
              key: "report-{{ trigger.id }}"
              value: "{{ trigger.body }}"
"#,
        );

        engine.start().await.unwrap();

        let pc = engine
            .trigger_workflow(
                &CancellationToken::new(),
                "keeper",
                None,
                object(serde_json::json!({"id": "1", "body": "contents"})),
            )
            .await
            .unwrap();
        assert_eq!(pc.current["artifact_key"], "report-1");
        assert_eq!(pc.meta(meta::ARTIFACT_STORE).unwrap(), "artifacts");

        let store = engine.handle().services().get("artifacts").unwrap();
        let store = store.as_artifacts().unwrap();
        assert_eq!(
            store.get("report-1").await.unwrap().unwrap(),
            Value::String("contents".to_string())
        );

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_message_trigger_end_to_end() {
        let engine = build(
            r#"
modules:
  - name: broker
    type: broker.memory
workflows:
  - name: orders
    pipelines:
      - name: default
        steps:
          - name: announce
            type: step.publish
            config:
              topic: out
              payload:
                id: "{{ trigger.id }}"
                via: "{{ trigger.channel }}"
    triggers:
      - type: message
        config:
          topic: in
          event: order.created
        params:
          channel: broker
"#,
        );

        engine.start().await.unwrap();

        let handle = engine.handle();
        let mut out = handle.event_bus().subscribe("out");
        let broker = handle.services().broker("broker").unwrap();

        // A non-matching event type is dropped silently
        broker
            .publish("in", serde_json::json!({"type": "order.deleted", "id": "x"}))
            .await
            .unwrap();
        // A matching one reaches the pipeline with params merged in
        broker
            .publish("in", serde_json::json!({"type": "order.created", "id": "o-7"}))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), out.recv())
            .await
            .expect("pipeline did not run")
            .unwrap();
        assert_eq!(event.payload["id"], "o-7");
        assert_eq!(event.payload["via"], "broker");

        // Only the matching event produced an execution
        assert!(out.try_recv().is_err());

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_reload_is_fail_safe() {
        let engine = build(
            r#"
workflows:
  - name: greeting
    pipelines:
      - name: default
        steps:
          - name: compose
            type: step.set
            config:
              values:
                message: "v1"
"#,
        );
        engine.start().await.unwrap();

        // Invalid new document: old runtime keeps serving
        let bad = parse_document(
            r#"
workflows:
  - name: greeting
    pipelines:
      - name: default
        steps:
          - name: compose
            type: step.does_not_exist
"#,
        )
        .unwrap();
        assert!(engine.reload(bad).await.is_err());

        let pc = engine
            .trigger_workflow(&CancellationToken::new(), "greeting", None, Map::new())
            .await
            .unwrap();
        assert_eq!(pc.current["message"], "v1");

        // Valid new document replaces the runtime
        let good = parse_document(
            r#"
workflows:
  - name: greeting
    pipelines:
      - name: default
        steps:
          - name: compose
            type: step.set
            config:
              values:
                message: "v2"
"#,
        )
        .unwrap();
        engine.reload(good).await.unwrap();

        let pc = engine
            .trigger_workflow(&CancellationToken::new(), "greeting", None, Map::new())
            .await
            .unwrap();
        assert_eq!(pc.current["message"], "v2");

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_status_shape() {
        let engine = build(
            r#"
modules:
  - name: artifacts
    type: artifact.memory
workflows:
  - name: greeting
    pipelines:
      - name: default
        steps:
          - name: compose
            type: step.set
"#,
        );
        engine.start().await.unwrap();

        let status = engine.status().await;
        assert_eq!(status["state"], "started");
        assert_eq!(status["workflows"][0], "greeting");
        assert_eq!(status["modules"][0]["state"], "started");
        assert_eq!(status["services"][0]["capability"], "artifacts");

        engine.stop().await;
        let status = engine.status().await;
        assert_eq!(status["state"], "stopped");
    }
}
