//! State machine engine
//!
//! Name-keyed definitions, id-keyed instances, and a secondary index
//! from workflow type to instance ids. One reader/writer lock guards
//! both registries; transition handlers are dispatched after the lock
//! is released.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::bus::EventBus;

use super::definition::StateMachineDefinition;
use super::instance::WorkflowInstance;

/// Event bus topic every committed transition is published on
pub const TRANSITION_TOPIC: &str = "statemachine.transition";

// =============================================================================
// Errors
// =============================================================================

/// Transition handler failure
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// State machine errors
#[derive(Debug, Error)]
pub enum StateMachineError {
    /// The definition is structurally invalid
    #[error("invalid state machine definition: {0}")]
    DefinitionInvalid(String),

    /// A definition with this name already exists
    #[error("state machine definition '{0}' already registered")]
    DuplicateDefinition(String),

    /// No definition with this name
    #[error("unknown workflow type '{0}'")]
    UnknownDefinition(String),

    /// An instance with this id already exists
    #[error("workflow instance '{0}' already exists")]
    DuplicateInstance(String),

    /// No instance with this id
    #[error("unknown workflow instance '{0}'")]
    UnknownInstance(String),

    /// The definition has no transition with this name
    #[error("unknown transition '{transition}' for workflow type '{definition}'")]
    UnknownTransition {
        /// Definition name
        definition: String,
        /// Requested transition
        transition: String,
    },

    /// The instance is not in the transition's from-state
    #[error(
        "transition '{transition}' requires state '{expected}' but instance is in '{actual}'"
    )]
    WrongFromState {
        /// Requested transition
        transition: String,
        /// The transition's from-state
        expected: String,
        /// The instance's current state
        actual: String,
    },

    /// The installed transition handler failed; the state change stands
    #[error("transition handler failed: {0}")]
    HandlerFailed(#[from] HandlerError),
}

// =============================================================================
// Transition Events
// =============================================================================

/// Notification of a committed transition.
///
/// Handlers and bus subscribers see post-transition state: by the time
/// an event is observable the instance has already advanced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Instance that transitioned
    pub instance_id: String,

    /// Definition the instance follows
    pub definition: String,

    /// Transition that fired
    pub transition: String,

    /// State before the transition
    pub from_state: String,

    /// State after the transition
    pub to_state: String,

    /// Instance data after the merge
    pub data: Map<String, Value>,

    /// When the transition committed
    pub occurred_at: DateTime<Utc>,
}

/// Callback invoked for every committed transition
#[async_trait]
pub trait TransitionHandler: Send + Sync {
    /// Observe a committed transition. An error is reported to the
    /// caller of the transition but does not rewind the state change.
    async fn on_transition(&self, event: &TransitionEvent) -> Result<(), HandlerError>;
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Default)]
struct Registries {
    definitions: HashMap<String, Arc<StateMachineDefinition>>,
    instances: HashMap<String, WorkflowInstance>,
    by_type: HashMap<String, Vec<String>>,
}

/// Registry of definitions and instances with transition dispatch
pub struct StateMachineEngine {
    registries: RwLock<Registries>,
    handler: RwLock<Option<Arc<dyn TransitionHandler>>>,
    bus: Arc<EventBus>,
}

impl StateMachineEngine {
    /// Create an engine publishing transition events on the given bus
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            registries: RwLock::new(Registries::default()),
            handler: RwLock::new(None),
            bus,
        }
    }

    /// Install the transition handler, replacing any previous one
    pub fn set_handler(&self, handler: Arc<dyn TransitionHandler>) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    /// Register a definition. Rejects unnamed or empty definitions and
    /// an initial state outside the declared states.
    pub fn register_definition(
        &self,
        definition: StateMachineDefinition,
    ) -> Result<(), StateMachineError> {
        if definition.name.is_empty() {
            return Err(StateMachineError::DefinitionInvalid(
                "definition name must not be empty".to_string(),
            ));
        }
        if definition.states.is_empty() {
            return Err(StateMachineError::DefinitionInvalid(format!(
                "definition '{}' has no states",
                definition.name
            )));
        }
        if !definition.states.contains_key(&definition.initial_state) {
            return Err(StateMachineError::DefinitionInvalid(format!(
                "initial state '{}' is not a declared state",
                definition.initial_state
            )));
        }
        for transition in definition.transitions.values() {
            for state in [&transition.from_state, &transition.to_state] {
                if !definition.states.contains_key(state) {
                    return Err(StateMachineError::DefinitionInvalid(format!(
                        "transition '{}' references unknown state '{state}'",
                        transition.name
                    )));
                }
            }
        }

        let mut registries = self.registries.write().expect("registry lock poisoned");
        if registries.definitions.contains_key(&definition.name) {
            return Err(StateMachineError::DuplicateDefinition(definition.name));
        }
        registries
            .definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Create an instance of a registered workflow type
    pub fn create_workflow(
        &self,
        workflow_type: &str,
        id: &str,
        initial_data: Map<String, Value>,
    ) -> Result<WorkflowInstance, StateMachineError> {
        let mut registries = self.registries.write().expect("registry lock poisoned");

        let definition = registries
            .definitions
            .get(workflow_type)
            .ok_or_else(|| StateMachineError::UnknownDefinition(workflow_type.to_string()))?
            .clone();

        if registries.instances.contains_key(id) {
            return Err(StateMachineError::DuplicateInstance(id.to_string()));
        }

        let mut instance =
            WorkflowInstance::new(id, workflow_type, definition.initial_state.clone(), initial_data);
        if definition
            .state(&instance.current_state)
            .is_some_and(|s| s.is_final)
        {
            instance.completed = true;
        }

        registries
            .instances
            .insert(id.to_string(), instance.clone());
        registries
            .by_type
            .entry(workflow_type.to_string())
            .or_default()
            .push(id.to_string());

        Ok(instance)
    }

    /// Trigger a named transition on an instance.
    ///
    /// The state change commits atomically under the lock; the handler
    /// runs afterwards without it. A handler error surfaces to the
    /// caller but the instance keeps its new state.
    pub async fn trigger_transition(
        &self,
        instance_id: &str,
        transition_name: &str,
        data: Map<String, Value>,
    ) -> Result<WorkflowInstance, StateMachineError> {
        let (instance, event) = {
            let mut registries = self.registries.write().expect("registry lock poisoned");

            let definition = {
                let instance = registries
                    .instances
                    .get(instance_id)
                    .ok_or_else(|| StateMachineError::UnknownInstance(instance_id.to_string()))?;
                registries
                    .definitions
                    .get(&instance.definition)
                    .ok_or_else(|| {
                        StateMachineError::UnknownDefinition(instance.definition.clone())
                    })?
                    .clone()
            };

            let instance = registries
                .instances
                .get_mut(instance_id)
                .expect("instance existence checked above");

            let transition = definition.transition(transition_name).ok_or_else(|| {
                StateMachineError::UnknownTransition {
                    definition: definition.name.clone(),
                    transition: transition_name.to_string(),
                }
            })?;

            if instance.current_state != transition.from_state {
                return Err(StateMachineError::WrongFromState {
                    transition: transition_name.to_string(),
                    expected: transition.from_state.clone(),
                    actual: instance.current_state.clone(),
                });
            }

            let now = Utc::now();
            instance.previous_state = Some(instance.current_state.clone());
            instance.current_state = transition.to_state.clone();
            instance.last_updated = now;
            for (key, value) in data {
                instance.data.insert(key, value);
            }

            if let Some(state) = definition.state(&instance.current_state) {
                if state.is_final {
                    instance.completed = true;
                    if state.is_error {
                        instance.error = Some(format!(
                            "terminal error state '{}' reached via '{transition_name}'",
                            state.name
                        ));
                    }
                }
            }

            let event = TransitionEvent {
                instance_id: instance.id.clone(),
                definition: definition.name.clone(),
                transition: transition_name.to_string(),
                from_state: transition.from_state.clone(),
                to_state: transition.to_state.clone(),
                data: instance.data.clone(),
                occurred_at: now,
            };

            (instance.clone(), event)
        };

        if let Ok(payload) = serde_json::to_value(&event) {
            self.bus.publish(TRANSITION_TOPIC, payload);
        }

        let handler = self
            .handler
            .read()
            .expect("handler lock poisoned")
            .clone();
        if let Some(handler) = handler {
            handler.on_transition(&event).await?;
        }

        Ok(instance)
    }

    /// Fetch a snapshot of an instance
    #[must_use]
    pub fn get_instance(&self, id: &str) -> Option<WorkflowInstance> {
        self.registries
            .read()
            .expect("registry lock poisoned")
            .instances
            .get(id)
            .cloned()
    }

    /// Snapshots of every instance of a workflow type
    #[must_use]
    pub fn instances_of_type(&self, workflow_type: &str) -> Vec<WorkflowInstance> {
        let registries = self.registries.read().expect("registry lock poisoned");
        registries
            .by_type
            .get(workflow_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| registries.instances.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of all registered definitions
    #[must_use]
    pub fn definition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registries
            .read()
            .expect("registry lock poisoned")
            .definitions
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Total number of instances
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.registries
            .read()
            .expect("registry lock poisoned")
            .instances
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statemachine::definition::{StateDef, TransitionDef};

    fn order_definition() -> StateMachineDefinition {
        let states = [
            ("new", false, false),
            ("submitted", false, false),
            ("done", true, false),
            ("failed", true, true),
        ]
        .iter()
        .map(|(name, is_final, is_error)| {
            (
                (*name).to_string(),
                StateDef {
                    name: (*name).to_string(),
                    is_final: *is_final,
                    is_error: *is_error,
                },
            )
        })
        .collect();

        let transitions = [
            ("submit", "new", "submitted"),
            ("complete", "submitted", "done"),
            ("reject", "submitted", "failed"),
        ]
        .iter()
        .map(|(name, from, to)| {
            (
                (*name).to_string(),
                TransitionDef {
                    name: (*name).to_string(),
                    from_state: (*from).to_string(),
                    to_state: (*to).to_string(),
                },
            )
        })
        .collect();

        StateMachineDefinition {
            name: "order".to_string(),
            initial_state: "new".to_string(),
            states,
            transitions,
        }
    }

    fn engine() -> StateMachineEngine {
        let engine = StateMachineEngine::new(Arc::new(EventBus::new()));
        engine.register_definition(order_definition()).unwrap();
        engine
    }

    #[test]
    fn test_register_rejects_bad_definitions() {
        let engine = StateMachineEngine::new(Arc::new(EventBus::new()));

        let mut unnamed = order_definition();
        unnamed.name = String::new();
        assert!(matches!(
            engine.register_definition(unnamed),
            Err(StateMachineError::DefinitionInvalid(_))
        ));

        let mut bad_initial = order_definition();
        bad_initial.initial_state = "nowhere".to_string();
        assert!(matches!(
            engine.register_definition(bad_initial),
            Err(StateMachineError::DefinitionInvalid(_))
        ));

        engine.register_definition(order_definition()).unwrap();
        assert!(matches!(
            engine.register_definition(order_definition()),
            Err(StateMachineError::DuplicateDefinition(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_advances_state() {
        let engine = engine();
        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();

        let mut data = Map::new();
        data.insert("amount".to_string(), Value::from(42));
        let instance = engine
            .trigger_transition("o-1", "submit", data)
            .await
            .unwrap();

        assert_eq!(instance.current_state, "submitted");
        assert_eq!(instance.previous_state.as_deref(), Some("new"));
        assert_eq!(instance.data["amount"], 42);
        assert!(!instance.completed);
    }

    #[tokio::test]
    async fn test_wrong_from_state_rejected() {
        let engine = engine();
        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();
        engine
            .trigger_transition("o-1", "submit", Map::new())
            .await
            .unwrap();

        // Instance is in `submitted`; `submit` requires `new`
        let err = engine
            .trigger_transition("o-1", "submit", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StateMachineError::WrongFromState { ref expected, ref actual, .. }
                if expected == "new" && actual == "submitted"
        ));

        // State unchanged
        let instance = engine.get_instance("o-1").unwrap();
        assert_eq!(instance.current_state, "submitted");
    }

    #[tokio::test]
    async fn test_final_and_error_states() {
        let engine = engine();
        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();
        engine
            .trigger_transition("o-1", "submit", Map::new())
            .await
            .unwrap();

        let instance = engine
            .trigger_transition("o-1", "reject", Map::new())
            .await
            .unwrap();
        assert!(instance.completed);
        assert!(instance.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_targets() {
        let engine = engine();

        assert!(matches!(
            engine.create_workflow("invoice", "i-1", Map::new()),
            Err(StateMachineError::UnknownDefinition(_))
        ));

        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();
        assert!(matches!(
            engine.create_workflow("order", "o-1", Map::new()),
            Err(StateMachineError::DuplicateInstance(_))
        ));

        assert!(matches!(
            engine.trigger_transition("o-9", "submit", Map::new()).await,
            Err(StateMachineError::UnknownInstance(_))
        ));
        assert!(matches!(
            engine.trigger_transition("o-1", "launch", Map::new()).await,
            Err(StateMachineError::UnknownTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_events_published() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe(TRANSITION_TOPIC);

        let engine = StateMachineEngine::new(Arc::clone(&bus));
        engine.register_definition(order_definition()).unwrap();
        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();
        engine
            .trigger_transition("o-1", "submit", Map::new())
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["transition"], "submit");
        assert_eq!(event.payload["from_state"], "new");
        assert_eq!(event.payload["to_state"], "submitted");
    }

    #[tokio::test]
    async fn test_handler_error_does_not_rewind() {
        struct RejectingHandler;

        #[async_trait]
        impl TransitionHandler for RejectingHandler {
            async fn on_transition(&self, _event: &TransitionEvent) -> Result<(), HandlerError> {
                Err(HandlerError("downstream unavailable".to_string()))
            }
        }

        let engine = engine();
        engine.set_handler(Arc::new(RejectingHandler));
        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();

        let err = engine
            .trigger_transition("o-1", "submit", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StateMachineError::HandlerFailed(_)));

        // Handlers see post-transition state; the commit stands
        let instance = engine.get_instance("o-1").unwrap();
        assert_eq!(instance.current_state, "submitted");
    }

    #[tokio::test]
    async fn test_type_index() {
        let engine = engine();
        engine
            .create_workflow("order", "o-1", Map::new())
            .unwrap();
        engine
            .create_workflow("order", "o-2", Map::new())
            .unwrap();

        let instances = engine.instances_of_type("order");
        assert_eq!(instances.len(), 2);
        assert!(engine.instances_of_type("invoice").is_empty());
        assert_eq!(engine.instance_count(), 2);
    }
}
