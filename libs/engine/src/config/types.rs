//! Workflow document types
//!
//! These types are deserialized from YAML or JSON workflow documents and
//! validated before the engine builds a runtime from them. They are the
//! user-facing configuration format.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Root Document
// =============================================================================

/// Root workflow document parsed from YAML or JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConfigDocument {
    /// Module declarations materialised into the service registry
    #[serde(default)]
    pub modules: Vec<ModuleDecl>,

    /// Workflow declarations, each owning pipelines and optional triggers
    #[serde(default)]
    pub workflows: Vec<WorkflowDecl>,

    /// Directed edges asserting that one module requires another at start
    #[serde(default)]
    pub connections: Vec<ConnectionDecl>,

    /// Engine-wide tags seeded into every execution's metadata
    #[serde(default)]
    pub tags: Map<String, Value>,
}

// =============================================================================
// Modules
// =============================================================================

/// Declaration of a single module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ModuleDecl {
    /// Unique module name within the process
    pub name: String,

    /// Type tag controlling which factory builds the module
    #[serde(rename = "type")]
    pub module_type: String,

    /// Opaque module configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Names of modules this one requires at start time
    #[serde(default, alias = "dependsOn", alias = "requires")]
    pub depends_on: Vec<String>,
}

/// Directed start-time dependency between two modules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDecl {
    /// The module that requires the other
    pub from: String,

    /// The module being required
    pub to: String,
}

// =============================================================================
// Workflows
// =============================================================================

/// Declaration of a workflow: pipelines, triggers, and state machines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowDecl {
    /// Unique workflow name
    pub name: String,

    /// Pipelines owned by this workflow; pipeline names double as actions
    pub pipelines: Vec<PipelineDecl>,

    /// Triggers that invoke this workflow
    #[serde(default)]
    pub triggers: Vec<TriggerDecl>,

    /// State machine definitions registered for this workflow
    #[serde(default)]
    pub state_machines: Vec<StateMachineDecl>,
}

/// Declaration of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineDecl {
    /// Pipeline name; used as the action name for trigger routing
    pub name: String,

    /// Ordered step list
    pub steps: Vec<StepDecl>,

    /// Steps run in reverse declared order when a step fails under the
    /// `compensate` strategy
    #[serde(default)]
    pub compensation: Vec<StepDecl>,

    /// Error strategy applied when a step fails
    #[serde(default)]
    pub on_error: ErrorStrategy,

    /// Overall execution timeout (e.g. `"30s"`)
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Declaration of a pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StepDecl {
    /// Step name, unique within the pipeline
    pub name: String,

    /// Type tag resolved against the `step.<type>` factory registry
    #[serde(rename = "type")]
    pub step_type: String,

    /// Step-specific configuration, validated by the factory
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Unconditional route taken after this step succeeds, unless the
    /// step result routes elsewhere
    #[serde(default)]
    pub next: Option<String>,

    /// Per-step override of the pipeline error strategy
    #[serde(default)]
    pub on_error: Option<ErrorStrategy>,
}

/// Error strategy for a failing pipeline step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Abort the pipeline immediately
    #[default]
    Stop,

    /// Record the failure and continue with the next step
    Skip,

    /// Run the compensation steps in reverse order, then abort
    Compensate,
}

// =============================================================================
// Triggers
// =============================================================================

/// Declaration of a trigger bound to a workflow action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TriggerDecl {
    /// Trigger variant (`http`, `message`, `schedule`, `eventbus`, `reconcile`)
    #[serde(rename = "type")]
    pub trigger_type: String,

    /// Trigger-specific configuration
    #[serde(default)]
    pub config: Map<String, Value>,

    /// Target workflow; defaults to the enclosing workflow when omitted
    #[serde(default)]
    pub workflow: Option<String>,

    /// Target action (pipeline name); the workflow's first pipeline when omitted
    #[serde(default)]
    pub action: Option<String>,

    /// Dispatch each event on its own task instead of inline
    #[serde(default, rename = "async")]
    pub asynchronous: bool,

    /// Static parameters merged into every event payload
    #[serde(default)]
    pub params: Map<String, Value>,
}

// =============================================================================
// State Machines
// =============================================================================

/// Declaration of a state machine definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StateMachineDecl {
    /// Definition name, used as the workflow type of its instances
    pub name: String,

    /// Name of the state new instances start in
    pub initial_state: String,

    /// All states of the machine
    pub states: Vec<StateDecl>,

    /// Named transitions between states
    pub transitions: Vec<TransitionDecl>,
}

/// Declaration of a single state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StateDecl {
    /// State name, unique within the definition
    pub name: String,

    /// Entering this state completes the instance
    #[serde(default)]
    pub is_final: bool,

    /// This state represents a terminal failure
    #[serde(default)]
    pub is_error: bool,
}

/// Declaration of a named transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransitionDecl {
    /// Transition name, unique within the definition
    pub name: String,

    /// State the instance must currently be in
    pub from: String,

    /// State the instance moves to
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_strategy_default() {
        assert_eq!(ErrorStrategy::default(), ErrorStrategy::Stop);
    }

    #[test]
    fn test_step_decl_aliases() {
        let decl: ModuleDecl = serde_json::from_value(serde_json::json!({
            "name": "store",
            "type": "artifact.memory",
            "dependsOn": ["http"]
        }))
        .unwrap();
        assert_eq!(decl.depends_on, vec!["http"]);
    }

    #[test]
    fn test_trigger_async_flag() {
        let decl: TriggerDecl = serde_json::from_value(serde_json::json!({
            "type": "message",
            "async": true,
            "config": {"topic": "orders"}
        }))
        .unwrap();
        assert!(decl.asynchronous);
        assert!(decl.workflow.is_none());
    }
}
