//! Engine error taxonomy
//!
//! Each subsystem defines its own error type next to its code; this
//! module aggregates them into the single error the facade returns to
//! callers and triggers translate to their ingress protocols.

use thiserror::Error;

use crate::config::{ConfigError, FactoryError};
use crate::executor::ExecutorError;
use crate::registry::{LifecycleError, RegistryError};
use crate::statemachine::StateMachineError;
use crate::template::TemplateError;
use crate::trigger::TriggerError;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// The declarative document failed to parse or validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A step factory rejected its configuration
    #[error(transparent)]
    Factory(#[from] FactoryError),

    /// Module graph construction or lifecycle failed
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Service registry failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Template resolution failure
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// Pipeline execution failure, including cancellation
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// State machine failure
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    /// Trigger configuration or lifecycle failure
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// A trigger or caller referenced a workflow or action that does
    /// not exist
    #[error("no such workflow '{workflow}'{}", action.as_ref().map(|a| format!(" action '{a}'")).unwrap_or_default())]
    NoSuchWorkflow {
        /// Requested workflow
        workflow: String,
        /// Requested action, when one was named
        action: Option<String>,
    },
}
