//! Trigger plane
//!
//! Triggers own an ingress mechanism and convert incoming events into
//! pipeline invocations through the engine facade. Every variant obeys
//! the same contract: configure against the engine, start observing the
//! token, stop cancelling in-flight work and waiting for it to exit.

pub mod eventbus;
pub mod http;
pub mod message;
pub mod reconcile;
pub mod schedule;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{FactoryError, TriggerDecl};
use crate::engine::EngineHandle;
use crate::registry::RegistryError;

// =============================================================================
// Contract
// =============================================================================

/// Trigger lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Built and configured, not yet delivering events
    Configured,
    /// Delivering events
    Started,
    /// Stopped; in-flight work has exited
    Stopped,
}

/// Trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Declarative configuration rejected
    #[error(transparent)]
    Config(#[from] FactoryError),

    /// A referenced service is missing or of the wrong kind
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Anything else
    #[error("{0}")]
    Invalid(String),
}

/// A source of external events bound to a workflow action
#[async_trait]
pub trait Trigger: Send + Sync {
    /// Identifying name for logs and status output
    fn name(&self) -> &str;

    /// Current lifecycle state
    fn state(&self) -> TriggerState;

    /// Resolve services and register ingress; called after module init
    async fn configure(&self, handle: &EngineHandle) -> Result<(), TriggerError>;

    /// Begin delivering events. Long-running ingress must observe the
    /// token.
    async fn start(&self, token: CancellationToken) -> Result<(), TriggerError>;

    /// Cancel in-flight subscriptions and wait for their tasks to exit
    async fn stop(&self) -> Result<(), TriggerError>;
}

// =============================================================================
// Construction
// =============================================================================

/// The trigger type tags the engine knows
#[must_use]
pub fn trigger_types() -> Vec<String> {
    ["eventbus", "http", "message", "reconcile", "schedule"]
        .iter()
        .map(|t| (*t).to_string())
        .collect()
}

/// Workflow binding shared by every trigger variant
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub workflow: String,
    pub action: Option<String>,
    pub params: Map<String, Value>,
}

impl Target {
    fn from_decl(decl: &TriggerDecl, enclosing_workflow: &str) -> Self {
        Self {
            workflow: decl
                .workflow
                .clone()
                .unwrap_or_else(|| enclosing_workflow.to_string()),
            action: decl.action.clone(),
            params: decl.params.clone(),
        }
    }

    /// Merge an event payload over the static params. Object payloads
    /// merge at the top level with event fields winning; anything else
    /// lands under `payload`.
    pub fn event_data(&self, payload: Value) -> Map<String, Value> {
        let mut data = self.params.clone();
        match payload {
            Value::Object(map) => {
                for (key, value) in map {
                    data.insert(key, value);
                }
            }
            Value::Null => {}
            other => {
                data.insert("payload".to_string(), other);
            }
        }
        data
    }
}

/// Build a trigger from its declaration. Pure configuration validation;
/// service lookups happen later in `configure`.
pub fn build_trigger(
    decl: &TriggerDecl,
    enclosing_workflow: &str,
) -> Result<Arc<dyn Trigger>, TriggerError> {
    let config = crate::config::ConfigMap::from(decl.config.clone());
    let target = Target::from_decl(decl, enclosing_workflow);

    match decl.trigger_type.as_str() {
        "http" => Ok(Arc::new(http::HttpTrigger::from_config(&config, target)?)),
        "message" => Ok(Arc::new(message::MessageTrigger::from_config(
            &config,
            target,
            decl.asynchronous,
        )?)),
        "schedule" => Ok(Arc::new(schedule::ScheduleTrigger::from_config(
            &config, target,
        )?)),
        "eventbus" => Ok(Arc::new(eventbus::EventBusTrigger::from_config(
            &config,
            target,
            decl.asynchronous,
        )?)),
        "reconcile" => Ok(Arc::new(reconcile::ReconcileTrigger::from_config(
            &config, target,
        )?)),
        other => Err(TriggerError::Config(FactoryError::UnknownType(
            other.to_string(),
        ))),
    }
}

/// Run a workflow for one event, logging the outcome. Used by every
/// trigger whose ingress protocol has no response channel.
pub(crate) async fn run_for_event(
    handle: &EngineHandle,
    token: &CancellationToken,
    target: &Target,
    data: Map<String, Value>,
    trigger: &str,
) {
    match handle
        .trigger_workflow(token, &target.workflow, target.action.as_deref(), data)
        .await
    {
        Ok(_) => {
            tracing::debug!(trigger, workflow = %target.workflow, "workflow completed");
        }
        Err(error) => {
            tracing::error!(trigger, workflow = %target.workflow, %error, "workflow failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_data_merging() {
        let mut params = Map::new();
        params.insert("source".to_string(), Value::String("static".to_string()));
        params.insert("kind".to_string(), Value::String("default".to_string()));

        let target = Target {
            workflow: "w".to_string(),
            action: None,
            params,
        };

        // Event fields win over static params
        let data = target.event_data(serde_json::json!({"kind": "event", "id": 7}));
        assert_eq!(data["source"], "static");
        assert_eq!(data["kind"], "event");
        assert_eq!(data["id"], 7);

        // Non-object payloads land under `payload`
        let data = target.event_data(Value::String("raw".to_string()));
        assert_eq!(data["payload"], "raw");
        assert_eq!(data["source"], "static");
    }

    #[test]
    fn test_unknown_trigger_type() {
        let decl: TriggerDecl = serde_json::from_value(serde_json::json!({
            "type": "carrier-pigeon"
        }))
        .unwrap();

        assert!(build_trigger(&decl, "w").is_err());
    }
}
