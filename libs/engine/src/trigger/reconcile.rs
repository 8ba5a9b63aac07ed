//! Reconciliation trigger
//!
//! Periodically diffs the state-machine store and fires the target
//! workflow once for every incomplete instance of the configured
//! workflow type. The workflow decides what "reconciled" means, usually
//! by driving transitions until the instance completes.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigMap, FactoryError};
use crate::engine::EngineHandle;

use super::{run_for_event, Target, Trigger, TriggerError, TriggerState};

pub struct ReconcileTrigger {
    name: String,
    interval: Duration,
    workflow_type: String,
    target: Target,
    engine: OnceLock<EngineHandle>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    state: Mutex<TriggerState>,
}

impl ReconcileTrigger {
    pub(crate) fn from_config(config: &ConfigMap, target: Target) -> Result<Self, TriggerError> {
        let interval = config
            .duration_opt("interval")?
            .ok_or_else(|| FactoryError::MissingKey("interval".to_string()))?;
        let workflow_type = config.require_str("workflow_type")?.to_string();

        Ok(Self {
            name: format!("reconcile:{workflow_type}"),
            interval,
            workflow_type,
            target,
            engine: OnceLock::new(),
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
            state: Mutex::new(TriggerState::Configured),
        })
    }
}

#[async_trait]
impl Trigger for ReconcileTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TriggerState {
        *self.state.lock().expect("trigger state lock poisoned")
    }

    async fn configure(&self, handle: &EngineHandle) -> Result<(), TriggerError> {
        self.engine.set(handle.clone()).ok();
        Ok(())
    }

    async fn start(&self, token: CancellationToken) -> Result<(), TriggerError> {
        let engine = self
            .engine
            .get()
            .cloned()
            .ok_or_else(|| TriggerError::Invalid("trigger not configured".to_string()))?;

        let name = self.name.clone();
        let target = self.target.clone();
        let interval = self.interval;
        let workflow_type = self.workflow_type.clone();
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }

                let pending: Vec<_> = engine
                    .state_machines()
                    .instances_of_type(&workflow_type)
                    .into_iter()
                    .filter(|instance| !instance.completed)
                    .collect();

                if !pending.is_empty() {
                    tracing::debug!(
                        trigger = %name,
                        count = pending.len(),
                        "reconciling incomplete instances"
                    );
                }

                for instance in pending {
                    if loop_token.is_cancelled() {
                        break;
                    }

                    let mut data = target.event_data(Value::Null);
                    data.insert("instance_id".to_string(), Value::String(instance.id));
                    data.insert(
                        "current_state".to_string(),
                        Value::String(instance.current_state),
                    );
                    data.insert("data".to_string(), Value::Object(instance.data));

                    run_for_event(&engine, &loop_token, &target, data, &name).await;
                }
            }
        });

        *self.task.lock().expect("task lock poisoned") = Some(task);
        *self.shutdown.lock().expect("shutdown lock poisoned") = Some(token);
        *self.state.lock().expect("trigger state lock poisoned") = TriggerState::Started;
        Ok(())
    }

    async fn stop(&self) -> Result<(), TriggerError> {
        if let Some(token) = self.shutdown.lock().expect("shutdown lock poisoned").take() {
            token.cancel();
        }
        let task = self.task.lock().expect("task lock poisoned").take();
        if let Some(task) = task {
            task.await
                .map_err(|e| TriggerError::Invalid(format!("reconcile task panicked: {e}")))?;
        }
        *self.state.lock().expect("trigger state lock poisoned") = TriggerState::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_config_requirements() {
        let target = || Target {
            workflow: "w".to_string(),
            action: None,
            params: Map::new(),
        };

        assert!(ReconcileTrigger::from_config(&ConfigMap::default(), target()).is_err());

        let config = match serde_json::json!({"interval": "1m", "workflow_type": "order"}) {
            serde_json::Value::Object(map) => ConfigMap::from(map),
            _ => unreachable!(),
        };
        let trigger = ReconcileTrigger::from_config(&config, target()).unwrap();
        assert_eq!(trigger.name(), "reconcile:order");
        assert_eq!(trigger.interval, Duration::from_secs(60));
    }
}
