//! Message-subscription trigger
//!
//! Subscribes to a broker topic and invokes the target workflow for
//! each message. Supports an event-type filter that drops non-matching
//! messages without consuming workflow resources, and sync or async
//! dispatch per configuration.

use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigMap;
use crate::engine::EngineHandle;
use crate::registry::MessageBroker;

use super::{run_for_event, Target, Trigger, TriggerError, TriggerState};

/// Default service name of the broker module
const DEFAULT_BROKER: &str = "broker";

pub struct MessageTrigger {
    name: String,
    broker_service: String,
    topic: String,
    event_filter: Option<String>,
    asynchronous: bool,
    target: Target,
    engine: OnceLock<EngineHandle>,
    broker: OnceLock<Arc<dyn MessageBroker>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    state: Mutex<TriggerState>,
}

impl MessageTrigger {
    pub(crate) fn from_config(
        config: &ConfigMap,
        target: Target,
        asynchronous: bool,
    ) -> Result<Self, TriggerError> {
        let topic = config.require_str("topic")?.to_string();

        Ok(Self {
            name: format!("message:{topic}"),
            broker_service: config.str_or("broker", DEFAULT_BROKER)?,
            topic,
            event_filter: config.str_opt("event")?.map(str::to_string),
            asynchronous,
            target,
            engine: OnceLock::new(),
            broker: OnceLock::new(),
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
            state: Mutex::new(TriggerState::Configured),
        })
    }

    /// Whether a payload passes the configured event-type filter.
    /// The type is read from `type`, falling back to `eventType`.
    fn matches_filter(filter: Option<&str>, payload: &Value) -> bool {
        let Some(required) = filter else {
            return true;
        };
        let event_type = payload
            .get("type")
            .or_else(|| payload.get("eventType"))
            .and_then(Value::as_str);
        event_type == Some(required)
    }
}

#[async_trait]
impl Trigger for MessageTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TriggerState {
        *self.state.lock().expect("trigger state lock poisoned")
    }

    async fn configure(&self, handle: &EngineHandle) -> Result<(), TriggerError> {
        let broker = handle.services().broker(&self.broker_service)?;
        self.broker.set(broker).ok();
        self.engine.set(handle.clone()).ok();
        Ok(())
    }

    async fn start(&self, token: CancellationToken) -> Result<(), TriggerError> {
        let broker = self
            .broker
            .get()
            .ok_or_else(|| TriggerError::Invalid("trigger not configured".to_string()))?;
        let engine = self
            .engine
            .get()
            .cloned()
            .ok_or_else(|| TriggerError::Invalid("trigger not configured".to_string()))?;

        let mut rx = broker.subscribe(&self.topic);
        let name = self.name.clone();
        let filter = self.event_filter.clone();
        let asynchronous = self.asynchronous;
        let target = self.target.clone();
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            let mut inflight: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                    received = rx.recv() => {
                        let Some(payload) = received else { break };

                        if !Self::matches_filter(filter.as_deref(), &payload) {
                            tracing::trace!(trigger = %name, "dropping non-matching event");
                            continue;
                        }

                        let data = target.event_data(payload);
                        if asynchronous {
                            let engine = engine.clone();
                            let target = target.clone();
                            let name = name.clone();
                            let token = loop_token.clone();
                            inflight.spawn(async move {
                                run_for_event(&engine, &token, &target, data, &name).await;
                            });
                        } else {
                            run_for_event(&engine, &loop_token, &target, data, &name).await;
                        }
                    }
                }
            }

            // Wait for in-flight executions before declaring stopped
            while inflight.join_next().await.is_some() {}
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
                .map_err(|e| TriggerError::Invalid(format!("subscription task panicked: {e}")))?;
        }
        *self.state.lock().expect("trigger state lock poisoned") = TriggerState::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let payload = serde_json::json!({"type": "order.created", "id": 1});
        assert!(MessageTrigger::matches_filter(None, &payload));
        assert!(MessageTrigger::matches_filter(
            Some("order.created"),
            &payload
        ));
        assert!(!MessageTrigger::matches_filter(
            Some("order.deleted"),
            &payload
        ));

        // Fallback to eventType
        let payload = serde_json::json!({"eventType": "order.created"});
        assert!(MessageTrigger::matches_filter(
            Some("order.created"),
            &payload
        ));

        // No type at all never matches a filter
        let payload = serde_json::json!({"id": 1});
        assert!(!MessageTrigger::matches_filter(Some("anything"), &payload));
    }

    #[test]
    fn test_topic_required() {
        let target = Target {
            workflow: "w".to_string(),
            action: None,
            params: serde_json::Map::new(),
        };
        assert!(MessageTrigger::from_config(&ConfigMap::default(), target, false).is_err());
    }
}
