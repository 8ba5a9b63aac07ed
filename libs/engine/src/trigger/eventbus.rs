//! Event-bus trigger
//!
//! Subscribes to a topic on the in-process event bus. Lagging behind a
//! fast publisher loses the overrun events with a warning; the
//! subscription itself stays alive.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigMap;
use crate::engine::EngineHandle;

use super::{run_for_event, Target, Trigger, TriggerError, TriggerState};

pub struct EventBusTrigger {
    name: String,
    topic: String,
    asynchronous: bool,
    target: Target,
    engine: OnceLock<EngineHandle>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    state: Mutex<TriggerState>,
}

impl EventBusTrigger {
    pub(crate) fn from_config(
        config: &ConfigMap,
        target: Target,
        asynchronous: bool,
    ) -> Result<Self, TriggerError> {
        let topic = config.require_str("topic")?.to_string();

        Ok(Self {
            name: format!("eventbus:{topic}"),
            topic,
            asynchronous,
            target,
            engine: OnceLock::new(),
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
            state: Mutex::new(TriggerState::Configured),
        })
    }
}

#[async_trait]
impl Trigger for EventBusTrigger {
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

        let mut rx = engine.event_bus().subscribe(&self.topic);
        let name = self.name.clone();
        let target = self.target.clone();
        let asynchronous = self.asynchronous;
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            let mut inflight: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                    received = rx.recv() => {
                        let event = match received {
                            Ok(event) => event,
                            Err(RecvError::Lagged(missed)) => {
                                tracing::warn!(trigger = %name, missed, "subscription lagged");
                                continue;
                            }
                            Err(RecvError::Closed) => break,
                        };

                        let data = target.event_data(event.payload);
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
    use serde_json::Map;

    #[test]
    fn test_topic_required() {
        let target = Target {
            workflow: "w".to_string(),
            action: None,
            params: Map::new(),
        };
        assert!(EventBusTrigger::from_config(&ConfigMap::default(), target, false).is_err());
    }
}
