//! Built-in step types
//!
//! A small catalogue of generally useful steps. Deployments register
//! their own factories next to these; everything domain-specific stays
//! out of the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

#[cfg(test)]
use crate::config::ConfigMap;
use crate::config::FactoryError;
use crate::context::{HttpResponseSpec, PipelineContext};
use crate::engine::EngineHandle;
use crate::template;

use super::registry::StepFactoryRegistry;
use super::{PipelineStep, StepError, StepResult};

/// Register every built-in step factory
pub fn register_builtins(registry: &mut StepFactoryRegistry) {
    registry.register(
        "step.set",
        Arc::new(|name, config, _| {
            Ok(Arc::new(SetStep {
                name: name.to_string(),
                values: config.map_or_empty("values")?,
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.log",
        Arc::new(|name, config, _| {
            let level = config.str_or("level", "info")?;
            if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
                return Err(FactoryError::BadValue {
                    key: "level".to_string(),
                    message: format!("unknown log level '{level}'"),
                });
            }
            Ok(Arc::new(LogStep {
                name: name.to_string(),
                level,
                message: config.require_str("message")?.to_string(),
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.http_response",
        Arc::new(|name, config, _| {
            let status = config.int_opt("status")?.unwrap_or(200);
            let status = u16::try_from(status).map_err(|_| FactoryError::BadValue {
                key: "status".to_string(),
                message: format!("'{status}' is not a valid HTTP status"),
            })?;
            Ok(Arc::new(HttpResponseStep {
                name: name.to_string(),
                status,
                body: config.get("body").cloned().unwrap_or(Value::Null),
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.publish",
        Arc::new(|name, config, handle| {
            Ok(Arc::new(PublishStep {
                name: name.to_string(),
                topic: config.require_str("topic")?.to_string(),
                payload: config.map_or_empty("payload")?,
                handle: handle.clone(),
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.transition",
        Arc::new(|name, config, handle| {
            Ok(Arc::new(TransitionStep {
                name: name.to_string(),
                instance: config.require_str("instance")?.to_string(),
                transition: config.require_str("transition")?.to_string(),
                data: config.map_or_empty("data")?,
                handle: handle.clone(),
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.artifact_put",
        Arc::new(|name, config, _| {
            Ok(Arc::new(ArtifactPutStep {
                name: name.to_string(),
                key: config.require_str("key")?.to_string(),
                value: config.get("value").cloned().unwrap_or(Value::Null),
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.fail",
        Arc::new(|name, config, _| {
            Ok(Arc::new(FailStep {
                name: name.to_string(),
                message: config.str_or("message", "step failed")?,
            }) as Arc<dyn PipelineStep>)
        }),
    );

    registry.register(
        "step.delay",
        Arc::new(|name, config, _| {
            let duration = config
                .duration_opt("duration")?
                .ok_or_else(|| FactoryError::MissingKey("duration".to_string()))?;
            Ok(Arc::new(DelayStep {
                name: name.to_string(),
                duration,
            }) as Arc<dyn PipelineStep>)
        }),
    );
}

// =============================================================================
// step.set
// =============================================================================

/// Resolves its configured values through the template engine and emits
/// them as output
struct SetStep {
    name: String,
    values: Map<String, Value>,
}

#[async_trait]
impl PipelineStep for SetStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let output = template::resolve_map(&self.values, pc)?;
        Ok(StepResult::with_output(output))
    }
}

// =============================================================================
// step.log
// =============================================================================

/// Logs a templated message at a configured level
struct LogStep {
    name: String,
    level: String,
    message: String,
}

#[async_trait]
impl PipelineStep for LogStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let message = template::resolve_string(&self.message, pc)?;
        match self.level.as_str() {
            "trace" => tracing::trace!(step = %self.name, "{message}"),
            "debug" => tracing::debug!(step = %self.name, "{message}"),
            "warn" => tracing::warn!(step = %self.name, "{message}"),
            "error" => tracing::error!(step = %self.name, "{message}"),
            _ => tracing::info!(step = %self.name, "{message}"),
        }
        Ok(StepResult::empty())
    }
}

// =============================================================================
// step.http_response
// =============================================================================

/// Writes the HTTP response rail and marks it handled. Only meaningful
/// in pipelines invoked by an HTTP trigger.
struct HttpResponseStep {
    name: String,
    status: u16,
    body: Value,
}

#[async_trait]
impl PipelineStep for HttpResponseStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let body = template::resolve_value(&self.body, pc)?;

        let Some(rail) = pc.rails.http.as_mut() else {
            return Err(StepError::Failed(
                "no HTTP request in this execution".to_string(),
            ));
        };
        rail.response = Some(HttpResponseSpec {
            status: self.status,
            body,
        });
        rail.handled = true;

        Ok(StepResult::empty())
    }
}

// =============================================================================
// step.publish
// =============================================================================

/// Publishes a templated payload to an event-bus topic
struct PublishStep {
    name: String,
    topic: String,
    payload: Map<String, Value>,
    handle: EngineHandle,
}

#[async_trait]
impl PipelineStep for PublishStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let topic = template::resolve_string(&self.topic, pc)?;
        let payload = template::resolve_map(&self.payload, pc)?;
        let delivered = self.handle.event_bus().publish(&topic, Value::Object(payload));

        let mut output = Map::new();
        output.insert("topic".to_string(), Value::String(topic));
        output.insert("delivered".to_string(), Value::from(delivered));
        Ok(StepResult::with_output(output))
    }
}

// =============================================================================
// step.transition
// =============================================================================

/// Drives a state-machine transition for a templated instance id
struct TransitionStep {
    name: String,
    instance: String,
    transition: String,
    data: Map<String, Value>,
    handle: EngineHandle,
}

#[async_trait]
impl PipelineStep for TransitionStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let instance_id = template::resolve_string(&self.instance, pc)?;
        let transition = template::resolve_string(&self.transition, pc)?;
        let data = template::resolve_map(&self.data, pc)?;

        let instance = self
            .handle
            .state_machines()
            .trigger_transition(&instance_id, &transition, data)
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;

        let mut output = Map::new();
        output.insert("instance".to_string(), Value::String(instance.id));
        output.insert("state".to_string(), Value::String(instance.current_state));
        output.insert("completed".to_string(), Value::Bool(instance.completed));
        Ok(StepResult::with_output(output))
    }
}

// =============================================================================
// step.artifact_put
// =============================================================================

/// Stores a templated value in the artifact store rail
struct ArtifactPutStep {
    name: String,
    key: String,
    value: Value,
}

#[async_trait]
impl PipelineStep for ArtifactPutStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let key = template::resolve_string(&self.key, pc)?;
        let value = template::resolve_value(&self.value, pc)?;

        let Some(store) = pc.rails.artifacts.as_ref() else {
            return Err(StepError::Failed(
                "no artifact store in this execution".to_string(),
            ));
        };
        store
            .put(&key, value)
            .await
            .map_err(|e| StepError::Failed(e.to_string()))?;

        let mut output = Map::new();
        output.insert("artifact_key".to_string(), Value::String(key));
        Ok(StepResult::with_output(output))
    }
}

// =============================================================================
// step.fail
// =============================================================================

/// Fails with a templated message; paired with per-step error strategies
/// to model guard steps in configs
struct FailStep {
    name: String,
    message: String,
}

#[async_trait]
impl PipelineStep for FailStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        let message = template::resolve_string(&self.message, pc)?;
        Err(StepError::Failed(message))
    }
}

// =============================================================================
// step.delay
// =============================================================================

/// Sleeps for a configured duration, honouring cancellation
struct DelayStep {
    name: String,
    duration: Duration,
}

#[async_trait]
impl PipelineStep for DelayStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        token: &CancellationToken,
        _pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError> {
        tokio::select! {
            () = token.cancelled() => Err(StepError::Cancelled),
            () = tokio::time::sleep(self.duration) => Ok(StepResult::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HttpRail;

    fn object(json: Value) -> Map<String, Value> {
        match json {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn build(tag: &str, config: Value) -> Arc<dyn PipelineStep> {
        let registry = StepFactoryRegistry::with_builtins();
        let handle = EngineHandle::for_tests();
        registry
            .create(tag, "under_test", &ConfigMap::from(object(config)), &handle)
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_step_resolves_templates() {
        let step = build(
            "step.set",
            serde_json::json!({"values": {"who": "{{ trigger.user }}", "n": 2}}),
        );
        let mut pc = PipelineContext::new(object(serde_json::json!({"user": "ada"})));

        let result = step.execute(&CancellationToken::new(), &mut pc).await.unwrap();
        assert_eq!(result.output["who"], "ada");
        assert_eq!(result.output["n"], 2);
    }

    #[tokio::test]
    async fn test_fail_step() {
        let step = build("step.fail", serde_json::json!({"message": "boom"}));
        let mut pc = PipelineContext::new(Map::new());

        let err = step
            .execute(&CancellationToken::new(), &mut pc)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Failed(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_http_response_requires_rail() {
        let step = build(
            "step.http_response",
            serde_json::json!({"status": 201, "body": {"ok": true}}),
        );

        let mut pc = PipelineContext::new(Map::new());
        assert!(step
            .execute(&CancellationToken::new(), &mut pc)
            .await
            .is_err());

        pc.rails.http = Some(HttpRail {
            method: "POST".to_string(),
            path: "/orders".to_string(),
            raw_body: Vec::new(),
            response: None,
            handled: false,
        });
        step.execute(&CancellationToken::new(), &mut pc)
            .await
            .unwrap();

        let rail = pc.rails.http.as_ref().unwrap();
        assert!(rail.handled);
        assert_eq!(rail.response.as_ref().unwrap().status, 201);
    }

    #[tokio::test]
    async fn test_publish_step_reaches_bus() {
        let handle = EngineHandle::for_tests();
        let registry = StepFactoryRegistry::with_builtins();
        let step = registry
            .create(
                "step.publish",
                "announce",
                &ConfigMap::from(object(
                    serde_json::json!({"topic": "orders", "payload": {"id": "{{ trigger.id }}"}}),
                )),
                &handle,
            )
            .unwrap();

        let mut rx = handle.event_bus().subscribe("orders");
        let mut pc = PipelineContext::new(object(serde_json::json!({"id": "o-1"})));

        let result = step.execute(&CancellationToken::new(), &mut pc).await.unwrap();
        assert_eq!(result.output["delivered"], 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload["id"], "o-1");
    }

    #[tokio::test]
    async fn test_delay_step_honours_cancellation() {
        let step = build("step.delay", serde_json::json!({"duration": "5s"}));
        let mut pc = PipelineContext::new(Map::new());

        let token = CancellationToken::new();
        token.cancel();

        let err = step.execute(&token, &mut pc).await.unwrap_err();
        assert!(matches!(err, StepError::Cancelled));
    }

    #[test]
    fn test_factory_validation() {
        let registry = StepFactoryRegistry::with_builtins();
        let handle = EngineHandle::for_tests();

        // Missing required key
        let err = registry
            .create("step.log", "l", &ConfigMap::default(), &handle)
            .err().unwrap();
        assert!(matches!(err, FactoryError::MissingKey(ref k) if k == "message"));

        // Bad enum value
        let err = registry
            .create(
                "step.log",
                "l",
                &ConfigMap::from(object(
                    serde_json::json!({"message": "hi", "level": "shout"}),
                )),
                &handle,
            )
            .err().unwrap();
        assert!(matches!(err, FactoryError::BadValue { .. }));
    }
}
