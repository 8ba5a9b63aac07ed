//! HTTP trigger
//!
//! Registers a method and path in the shared HTTP server's route table.
//! The server module owns the listener and dispatches matching requests
//! into the engine, so this trigger's start and stop only manage the
//! route registration.

use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigMap;
use crate::engine::EngineHandle;
use crate::modules::http::{HttpServerHandle, TriggerRoute};

use super::{Target, Trigger, TriggerError, TriggerState};

/// Default service name of the shared HTTP server module
const DEFAULT_SERVER: &str = "http";

pub struct HttpTrigger {
    name: String,
    method: String,
    path: String,
    server: String,
    target: Target,
    http: OnceLock<std::sync::Arc<HttpServerHandle>>,
    state: Mutex<TriggerState>,
}

impl HttpTrigger {
    pub(crate) fn from_config(config: &ConfigMap, target: Target) -> Result<Self, TriggerError> {
        let path = config.require_str("path")?.to_string();
        let method = config.str_or("method", "POST")?.to_uppercase();
        let server = config.str_or("server", DEFAULT_SERVER)?;

        Ok(Self {
            name: format!("http:{method}:{path}"),
            method,
            path,
            server,
            target,
            http: OnceLock::new(),
            state: Mutex::new(TriggerState::Configured),
        })
    }
}

#[async_trait]
impl Trigger for HttpTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> TriggerState {
        *self.state.lock().expect("trigger state lock poisoned")
    }

    async fn configure(&self, handle: &EngineHandle) -> Result<(), TriggerError> {
        let http = handle.services().http(&self.server)?;
        http.add_route(TriggerRoute {
            method: self.method.clone(),
            path: self.path.clone(),
            workflow: self.target.workflow.clone(),
            action: self.target.action.clone(),
            params: self.target.params.clone(),
        });
        self.http.set(http).ok();
        Ok(())
    }

    async fn start(&self, _token: CancellationToken) -> Result<(), TriggerError> {
        *self.state.lock().expect("trigger state lock poisoned") = TriggerState::Started;
        Ok(())
    }

    async fn stop(&self) -> Result<(), TriggerError> {
        if let Some(http) = self.http.get() {
            http.remove_route(&self.method, &self.path);
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
    fn test_config_parsing() {
        let config = ConfigMap::from(
            match serde_json::json!({"path": "/orders", "method": "put"}) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            },
        );
        let target = Target {
            workflow: "orders".to_string(),
            action: None,
            params: Map::new(),
        };

        let trigger = HttpTrigger::from_config(&config, target).unwrap();
        assert_eq!(trigger.method, "PUT");
        assert_eq!(trigger.server, "http");
        assert_eq!(trigger.state(), TriggerState::Configured);
    }

    #[test]
    fn test_path_required() {
        let target = Target {
            workflow: "orders".to_string(),
            action: None,
            params: Map::new(),
        };
        assert!(HttpTrigger::from_config(&ConfigMap::default(), target).is_err());
    }
}
