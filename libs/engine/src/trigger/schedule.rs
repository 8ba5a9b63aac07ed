//! Scheduled trigger
//!
//! Fires the target workflow on a fixed interval or a cron expression.
//! Executions run inline on the schedule loop, so one slow run cannot
//! overlap the next tick; a failed run is logged and the schedule keeps
//! going.

use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigMap, FactoryError};
use crate::engine::EngineHandle;

use super::{run_for_event, Target, Trigger, TriggerError, TriggerState};

#[derive(Clone)]
enum Schedule {
    Interval(Duration),
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Time until the next firing, measured from now. `None` means the
    /// schedule has no upcoming firings.
    fn next_delay(&self) -> Option<Duration> {
        match self {
            Self::Interval(interval) => Some(*interval),
            Self::Cron(schedule) => {
                let next = schedule.upcoming(Utc).next()?;
                Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

pub struct ScheduleTrigger {
    name: String,
    schedule: Schedule,
    target: Target,
    engine: OnceLock<EngineHandle>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Mutex<Option<CancellationToken>>,
    state: Mutex<TriggerState>,
}

impl ScheduleTrigger {
    pub(crate) fn from_config(config: &ConfigMap, target: Target) -> Result<Self, TriggerError> {
        let interval = config.duration_opt("interval")?;
        let cron_expr = config.str_opt("cron")?;

        let (name, schedule) = match (interval, cron_expr) {
            (Some(_), Some(_)) => {
                return Err(TriggerError::Config(FactoryError::BadValue {
                    key: "interval".to_string(),
                    message: "set either 'interval' or 'cron', not both".to_string(),
                }))
            }
            (Some(interval), None) => (
                format!("schedule:every:{}", humantime::format_duration(interval)),
                Schedule::Interval(interval),
            ),
            (None, Some(expr)) => {
                let parsed = cron::Schedule::from_str(expr).map_err(|e| {
                    TriggerError::Config(FactoryError::BadValue {
                        key: "cron".to_string(),
                        message: e.to_string(),
                    })
                })?;
                (format!("schedule:cron:{expr}"), Schedule::Cron(Box::new(parsed)))
            }
            (None, None) => {
                return Err(TriggerError::Config(FactoryError::MissingKey(
                    "interval".to_string(),
                )))
            }
        };

        Ok(Self {
            name,
            schedule,
            target,
            engine: OnceLock::new(),
            task: Mutex::new(None),
            shutdown: Mutex::new(None),
            state: Mutex::new(TriggerState::Configured),
        })
    }
}

#[async_trait]
impl Trigger for ScheduleTrigger {
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
        let schedule = self.schedule.clone();
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            loop {
                let Some(delay) = schedule.next_delay() else {
                    tracing::warn!(trigger = %name, "schedule has no upcoming firings");
                    break;
                };

                tokio::select! {
                    () = loop_token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                let mut data = target.event_data(Value::Null);
                data.insert(
                    "scheduled_at".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );

                // Inline execution: the next tick waits for this run,
                // which is what prevents overlap per trigger
                run_for_event(&engine, &loop_token, &target, data, &name).await;
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
                .map_err(|e| TriggerError::Invalid(format!("schedule task panicked: {e}")))?;
        }
        *self.state.lock().expect("trigger state lock poisoned") = TriggerState::Stopped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn target() -> Target {
        Target {
            workflow: "w".to_string(),
            action: None,
            params: Map::new(),
        }
    }

    fn config(json: serde_json::Value) -> ConfigMap {
        match json {
            serde_json::Value::Object(map) => ConfigMap::from(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_interval_schedule() {
        let trigger =
            ScheduleTrigger::from_config(&config(serde_json::json!({"interval": "30s"})), target())
                .unwrap();
        assert_eq!(trigger.schedule.next_delay(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_cron_schedule() {
        let trigger = ScheduleTrigger::from_config(
            &config(serde_json::json!({"cron": "0 0 * * * *"})),
            target(),
        )
        .unwrap();
        assert!(trigger.schedule.next_delay().is_some());
        assert!(trigger.name().starts_with("schedule:cron:"));
    }

    #[test]
    fn test_invalid_configurations() {
        assert!(ScheduleTrigger::from_config(&ConfigMap::default(), target()).is_err());
        assert!(ScheduleTrigger::from_config(
            &config(serde_json::json!({"cron": "not a cron"})),
            target()
        )
        .is_err());
        assert!(ScheduleTrigger::from_config(
            &config(serde_json::json!({"interval": "10s", "cron": "0 0 * * * *"})),
            target()
        )
        .is_err());
    }
}
