//! Conductor workflow orchestration engine
//!
//! Compiles a declarative document (modules, workflows, connections) into
//! a running graph of cooperating components: a service registry with
//! lifecycle-managed modules, pipelines executed step by step with
//! templating and error strategies, state machines for long-running
//! business state, and triggers that translate external events into
//! pipeline invocations.

pub mod bus;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod modules;
pub mod registry;
pub mod statemachine;
pub mod step;
pub mod template;
pub mod trigger;

pub use bus::{BusEvent, EventBus};
pub use config::{ConfigDocument, ConfigError, ConfigMap, ErrorStrategy, FactoryError};
pub use context::{PipelineContext, Rails};
pub use engine::{EngineBuilder, EngineHandle, WorkflowEngine};
pub use error::EngineError;
pub use executor::{ExecutorError, Pipeline};
pub use registry::{Service, ServiceRegistry};
pub use statemachine::{StateMachineEngine, TransitionEvent};
pub use step::{PipelineStep, StepError, StepResult};
