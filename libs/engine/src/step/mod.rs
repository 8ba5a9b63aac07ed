//! Pipeline step contract
//!
//! A step is an opaque unit of work with a single execution operation.
//! Steps are produced by factories registered under `step.<type>` tags;
//! the factory phase is pure configuration validation so that execution
//! never sees malformed config.

pub mod builtin;
pub mod registry;

pub use registry::{StepFactory, StepFactoryRegistry};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::PipelineContext;
use crate::template::TemplateError;

// =============================================================================
// Step Result
// =============================================================================

/// Result of a successful step execution
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    /// Output merged into the current payload and kept addressable
    /// under the step's name
    pub output: Map<String, Value>,

    /// Redirect control to a sibling step instead of the next in order
    pub next_step: Option<String>,

    /// Terminate the pipeline successfully after this step
    pub stop: bool,
}

impl StepResult {
    /// An empty result: no output, continue with the next step
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result carrying output
    #[must_use]
    pub fn with_output(output: Map<String, Value>) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    /// Route to a sibling step after this one
    #[must_use]
    pub fn and_next(mut self, step: impl Into<String>) -> Self {
        self.next_step = Some(step.into());
        self
    }

    /// Terminate the pipeline successfully
    #[must_use]
    pub fn and_stop(mut self) -> Self {
        self.stop = true;
        self
    }
}

// =============================================================================
// Step Error
// =============================================================================

/// Error returned by a step execution; the pipeline's error strategy
/// decides its fate, except for cancellation which always propagates.
#[derive(Debug, Error)]
pub enum StepError {
    /// The step's work failed
    #[error("{0}")]
    Failed(String),

    /// The execution token was cancelled while the step ran
    #[error("step cancelled")]
    Cancelled,

    /// A template in the step's configuration failed to resolve
    #[error(transparent)]
    Template(#[from] TemplateError),
}

// =============================================================================
// Step Trait
// =============================================================================

/// A single unit of work inside a pipeline
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// The step's configured name, unique within its pipeline
    fn name(&self) -> &str;

    /// Execute the step. Side effects are permitted; implementations
    /// should honour the token at their own suspension points.
    async fn execute(
        &self,
        token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<StepResult, StepError>;
}
