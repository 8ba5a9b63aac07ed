//! Pipeline executor
//!
//! Runs an ordered step list honouring conditional routing, early stop,
//! timeouts, and the configured error strategy. Steps of one execution
//! run strictly sequentially; separate executions are independent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ErrorStrategy;
use crate::context::{meta, PipelineContext};
use crate::step::{PipelineStep, StepError};

// =============================================================================
// Errors
// =============================================================================

/// Pipeline execution error
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A step failed and the strategy was `stop`
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        /// Name of the failed step
        step: String,
        /// The step's error
        #[source]
        source: StepError,
    },

    /// A step failed under `compensate` and compensation ran to completion
    #[error("step '{step}' failed: {source}; compensation executed")]
    Compensated {
        /// Name of the failed step
        step: String,
        /// The step's error
        #[source]
        source: StepError,
    },

    /// A step failed under `compensate` and a compensator also failed
    #[error("step '{step}' failed: {source}; compensation also failed: {compensation_error}")]
    CompensationFailed {
        /// Name of the failed step
        step: String,
        /// The step's error
        #[source]
        source: StepError,
        /// First compensator failure
        compensation_error: String,
    },

    /// A step routed to a name that is not in the pipeline
    #[error("step '{step}' routed to unknown step '{next}'")]
    UnknownNextStep {
        /// Step that produced the route
        step: String,
        /// The unknown target
        next: String,
    },

    /// The execution token was cancelled or its deadline expired
    #[error("pipeline execution cancelled")]
    Cancelled,

    /// Construction rejected the step list
    #[error("invalid pipeline '{pipeline}': {message}")]
    InvalidPipeline {
        /// Pipeline name
        pipeline: String,
        /// What was wrong
        message: String,
    },
}

// =============================================================================
// Pipeline
// =============================================================================

/// A named step with its routing and error-strategy overrides
pub struct StepSlot {
    /// Step name, unique within the pipeline
    pub name: String,

    /// The step itself
    pub step: Arc<dyn PipelineStep>,

    /// Unconditional route taken on success unless the result routes
    pub static_next: Option<String>,

    /// Per-step override of the pipeline error strategy
    pub on_error: Option<ErrorStrategy>,
}

/// An immutable, executable pipeline
pub struct Pipeline {
    name: String,
    steps: Vec<StepSlot>,
    strategy: ErrorStrategy,
    compensation: Vec<(String, Arc<dyn PipelineStep>)>,
    timeout: Option<Duration>,
}

impl Pipeline {
    /// Assemble a pipeline. Step names must be unique and every static
    /// route must land on a sibling.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<StepSlot>,
        strategy: ErrorStrategy,
        compensation: Vec<(String, Arc<dyn PipelineStep>)>,
        timeout: Option<Duration>,
    ) -> Result<Self, ExecutorError> {
        let name = name.into();

        if steps.is_empty() {
            return Err(ExecutorError::InvalidPipeline {
                pipeline: name,
                message: "a pipeline needs at least one step".to_string(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for slot in &steps {
            if !seen.insert(slot.name.as_str()) {
                return Err(ExecutorError::InvalidPipeline {
                    pipeline: name,
                    message: format!("duplicate step name '{}'", slot.name),
                });
            }
        }
        for slot in &steps {
            if let Some(next) = slot.static_next.as_deref() {
                if !seen.contains(next) {
                    return Err(ExecutorError::InvalidPipeline {
                        pipeline: name,
                        message: format!("step '{}' routes to unknown step '{next}'", slot.name),
                    });
                }
            }
        }

        Ok(Self {
            name,
            steps,
            strategy,
            compensation,
            timeout,
        })
    }

    /// The pipeline's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the pipeline against a context.
    ///
    /// A configured timeout derives a child token that cancels the
    /// execution when it expires; expiry is reported as
    /// [`ExecutorError::Cancelled`].
    pub async fn execute(
        &self,
        token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<(), ExecutorError> {
        pc.set_meta(meta::PIPELINE, Value::String(self.name.clone()));
        pc.set_meta(
            meta::STARTED_AT,
            Value::String(Utc::now().to_rfc3339()),
        );

        let exec_token = token.child_token();
        let timer = self.timeout.map(|timeout| {
            let deadline = exec_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            })
        });

        let result = self.run_steps(&exec_token, pc).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        result
    }

    async fn run_steps(
        &self,
        token: &CancellationToken,
        pc: &mut PipelineContext,
    ) -> Result<(), ExecutorError> {
        let mut cursor = 0;

        while let Some(slot) = self.steps.get(cursor) {
            if token.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            tracing::debug!(pipeline = %self.name, step = %slot.name, "executing step");

            let outcome = tokio::select! {
                () = token.cancelled() => Err(StepError::Cancelled),
                result = slot.step.execute(token, pc) => result,
            };

            match outcome {
                // Cancellation always wins over the error strategy
                Err(StepError::Cancelled) => return Err(ExecutorError::Cancelled),

                Err(error) => {
                    let strategy = slot.on_error.unwrap_or(self.strategy);
                    match strategy {
                        ErrorStrategy::Stop => {
                            return Err(ExecutorError::StepFailed {
                                step: slot.name.clone(),
                                source: error,
                            });
                        }
                        ErrorStrategy::Skip => {
                            tracing::warn!(
                                pipeline = %self.name,
                                step = %slot.name,
                                %error,
                                "step failed, skipping"
                            );
                            pc.record_step_skipped(&slot.name, &error.to_string());
                            cursor += 1;
                        }
                        ErrorStrategy::Compensate => {
                            return Err(self.compensate(pc, &slot.name, error).await);
                        }
                    }
                }

                Ok(result) => {
                    pc.record_step_output(&slot.name, result.output);

                    if result.stop {
                        pc.mark_completed();
                        return Ok(());
                    }

                    let next = result.next_step.or_else(|| slot.static_next.clone());
                    match next {
                        Some(next) => {
                            let Some(index) =
                                self.steps.iter().position(|s| s.name == next)
                            else {
                                return Err(ExecutorError::UnknownNextStep {
                                    step: slot.name.clone(),
                                    next,
                                });
                            };
                            cursor = index;
                        }
                        None => cursor += 1,
                    }
                }
            }
        }

        pc.mark_completed();
        Ok(())
    }

    /// Run every compensator in reverse declared order with the same
    /// context the failed step saw. Compensation is cleanup and runs to
    /// completion on a fresh token even when the execution was cancelled
    /// after the failure.
    async fn compensate(
        &self,
        pc: &mut PipelineContext,
        failed_step: &str,
        error: StepError,
    ) -> ExecutorError {
        let token = CancellationToken::new();
        let mut first_failure: Option<String> = None;

        for (name, step) in self.compensation.iter().rev() {
            match step.execute(&token, pc).await {
                Ok(result) => pc.record_step_output(name, result.output),
                Err(comp_error) => {
                    tracing::error!(
                        pipeline = %self.name,
                        compensator = %name,
                        %comp_error,
                        "compensation step failed"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(format!("{name}: {comp_error}"));
                    }
                }
            }
        }

        match first_failure {
            None => ExecutorError::Compensated {
                step: failed_step.to_string(),
                source: error,
            },
            Some(compensation_error) => ExecutorError::CompensationFailed {
                step: failed_step.to_string(),
                source: error,
                compensation_error,
            },
        }
    }
}
