//! Conductor server - admin HTTP surface and process wiring
//!
//! The binary in `main.rs` loads the workflow document, builds the
//! engine, and serves the admin API next to the HTTP trigger routes on
//! the shared server module.

pub mod error;
pub mod routes;

pub use error::ApiError;

use std::sync::Arc;

use conductor_engine::WorkflowEngine;

/// Shared state for the admin handlers
#[derive(Clone)]
pub struct AppState {
    /// The running engine
    pub engine: Arc<WorkflowEngine>,
}
