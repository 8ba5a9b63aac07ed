//! Declarative configuration
//!
//! Parsing, typed access, and structural validation for the workflow
//! document that drives the engine.

pub mod loader;
pub mod types;
pub mod validator;
pub mod value;

pub use loader::parse_document;
pub use types::*;
pub use validator::{validate_document, TypeCatalogue};
pub use value::{ConfigMap, FactoryError};

use thiserror::Error;

/// Configuration error with location and suggestion
///
/// Covers both parse failures and structural validation failures of the
/// declarative document.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConfigError {
    /// Error message
    pub message: String,

    /// Location in the document (e.g. `workflows[0].pipelines[1].steps[2].next`)
    pub location: Option<String>,

    /// Suggested fix (e.g. `Did you mean 'notify'?`)
    pub suggestion: Option<String>,
}

impl ConfigError {
    /// Create a new configuration error with just a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            suggestion: None,
        }
    }

    /// Add a location to the error
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Add a suggestion to the error
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}
