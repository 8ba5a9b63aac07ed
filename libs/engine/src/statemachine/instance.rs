//! Workflow instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A live conversation with its own id, current state, and data mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Instance id, unique across the engine
    pub id: String,

    /// Name of the definition this instance follows
    pub definition: String,

    /// State the instance is currently in; always a state of the definition
    pub current_state: String,

    /// State before the last transition
    pub previous_state: Option<String>,

    /// Instance data, merged on every transition
    pub data: Map<String, Value>,

    /// When the instance was created
    pub created_at: DateTime<Utc>,

    /// When the instance last transitioned
    pub last_updated: DateTime<Utc>,

    /// Set when a final state is entered
    pub completed: bool,

    /// Terminal error, set when a final error state is entered
    pub error: Option<String>,
}

impl WorkflowInstance {
    /// Create a fresh instance in the given initial state
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        definition: impl Into<String>,
        initial_state: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            definition: definition.into(),
            current_state: initial_state.into(),
            previous_state: None,
            data,
            created_at: now,
            last_updated: now,
            completed: false,
            error: None,
        }
    }
}
