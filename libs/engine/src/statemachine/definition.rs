//! State machine definitions

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::StateMachineDecl;

/// A single state of a machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDef {
    /// State name, unique within the definition
    pub name: String,

    /// Entering this state completes the instance
    pub is_final: bool,

    /// This state represents a terminal failure
    pub is_error: bool,
}

/// A named transition between two states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Transition name, unique within the definition
    pub name: String,

    /// State an instance must currently be in
    pub from_state: String,

    /// State the instance moves to
    pub to_state: String,
}

/// A named set of states and transitions describing valid progressions
/// for a class of workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineDefinition {
    /// Definition name; doubles as the workflow type of its instances
    pub name: String,

    /// State new instances start in
    pub initial_state: String,

    /// States by name
    pub states: HashMap<String, StateDef>,

    /// Transitions by name
    pub transitions: HashMap<String, TransitionDef>,
}

impl StateMachineDefinition {
    /// Look up a state
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.get(name)
    }

    /// Look up a transition
    #[must_use]
    pub fn transition(&self, name: &str) -> Option<&TransitionDef> {
        self.transitions.get(name)
    }
}

impl From<&StateMachineDecl> for StateMachineDefinition {
    fn from(decl: &StateMachineDecl) -> Self {
        let states = decl
            .states
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    StateDef {
                        name: s.name.clone(),
                        is_final: s.is_final,
                        is_error: s.is_error,
                    },
                )
            })
            .collect();

        let transitions = decl
            .transitions
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    TransitionDef {
                        name: t.name.clone(),
                        from_state: t.from.clone(),
                        to_state: t.to.clone(),
                    },
                )
            })
            .collect();

        Self {
            name: decl.name.clone(),
            initial_state: decl.initial_state.clone(),
            states,
            transitions,
        }
    }
}
