//! State machine engine
//!
//! Drives long-running business state through named transitions between
//! declared states. Definitions describe the valid progressions; each
//! instance tracks where one conversation currently is.

pub mod definition;
pub mod engine;
pub mod instance;

pub use definition::{StateDef, StateMachineDefinition, TransitionDef};
pub use engine::{
    HandlerError, StateMachineEngine, StateMachineError, TransitionEvent, TransitionHandler,
    TRANSITION_TOPIC,
};
pub use instance::WorkflowInstance;
