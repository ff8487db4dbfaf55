pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, ToolCallFlow};
pub use states::{ToolCallAction, ToolCallEvent, ToolCallState, TransitionOutcome};
