pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, ReceptionistFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, TransitionOutcome};
