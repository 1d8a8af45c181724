//! Flow demo controller
//!
//! Elm-style state machine that walks a [`FlowDefinition`] step by step.
//! [`transition`] is pure; the runtime executes the [`Effect`]s it returns.

pub mod catalog;
mod effect;
pub mod event;
pub mod state;
pub mod template;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use catalog::{FlowCatalog, FlowDefinition, Step};
pub use effect::Effect;
pub use event::{CallFailure, Event};
pub use state::{FlowPhase, FlowState};
pub use template::Variables;
pub use transition::{seed_variables, transition, TransitionError};
