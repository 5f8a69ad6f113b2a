//! Per-invocation turn state machine
//!
//! Pure transitions in the Elm style: `transition` maps a state and an event
//! to a new state plus the observer callbacks that must fire, in order.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::TurnEffect;
pub use event::TurnEvent;
pub use state::{TurnState, TurnStatus};
pub use transition::transition;
