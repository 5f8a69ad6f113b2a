//! Events that drive a turn

use crate::action::ActionError;

/// Events that trigger turn transitions
#[derive(Debug, Clone)]
pub enum TurnEvent<P, F> {
    /// A new invocation was dispatched
    Start,
    /// A partial frame arrived
    Partial(P),
    /// The final frame (or the non-streaming result) arrived
    Final(F),
    /// Transport, parse, or model failure
    Failed(ActionError),
    /// Explicit reset by the consumer
    Reset,
}
