//! Observer callbacks produced by turn transitions

use crate::action::ActionError;
use crate::stream_decoder::Frame;

/// Callbacks to deliver after a transition, in the order listed
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEffect<P, F> {
    /// `on_stream_data`
    StreamData(P),
    /// `on_final_data`
    FinalData(F),
    /// `on_data`, fired for partials and finals alike
    Data(Frame<P, F>),
    /// `on_error`
    Error(ActionError),
}
