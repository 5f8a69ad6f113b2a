//! Pure turn transition function

use super::{TurnEffect, TurnEvent, TurnState, TurnStatus};
use crate::stream_decoder::Frame;
use thiserror::Error;

/// Result of a turn transition
#[derive(Debug)]
pub struct TransitionResult<P, F> {
    pub new_state: TurnState<P, F>,
    pub effects: Vec<TurnEffect<P, F>>,
}

impl<P, F> TransitionResult<P, F> {
    pub fn new(state: TurnState<P, F>) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: TurnEffect<P, F>) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Frames that cannot be applied in the current state
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("No invocation in flight")]
    NotStarted,
    #[error("Invocation already finished ({})", .0.as_str())]
    AlreadyTerminal(TurnStatus),
}

/// Pure transition function.
///
/// `Start` and `Reset` are accepted from every state. Frames are accepted
/// only while an invocation is in flight, so at most one terminal transition
/// can happen between two `Start` events.
pub fn transition<P: Clone, F: Clone>(
    state: &TurnState<P, F>,
    event: TurnEvent<P, F>,
) -> Result<TransitionResult<P, F>, TransitionError> {
    match (state, event) {
        (_, TurnEvent::Start) => Ok(TransitionResult::new(TurnState::Pending)),

        (_, TurnEvent::Reset) => Ok(TransitionResult::new(TurnState::Idle)),

        (TurnState::Pending | TurnState::Streaming { .. }, TurnEvent::Partial(partial)) => {
            Ok(TransitionResult::new(TurnState::Streaming {
                partial: partial.clone(),
            })
            .with_effect(TurnEffect::StreamData(partial.clone()))
            .with_effect(TurnEffect::Data(Frame::Partial(partial))))
        }

        (TurnState::Pending | TurnState::Streaming { .. }, TurnEvent::Final(final_data)) => {
            Ok(TransitionResult::new(TurnState::Success {
                final_data: final_data.clone(),
                last_partial: state.stream_data().cloned(),
            })
            .with_effect(TurnEffect::FinalData(final_data.clone()))
            .with_effect(TurnEffect::Data(Frame::Final(final_data))))
        }

        (TurnState::Pending | TurnState::Streaming { .. }, TurnEvent::Failed(error)) => {
            Ok(TransitionResult::new(TurnState::Error {
                error: error.clone(),
                last_partial: state.stream_data().cloned(),
            })
            .with_effect(TurnEffect::Error(error)))
        }

        (TurnState::Idle, _) => Err(TransitionError::NotStarted),

        (TurnState::Success { .. } | TurnState::Error { .. }, _) => {
            Err(TransitionError::AlreadyTerminal(state.status()))
        }
    }
}
