//! Turn state types

use crate::action::ActionError;
use serde::Serialize;

/// Externally observable status of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Idle,
    Pending,
    Streaming,
    Success,
    Error,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Streaming => "streaming",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// State of one model invocation.
///
/// Partials are never merged: each `Streaming` state holds only the most
/// recent partial value. Terminal states keep that last partial so consumers
/// can still read `stream_data` after completion.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState<P, F> {
    Idle,
    Pending,
    Streaming {
        partial: P,
    },
    Success {
        final_data: F,
        last_partial: Option<P>,
    },
    Error {
        error: ActionError,
        last_partial: Option<P>,
    },
}

impl<P, F> TurnState<P, F> {
    pub fn status(&self) -> TurnStatus {
        match self {
            TurnState::Idle => TurnStatus::Idle,
            TurnState::Pending => TurnStatus::Pending,
            TurnState::Streaming { .. } => TurnStatus::Streaming,
            TurnState::Success { .. } => TurnStatus::Success,
            TurnState::Error { .. } => TurnStatus::Error,
        }
    }

    /// Status as seen by a consumer that did or did not request streaming
    pub fn observed_status(&self, streaming: bool) -> TurnStatus {
        match self.status() {
            TurnStatus::Streaming if !streaming => TurnStatus::Pending,
            status => status,
        }
    }

    /// Latest partial value, if any frame has arrived
    pub fn stream_data(&self) -> Option<&P> {
        match self {
            TurnState::Streaming { partial } => Some(partial),
            TurnState::Success { last_partial, .. } | TurnState::Error { last_partial, .. } => {
                last_partial.as_ref()
            }
            TurnState::Idle | TurnState::Pending => None,
        }
    }

    pub fn final_data(&self) -> Option<&F> {
        match self {
            TurnState::Success { final_data, .. } => Some(final_data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            TurnState::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}
