//! Action error types

use serde_json::Value;
use thiserror::Error;

/// Error raised by a model action invocation, with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ActionError {
    pub kind: ActionErrorKind,
    pub message: String,
    /// Raw model output attached to validation failures
    pub raw_output: Option<String>,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_output: None,
        }
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = Some(raw_output.into());
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Transport, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Parse, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Validation, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ActionErrorKind::Server, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ActionErrorKind::Cancelled, "invocation superseded")
    }

    pub fn incomplete() -> Self {
        Self::new(
            ActionErrorKind::Incomplete,
            "stream closed before a final frame was received",
        )
    }

    /// Convert the `error` field of a wire frame.
    ///
    /// The field is either a structured object or a string that may itself
    /// hold JSON. Objects whose `type` names a validation error keep their
    /// raw model output; everything else becomes a generic server error.
    pub fn from_wire(value: &Value) -> Self {
        match value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(inner @ Value::Object(_)) => Self::from_wire(&inner),
                _ => Self::server(s.clone()),
            },
            Value::Object(map) => {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .map_or_else(|| value.to_string(), str::to_string);
                let is_validation = map
                    .get("type")
                    .and_then(Value::as_str)
                    .is_some_and(|t| t.contains("Validation"));
                if is_validation {
                    let err = Self::validation(message);
                    match map.get("raw_output").and_then(Value::as_str) {
                        Some(raw) => err.with_raw_output(raw),
                        None => err,
                    }
                } else {
                    Self::server(message)
                }
            }
            other => Self::server(other.to_string()),
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    /// Network failure or non-success HTTP status
    Transport,
    /// A frame or result could not be decoded
    Parse,
    /// The model produced output that failed schema validation
    Validation,
    /// The function server reported an error frame
    Server,
    /// A newer invocation superseded this one
    Cancelled,
    /// The stream ended without a final frame
    Incomplete,
}

impl ActionErrorKind {
    /// Cancelled invocations are never shown to the user
    pub fn is_user_visible(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
