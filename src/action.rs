//! Model action invocation
//!
//! Dispatches named model functions, streaming or not, and routes their
//! results through the frame decoder and the turn state machine.

mod args;
mod error;
pub mod functions;
mod hook;
mod http;

pub use error::{ActionError, ActionErrorKind};
pub use functions::{
    Betty, BettyArgs, ChatTurn, InitialMessageArgs, InitialMessageChat, ModelFunction,
    PartialResponseChat, ResponseChat, UserMetadata,
};
pub use hook::{ActionHook, TurnObserver};
pub use http::{ActionServerConfig, HttpActionClient};

use crate::stream_decoder::ByteStream;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// One prepared call: function name plus positional wire arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub function: &'static str,
    pub params: &'static [&'static str],
    pub args: Vec<Value>,
}

impl ActionCall {
    pub fn new<A: ModelFunction>(args: Vec<Value>) -> Self {
        Self {
            function: A::NAME,
            params: A::PARAMS,
            args,
        }
    }

    /// Arguments keyed by declared parameter name
    pub fn named_args(&self) -> Map<String, Value> {
        self.params
            .iter()
            .zip(self.args.iter())
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect()
    }
}

/// Transport to the model function server
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// Non-streaming call returning the final value
    async fn call(&self, call: &ActionCall) -> Result<Value, ActionError>;

    /// Streaming call returning newline-delimited JSON frames
    async fn stream(&self, call: &ActionCall) -> Result<ByteStream, ActionError>;
}

#[async_trait]
impl<T: ActionClient + ?Sized> ActionClient for Arc<T> {
    async fn call(&self, call: &ActionCall) -> Result<Value, ActionError> {
        (**self).call(call).await
    }

    async fn stream(&self, call: &ActionCall) -> Result<ByteStream, ActionError> {
        (**self).stream(call).await
    }
}

/// Logging wrapper for action clients
pub struct LoggingActionClient {
    inner: Arc<dyn ActionClient>,
}

impl LoggingActionClient {
    pub fn new(inner: Arc<dyn ActionClient>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ActionClient for LoggingActionClient {
    async fn call(&self, call: &ActionCall) -> Result<Value, ActionError> {
        let start = std::time::Instant::now();
        let result = self.inner.call(call).await;
        let duration = start.elapsed();

        match &result {
            Ok(_) => {
                tracing::info!(
                    function = call.function,
                    duration_ms = %duration.as_millis(),
                    "Action call completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    function = call.function,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "Action call failed"
                );
            }
        }

        result
    }

    async fn stream(&self, call: &ActionCall) -> Result<ByteStream, ActionError> {
        let start = std::time::Instant::now();
        let result = self.inner.stream(call).await;

        match &result {
            Ok(_) => {
                tracing::info!(
                    function = call.function,
                    duration_ms = %start.elapsed().as_millis(),
                    "Action stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    function = call.function,
                    error = %e.message,
                    kind = ?e.kind,
                    "Action stream failed to open"
                );
            }
        }

        result
    }
}
