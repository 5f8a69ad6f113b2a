//! Argument preparation for model function calls
//!
//! Binary media handles are not JSON values; they are converted to their
//! serializable form right before dispatch. Everything else passes through.

use super::ActionError;
#[cfg(test)]
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use serde_json::{json, Value};

/// Where the media bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    Base64 { media_type: String, data: String },
}

/// Structured image/audio reference accepted by model functions
#[allow(dead_code)] // Coaching functions take no media yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaHandle {
    Image(MediaSource),
    Audio(MediaSource),
}

impl MediaHandle {
    /// Serializable form understood by the function server
    pub fn to_json(&self) -> Value {
        let (MediaHandle::Image(source) | MediaHandle::Audio(source)) = self;
        match source {
            MediaSource::Url(url) => json!({ "url": url }),
            MediaSource::Base64 { media_type, data } => json!({
                "base64": data,
                "media_type": media_type,
            }),
        }
    }
}

#[cfg(test)]
impl MediaHandle {
    fn encoded(media_type: &str, bytes: &[u8]) -> MediaSource {
        MediaSource::Base64 {
            media_type: media_type.to_string(),
            data: STANDARD.encode(bytes),
        }
    }

    pub fn image_url(url: &str) -> Self {
        MediaHandle::Image(MediaSource::Url(url.to_string()))
    }

    pub fn audio_bytes(media_type: &str, bytes: &[u8]) -> Self {
        MediaHandle::Audio(Self::encoded(media_type, bytes))
    }
}

/// One positional argument of a model function
#[derive(Debug, Clone, PartialEq)]
pub enum ActionArg {
    Json(Value),
    Media(MediaHandle),
}

impl ActionArg {
    /// Serialize any value as a plain JSON argument
    pub fn value<T: Serialize>(value: &T) -> Result<Self, ActionError> {
        serde_json::to_value(value)
            .map(ActionArg::Json)
            .map_err(|e| ActionError::parse(format!("failed to serialize argument: {e}")))
    }

    pub fn into_json(self) -> Value {
        match self {
            ActionArg::Json(value) => value,
            ActionArg::Media(handle) => handle.to_json(),
        }
    }
}

impl From<MediaHandle> for ActionArg {
    fn from(handle: MediaHandle) -> Self {
        ActionArg::Media(handle)
    }
}

/// Convert every argument to its wire form, preserving order
pub fn prepare_args(args: Vec<ActionArg>) -> Vec<Value> {
    args.into_iter().map(ActionArg::into_json).collect()
}
