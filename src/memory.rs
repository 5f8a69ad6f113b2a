//! Long-term conversation memory
//!
//! Messages are written through to a memory service keyed by session, and the
//! service's running summary is read back as grounding context before each
//! model call.

mod zep;

pub use zep::{ZepConfig, ZepMemory};

use crate::db::UserProfile;
use crate::runtime::MemoryStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Speaker label used for everything that is not the user
pub const ASSISTANT_SPEAKER: &str = "Betty";

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory request failed: {0}")]
    Transport(String),
    #[error("memory service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("memory {kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid role type: {0}")]
    InvalidRoleType(String),
    #[error("invalid memory response: {0}")]
    Decode(String),
}

/// Role types the memory service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Assistant,
    System,
    Tool,
    Function,
}

impl MemoryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryRole::User => "user",
            MemoryRole::Assistant => "assistant",
            MemoryRole::System => "system",
            MemoryRole::Tool => "tool",
            MemoryRole::Function => "function",
        }
    }

    /// Name the message is attributed to: the speaker's own name for user
    /// messages that carry one, the assistant identity otherwise.
    pub fn speaker_label(self, speaker_name: Option<&str>) -> String {
        match (self, speaker_name) {
            (MemoryRole::User, Some(name)) if !name.is_empty() => name.to_string(),
            _ => ASSISTANT_SPEAKER.to_string(),
        }
    }
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryRole {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MemoryRole::User),
            "assistant" => Ok(MemoryRole::Assistant),
            "system" => Ok(MemoryRole::System),
            "tool" => Ok(MemoryRole::Tool),
            "function" => Ok(MemoryRole::Function),
            other => Err(MemoryError::InvalidRoleType(other.to_string())),
        }
    }
}

/// Memory store used when no memory service is configured.
///
/// Writes are dropped and the context is always empty.
#[derive(Debug, Clone, Default)]
pub struct NoopMemory;

#[async_trait]
impl MemoryStore for NoopMemory {
    async fn upsert_user(&self, _profile: &UserProfile) -> Result<(), String> {
        Ok(())
    }

    async fn upsert_session(&self, _user_id: &str, _session_id: &str) -> Result<(), String> {
        Ok(())
    }

    async fn add_message(
        &self,
        _session_id: &str,
        _content: &str,
        _role: MemoryRole,
        _speaker_name: Option<&str>,
    ) -> Result<(), String> {
        Ok(())
    }

    async fn get_context(&self, _session_id: &str, _user_id: &str) -> Result<String, String> {
        Ok(String::new())
    }
}
