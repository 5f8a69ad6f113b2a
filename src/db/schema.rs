//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    influence_style TEXT NOT NULL DEFAULT '',
    color TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    message_content TEXT NOT NULL,
    message_role TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence_id);

CREATE TABLE IF NOT EXISTS instructions (
    id INTEGER PRIMARY KEY,
    instruction TEXT NOT NULL
);
";

/// Row id of the coaching instruction used by every chat
pub const COACHING_INSTRUCTION_ID: i64 = 1;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Operator feedback entered from the admin console
    Developer,
}

impl Role {
    /// Roles that make up an end-user transcript
    pub const TRANSCRIPT: &'static [Role] = &[Role::User, Role::Assistant];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Developer => "developer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "developer" => Ok(Role::Developer),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// One turn of a conversation as held by the chat view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Message {
    pub fn new(content: impl Into<String>, role: Role, display_name: Option<String>) -> Self {
        Self {
            content: content.into(),
            role,
            timestamp: Utc::now(),
            display_name,
        }
    }
}

/// Persisted message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub sequence_id: i64,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_message(&self, display_name: Option<String>) -> Message {
        Message {
            content: self.content.clone(),
            role: self.role,
            timestamp: self.created_at,
            display_name,
        }
    }
}

/// Coached user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub influence_style: String,
    #[serde(default)]
    pub color: String,
}

impl UserProfile {
    /// Initials shown in place of an avatar image
    pub fn avatar(&self) -> String {
        let words: Vec<&str> = self.name.split(' ').filter(|w| !w.is_empty()).collect();
        let initials: String = if words.len() >= 2 {
            words.iter().take(2).filter_map(|w| w.chars().next()).collect()
        } else {
            self.name.chars().take(2).collect()
        };
        initials.to_uppercase()
    }
}
