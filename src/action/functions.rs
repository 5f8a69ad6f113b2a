//! Model functions exposed by the function server
//!
//! Each function declares its parameter list and its partial/final result
//! types, so frames are decoded into concrete types per function.

use super::args::ActionArg;
use super::ActionError;
use crate::db::{Message, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A callable model function with typed arguments and results
pub trait ModelFunction: Send + Sync + 'static {
    /// Function name on the server
    const NAME: &'static str;
    /// Parameter names, in declaration order
    const PARAMS: &'static [&'static str];

    type Args: Send + 'static;
    type Partial: DeserializeOwned + Clone + Debug + Send + Sync + 'static;
    type Final: DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    /// Positional arguments matching `PARAMS`
    fn into_args(args: Self::Args) -> Result<Vec<ActionArg>, ActionError>;
}

// ============================================================================
// Shared argument types
// ============================================================================

/// Speaker of a transcript entry sent to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Transcript entry sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Developer (admin feedback) messages never reach the model
    pub fn from_message(message: &Message) -> Option<Self> {
        let role = match message.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
            Role::Developer => return None,
        };
        Some(Self {
            role,
            content: message.content.clone(),
        })
    }
}

/// Grounding attributes of the coached user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    pub name: String,
    pub influence_style: String,
}

// ============================================================================
// Betty: multi-turn coaching chat
// ============================================================================

/// Multi-turn coaching chat
pub struct Betty;

#[derive(Debug, Clone)]
pub struct BettyArgs {
    pub instruction: String,
    pub messages: Vec<ChatTurn>,
    pub relevant_feedbacks: String,
    pub user_metadata: UserMetadata,
    pub user_memory: String,
}

/// Final chat reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseChat {
    pub answer: String,
}

/// Chat reply as it streams in; fields may still be missing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PartialResponseChat {
    #[serde(default)]
    pub answer: Option<String>,
}

impl ModelFunction for Betty {
    const NAME: &'static str = "Betty";
    const PARAMS: &'static [&'static str] = &[
        "instruction",
        "messages",
        "relevant_feedbacks",
        "user_metadata",
        "user_memory",
    ];

    type Args = BettyArgs;
    type Partial = PartialResponseChat;
    type Final = ResponseChat;

    fn into_args(args: BettyArgs) -> Result<Vec<ActionArg>, ActionError> {
        Ok(vec![
            ActionArg::value(&args.instruction)?,
            ActionArg::value(&args.messages)?,
            ActionArg::value(&args.relevant_feedbacks)?,
            ActionArg::value(&args.user_metadata)?,
            ActionArg::value(&args.user_memory)?,
        ])
    }
}

// ============================================================================
// InitialMessageChat: opening greeting of a new session
// ============================================================================

/// Opening greeting for a new session
pub struct InitialMessageChat;

#[derive(Debug, Clone)]
pub struct InitialMessageArgs {
    pub instruction: String,
    pub relevant_feedbacks: String,
    pub user_influence_style: String,
    pub user_memory: String,
}

impl ModelFunction for InitialMessageChat {
    const NAME: &'static str = "InitialMessageChat";
    const PARAMS: &'static [&'static str] = &[
        "instruction",
        "relevant_feedbacks",
        "user_influence_style",
        "user_memory",
    ];

    type Args = InitialMessageArgs;
    type Partial = String;
    type Final = String;

    fn into_args(args: InitialMessageArgs) -> Result<Vec<ActionArg>, ActionError> {
        Ok(vec![
            ActionArg::value(&args.instruction)?,
            ActionArg::value(&args.relevant_feedbacks)?,
            ActionArg::value(&args.user_influence_style)?,
            ActionArg::value(&args.user_memory)?,
        ])
    }
}
