//! API request and response types

use crate::db::UserProfile;
use crate::history::SessionSummary;
use serde::{Deserialize, Serialize};

/// Request carrying a chat or feedback message
#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Response for an upserted profile
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserProfile,
    pub avatar: String,
}

/// Response for the admin user list
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
}

impl From<UserProfile> for UserResponse {
    fn from(user: UserProfile) -> Self {
        let avatar = user.avatar();
        Self { user, avatar }
    }
}

/// Response for chat actions
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub queued: bool,
}

/// Response for actions with no payload
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Response with the history sidebar
#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub current_session_id: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
