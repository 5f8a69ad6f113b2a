//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the chat runtime with mock implementations.

use crate::db::{Database, Role, StoredMessage, UserProfile};
use crate::memory::MemoryRole;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Durable storage for chat messages, profiles and instructions
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to a session
    async fn insert_message(
        &self,
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, String>;

    /// All of a user's messages with one of `roles`, newest first
    async fn list_by_user(
        &self,
        user_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String>;

    /// One session's messages with one of `roles`, ordered by creation time
    async fn list_by_session(
        &self,
        session_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String>;

    /// Coaching instruction; `None` when it has not been configured
    async fn instruction(&self) -> Result<Option<String>, String>;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, String>;

    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String>;

    /// Every profile, ordered by name
    async fn list_users(&self) -> Result<Vec<UserProfile>, String>;
}

/// Long-term memory keyed by session
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Create the memory user if it does not exist
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String>;

    /// Create the memory session if it does not exist
    async fn upsert_session(&self, user_id: &str, session_id: &str) -> Result<(), String>;

    async fn add_message(
        &self,
        session_id: &str,
        content: &str,
        role: MemoryRole,
        speaker_name: Option<&str>,
    ) -> Result<(), String>;

    /// Running summary of the session for prompt grounding
    async fn get_context(&self, session_id: &str, user_id: &str) -> Result<String, String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn insert_message(
        &self,
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, String> {
        (**self)
            .insert_message(user_id, session_id, content, role, created_at)
            .await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String> {
        (**self).list_by_user(user_id, roles).await
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String> {
        (**self).list_by_session(session_id, roles).await
    }

    async fn instruction(&self) -> Result<Option<String>, String> {
        (**self).instruction().await
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, String> {
        (**self).get_user(user_id).await
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String> {
        (**self).upsert_user(profile).await
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, String> {
        (**self).list_users().await
    }
}

#[async_trait]
impl<T: MemoryStore + ?Sized> MemoryStore for Arc<T> {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String> {
        (**self).upsert_user(profile).await
    }

    async fn upsert_session(&self, user_id: &str, session_id: &str) -> Result<(), String> {
        (**self).upsert_session(user_id, session_id).await
    }

    async fn add_message(
        &self,
        session_id: &str,
        content: &str,
        role: MemoryRole,
        speaker_name: Option<&str>,
    ) -> Result<(), String> {
        (**self)
            .add_message(session_id, content, role, speaker_name)
            .await
    }

    async fn get_context(&self, session_id: &str, user_id: &str) -> Result<String, String> {
        (**self).get_context(session_id, user_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a `MessageStore`
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn insert_message(
        &self,
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db
            .insert_message(&id, user_id, session_id, content, role, created_at)
            .map_err(|e| e.to_string())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String> {
        self.db
            .list_messages_by_user(user_id, roles)
            .map_err(|e| e.to_string())
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String> {
        self.db
            .list_messages_by_session(session_id, roles)
            .map_err(|e| e.to_string())
    }

    async fn instruction(&self) -> Result<Option<String>, String> {
        match self.db.get_instruction(crate::db::COACHING_INSTRUCTION_ID) {
            Ok(text) => Ok(Some(text)),
            Err(crate::db::DbError::InstructionNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, String> {
        match self.db.get_user(user_id) {
            Ok(profile) => Ok(Some(profile)),
            Err(crate::db::DbError::UserNotFound(_)) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String> {
        self.db.upsert_user(profile).map_err(|e| e.to_string())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, String> {
        self.db.list_users().map_err(|e| e.to_string())
    }
}
