//! Session history sidebar
//!
//! Most-recent-first list of session summaries, at most one per session id.

use crate::db::{StoredMessage, UserProfile};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;

/// One row of the history sidebar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub user_name: String,
    pub user_avatar: String,
    pub user_color: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionSummary {
    fn new(id: &str, last_message: &str, timestamp: DateTime<Utc>, user: &UserProfile) -> Self {
        Self {
            id: id.to_string(),
            user_name: user.name.clone(),
            user_avatar: user.avatar(),
            user_color: user.color.clone(),
            last_message: last_message.to_string(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionHistory {
    summaries: Vec<SessionSummary>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record new activity on a session and move it to the front.
    ///
    /// An existing summary keeps its user attributes; a new one takes them
    /// from `user`.
    pub fn upsert_and_promote(
        &mut self,
        session_id: &str,
        last_message: &str,
        timestamp: DateTime<Utc>,
        user: &UserProfile,
    ) {
        let summary = match self.summaries.iter().position(|s| s.id == session_id) {
            Some(index) => {
                let mut existing = self.summaries.remove(index);
                existing.last_message = last_message.to_string();
                existing.timestamp = timestamp;
                existing
            }
            None => SessionSummary::new(session_id, last_message, timestamp, user),
        };
        self.summaries.insert(0, summary);
    }

    /// Replace the list with one summary per session, from messages ordered
    /// newest first. The first message seen for a session is its latest.
    pub fn rebuild_from_history(&mut self, messages: &[StoredMessage], user: &UserProfile) {
        let mut seen = HashSet::new();
        self.summaries = messages
            .iter()
            .filter(|m| seen.insert(m.session_id.as_str()))
            .map(|m| SessionSummary::new(&m.session_id, &m.content, m.created_at, user))
            .collect();
    }

    pub fn summaries(&self) -> &[SessionSummary] {
        &self.summaries
    }

    /// Most recently active session
    pub fn latest(&self) -> Option<&SessionSummary> {
        self.summaries.first()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}
