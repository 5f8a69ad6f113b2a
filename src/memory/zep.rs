//! Zep memory service client

use super::{MemoryError, MemoryRole};
use crate::db::UserProfile;
use crate::runtime::MemoryStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ZepConfig {
    pub api_key: String,
    pub base_url: String,
}

pub struct ZepMemory {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct MemoryMessage<'a> {
    role: String,
    role_type: MemoryRole,
    content: &'a str,
}

#[derive(Deserialize)]
struct MemoryResponse {
    #[serde(default)]
    context: Option<String>,
}

impl ZepMemory {
    pub fn new(config: &ZepConfig) -> Result<Self, MemoryError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MemoryError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v2/{path}", self.base_url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("Authorization", format!("Api-Key {}", self.api_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, MemoryError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| MemoryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(MemoryError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// GET a resource, `Ok(false)` on 404
    async fn exists(&self, path: &str) -> Result<bool, MemoryError> {
        match self.send(self.client.get(self.url(path))).await {
            Ok(_) => Ok(true),
            Err(MemoryError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Create the memory user unless one already exists
    pub async fn ensure_user(&self, profile: &UserProfile) -> Result<(), MemoryError> {
        if self.exists(&format!("users/{}", profile.user_id)).await? {
            return Ok(());
        }

        let (first_name, last_name) = split_name(&profile.name);
        let body = json!({
            "user_id": profile.user_id,
            "email": profile.email,
            "first_name": first_name,
            "last_name": last_name,
            "metadata": {
                "influence_style": profile.influence_style,
                "color": profile.color,
            },
        });
        self.send(self.client.post(self.url("users")).json(&body))
            .await?;
        tracing::info!(user_id = %profile.user_id, "Created memory user");
        Ok(())
    }

    /// Create the memory session unless one already exists
    pub async fn ensure_session(&self, user_id: &str, session_id: &str) -> Result<(), MemoryError> {
        if self.exists(&format!("sessions/{session_id}")).await? {
            return Ok(());
        }

        let body = json!({ "session_id": session_id, "user_id": user_id });
        self.send(self.client.post(self.url("sessions")).json(&body))
            .await?;
        tracing::info!(%user_id, %session_id, "Created memory session");
        Ok(())
    }

    pub async fn push_message(
        &self,
        session_id: &str,
        content: &str,
        role: MemoryRole,
        speaker_name: Option<&str>,
    ) -> Result<(), MemoryError> {
        let message = MemoryMessage {
            role: role.speaker_label(speaker_name),
            role_type: role,
            content,
        };
        let url = self.url(&format!("sessions/{session_id}/memory"));
        self.send(self.client.post(url).json(&json!({ "messages": [message] })))
            .await?;
        Ok(())
    }

    /// Running summary for a session; the user must exist
    pub async fn context(&self, session_id: &str, user_id: &str) -> Result<String, MemoryError> {
        if !user_id.is_empty() && !self.exists(&format!("users/{user_id}")).await? {
            return Err(MemoryError::NotFound {
                kind: "user",
                id: user_id.to_string(),
            });
        }

        let url = self.url(&format!("sessions/{session_id}/memory"));
        let memory: MemoryResponse = self
            .send(self.client.get(url))
            .await?
            .json()
            .await
            .map_err(|e| MemoryError::Decode(e.to_string()))?;
        Ok(memory.context.unwrap_or_default())
    }
}

fn split_name(name: &str) -> (&str, &str) {
    let name = name.trim();
    match name.split_once(' ') {
        Some((first, rest)) => (first, rest.trim()),
        None => (name, ""),
    }
}

#[async_trait]
impl MemoryStore for ZepMemory {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String> {
        self.ensure_user(profile).await.map_err(|e| e.to_string())
    }

    async fn upsert_session(&self, user_id: &str, session_id: &str) -> Result<(), String> {
        self.ensure_session(user_id, session_id)
            .await
            .map_err(|e| e.to_string())
    }

    async fn add_message(
        &self,
        session_id: &str,
        content: &str,
        role: MemoryRole,
        speaker_name: Option<&str>,
    ) -> Result<(), String> {
        self.push_message(session_id, content, role, speaker_name)
            .await
            .map_err(|e| e.to_string())
    }

    async fn get_context(&self, session_id: &str, user_id: &str) -> Result<String, String> {
        self.context(session_id, user_id)
            .await
            .map_err(|e| e.to_string())
    }
}
