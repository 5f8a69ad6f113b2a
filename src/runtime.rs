//! Runtime for per-user coaching chats
//!
//! Each user gets one `ChatRuntime` task. Callers talk to it through a
//! `ChatHandle` and observe it through a watched `ChatView`.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::ChatRuntime;
pub use traits::*;

use crate::action::ActionClient;
use crate::db::{Message, UserProfile};
use crate::history::SessionHistory;
use crate::turn::TurnStatus;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};

/// Type alias for the production runtime with injected services
pub type ProductionRuntime = ChatRuntime<Arc<dyn MessageStore>, Arc<dyn MemoryStore>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("a reply is already in progress")]
    TurnInFlight,
    #[error("message is empty")]
    EmptyMessage,
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("chat runtime stopped")]
    RuntimeStopped,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Use the streaming variant of every model function
    pub streaming: bool,
    /// How long a toast stays visible
    pub toast_duration: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            toast_duration: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
}

/// Transient notification, dismissed automatically
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub message: String,
}

/// Everything a client needs to render one user's chat
#[derive(Debug, Clone, Serialize)]
pub struct ChatView {
    pub user: UserProfile,
    pub current_session_id: Option<String>,
    pub messages: Vec<Message>,
    /// In-flight assistant text, replaced on every partial
    pub streaming_preview: Option<String>,
    pub history: SessionHistory,
    pub toasts: Vec<Toast>,
    pub is_loading: bool,
    pub reply_status: TurnStatus,
    pub greeting_status: TurnStatus,
}

/// Requests handled by a chat runtime
#[derive(Debug)]
pub enum ChatCommand {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Operator feedback, recorded with the developer role
    Feedback {
        text: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    NewChat {
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    SelectSession {
        session_id: String,
        reply: oneshot::Sender<Result<(), ChatError>>,
    },
    UpdateProfile(UserProfile),
    DismissToast(u64),
}

/// Handle to interact with a running chat
#[derive(Debug, Clone)]
pub struct ChatHandle {
    command_tx: mpsc::Sender<ChatCommand>,
    view_rx: watch::Receiver<ChatView>,
}

impl ChatHandle {
    fn new(command_tx: mpsc::Sender<ChatCommand>, view_rx: watch::Receiver<ChatView>) -> Self {
        Self {
            command_tx,
            view_rx,
        }
    }

    pub fn view(&self) -> ChatView {
        self.view_rx.borrow().clone()
    }

    /// Receive every published view
    pub fn subscribe(&self) -> watch::Receiver<ChatView> {
        self.view_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    pub async fn submit(&self, text: String) -> Result<(), ChatError> {
        self.request(|reply| ChatCommand::Submit { text, reply })
            .await
    }

    pub async fn feedback(&self, text: String) -> Result<(), ChatError> {
        self.request(|reply| ChatCommand::Feedback { text, reply })
            .await
    }

    pub async fn new_chat(&self) -> Result<(), ChatError> {
        self.request(|reply| ChatCommand::NewChat { reply }).await
    }

    pub async fn select_session(&self, session_id: String) -> Result<(), ChatError> {
        self.request(|reply| ChatCommand::SelectSession { session_id, reply })
            .await
    }

    pub async fn update_profile(&self, profile: UserProfile) -> Result<(), ChatError> {
        self.send(ChatCommand::UpdateProfile(profile)).await
    }

    pub async fn dismiss_toast(&self, id: u64) -> Result<(), ChatError> {
        self.send(ChatCommand::DismissToast(id)).await
    }

    async fn send(&self, command: ChatCommand) -> Result<(), ChatError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChatError::RuntimeStopped)
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<(), ChatError>>) -> ChatCommand,
    ) -> Result<(), ChatError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx)).await?;
        executor::await_reply(reply_rx).await
    }
}

/// Manager for all chat runtimes
pub struct RuntimeManager {
    storage: Arc<dyn MessageStore>,
    memory: Arc<dyn MemoryStore>,
    actions: Arc<dyn ActionClient>,
    config: RuntimeConfig,
    runtimes: RwLock<HashMap<String, ChatHandle>>,
}

impl RuntimeManager {
    pub fn new(
        storage: Arc<dyn MessageStore>,
        memory: Arc<dyn MemoryStore>,
        actions: Arc<dyn ActionClient>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            storage,
            memory,
            actions,
            config,
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    /// Get the running chat for a user, starting it if needed
    pub async fn get_or_create(&self, user_id: &str) -> Result<ChatHandle, ChatError> {
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(user_id).filter(|h| !h.is_closed()) {
                return Ok(handle.clone());
            }
        }

        let profile = self
            .storage
            .get_user(user_id)
            .await
            .map_err(ChatError::Storage)?
            .ok_or_else(|| ChatError::UserNotFound(user_id.to_string()))?;

        let mut runtimes = self.runtimes.write().await;
        if let Some(handle) = runtimes.get(user_id).filter(|h| !h.is_closed()) {
            return Ok(handle.clone());
        }

        let (runtime, handle): (ProductionRuntime, ChatHandle) = ChatRuntime::new(
            profile,
            self.storage.clone(),
            self.memory.clone(),
            self.actions.clone(),
            self.config.clone(),
        );
        tokio::spawn(runtime.run());
        runtimes.insert(user_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Every stored profile, ordered by name
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ChatError> {
        self.storage.list_users().await.map_err(ChatError::Storage)
    }

    /// Store a profile and mirror it into memory and any running chat
    pub async fn upsert_user(&self, profile: UserProfile) -> Result<(), ChatError> {
        self.storage
            .upsert_user(&profile)
            .await
            .map_err(ChatError::Storage)?;

        if let Err(e) = self.memory.upsert_user(&profile).await {
            tracing::warn!(user_id = %profile.user_id, error = %e, "Failed to upsert memory user");
        }

        let handle = self.runtimes.read().await.get(&profile.user_id).cloned();
        if let Some(handle) = handle {
            if let Err(e) = handle.update_profile(profile).await {
                tracing::debug!(error = %e, "Chat runtime gone while updating profile");
            }
        }
        Ok(())
    }
}
