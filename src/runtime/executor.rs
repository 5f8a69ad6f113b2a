//! Chat runtime executor
//!
//! One runtime per user. It owns the chat view and sequences every side
//! effect of a turn across the message store, the memory store and the two
//! model hooks. Hook callbacks and background task outcomes are funnelled
//! back into the loop as events, so view state is only mutated here.

use super::traits::{MemoryStore, MessageStore};
use super::{ChatCommand, ChatError, ChatHandle, ChatView, RuntimeConfig, Toast, ToastKind};
use crate::action::{
    ActionClient, ActionError, ActionErrorKind, ActionHook, Betty, BettyArgs, ChatTurn,
    InitialMessageArgs, InitialMessageChat, PartialResponseChat, ResponseChat, TurnObserver,
    UserMetadata,
};
use crate::db::{Message, Role, UserProfile};
use crate::history::SessionHistory;
use crate::memory::MemoryRole;
use crate::turn::{TurnEffect, TurnStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Display name of the coach in the transcript
pub const ASSISTANT_DISPLAY_NAME: &str = "Assistant";
/// Display name attached to operator feedback
pub const ADMIN_DISPLAY_NAME: &str = "Admin";

type ReplyEffect = TurnEffect<PartialResponseChat, ResponseChat>;
type GreetingEffect = TurnEffect<String, String>;

/// Work finished outside the loop
#[derive(Debug)]
enum RuntimeEvent {
    Reply { turn: u64, effect: ReplyEffect },
    Greeting { turn: u64, effect: GreetingEffect },
    /// The hook cancelled the turn's invocation; no callback will follow
    Superseded { kind: TurnKind, turn: u64 },
    Notify { kind: ToastKind, message: String },
    ToastExpired(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Reply,
    Greeting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveTurn {
    kind: TurnKind,
    id: u64,
}

/// Forwards hook callbacks into the runtime's event channel
struct ForwardEffects<P, F> {
    turn: u64,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    wrap: fn(u64, TurnEffect<P, F>) -> RuntimeEvent,
}

impl<P, F> ForwardEffects<P, F> {
    fn forward(&self, effect: TurnEffect<P, F>) {
        let _ = self.events.send((self.wrap)(self.turn, effect));
    }
}

impl<P: Clone, F: Clone> TurnObserver<P, F> for ForwardEffects<P, F> {
    fn on_stream_data(&mut self, partial: &P) {
        self.forward(TurnEffect::StreamData(partial.clone()));
    }

    fn on_final_data(&mut self, final_data: &F) {
        self.forward(TurnEffect::FinalData(final_data.clone()));
    }

    fn on_error(&mut self, error: &ActionError) {
        self.forward(TurnEffect::Error(error.clone()));
    }
}

/// Generic chat runtime that can work with any message and memory store
pub struct ChatRuntime<S, M>
where
    S: MessageStore + Clone + 'static,
    M: MemoryStore + Clone + 'static,
{
    storage: S,
    memory: M,
    reply: Arc<ActionHook<Betty>>,
    greeting: Arc<ActionHook<InitialMessageChat>>,
    config: RuntimeConfig,
    view: ChatView,
    view_tx: watch::Sender<ChatView>,
    command_rx: mpsc::Receiver<ChatCommand>,
    event_tx: mpsc::UnboundedSender<RuntimeEvent>,
    event_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    instruction: String,
    next_turn: u64,
    active: Option<ActiveTurn>,
    next_toast: u64,
}

impl<S, M> ChatRuntime<S, M>
where
    S: MessageStore + Clone + 'static,
    M: MemoryStore + Clone + 'static,
{
    pub fn new(
        user: UserProfile,
        storage: S,
        memory: M,
        actions: Arc<dyn ActionClient>,
        config: RuntimeConfig,
    ) -> (Self, ChatHandle) {
        let view = ChatView::new(user);
        let (view_tx, view_rx) = watch::channel(view.clone());
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let runtime = Self {
            storage,
            memory,
            reply: Arc::new(ActionHook::new(actions.clone(), config.streaming)),
            greeting: Arc::new(ActionHook::new(actions, config.streaming)),
            config,
            view,
            view_tx,
            command_rx,
            event_tx,
            event_rx,
            instruction: String::new(),
            next_turn: 0,
            active: None,
            next_toast: 0,
        };
        (runtime, ChatHandle::new(command_tx, view_rx))
    }

    pub async fn run(mut self) {
        let user_id = self.view.user.user_id.clone();
        tracing::info!(%user_id, "Starting chat runtime");

        if let Err(e) = self.load_latest().await {
            tracing::error!(%user_id, error = %e, "Failed to load chat history");
            self.push_toast(ToastKind::Error, "Failed to load chat history".to_string());
        }
        self.publish();

        loop {
            tokio::select! {
                biased;
                Some(event) = self.event_rx.recv() => self.handle_event(event).await,
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
            self.publish();
        }

        tracing::info!(%user_id, "Chat runtime stopped");
    }

    fn publish(&mut self) {
        self.view.reply_status = self.reply.status();
        self.view.greeting_status = self.greeting.status();
        self.view_tx.send_replace(self.view.clone());
    }

    // ==================== Commands ====================

    /// Apply a command. The view is published before the caller is answered.
    async fn handle_command(&mut self, command: ChatCommand) {
        let (result, reply) = match command {
            ChatCommand::Submit { text, reply } => (self.submit(text), Some(reply)),
            ChatCommand::Feedback { text, reply } => (self.feedback(text), Some(reply)),
            ChatCommand::NewChat { reply } => {
                self.new_chat().await;
                (Ok(()), Some(reply))
            }
            ChatCommand::SelectSession { session_id, reply } => {
                (self.select_session(&session_id).await, Some(reply))
            }
            ChatCommand::UpdateProfile(profile) => {
                self.view.user = profile;
                (Ok(()), None)
            }
            ChatCommand::DismissToast(id) => {
                self.view.toasts.retain(|t| t.id != id);
                (Ok(()), None)
            }
        };
        self.publish();
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    /// Send a user turn and start the coaching reply
    fn submit(&mut self, text: String) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if let Some(active) = self.active {
            tracing::warn!(
                user_id = %self.view.user.user_id,
                turn = active.id,
                "Rejecting submit while a turn is in flight"
            );
            self.push_toast(
                ToastKind::Error,
                "Please wait for the current reply to finish".to_string(),
            );
            return Err(ChatError::TurnInFlight);
        }

        let message = Message::new(text, Role::User, Some(self.view.user.name.clone()));
        let session_id = self.ensure_session();
        self.view.messages.push(message.clone());
        self.view.is_loading = true;
        self.spawn_persist(&session_id, &message);

        let transcript: Vec<ChatTurn> = self
            .view
            .messages
            .iter()
            .filter_map(ChatTurn::from_message)
            .collect();
        let turn = self.begin_turn(TurnKind::Reply);
        let ticket = self.reply.claim();
        tracing::info!(
            user_id = %self.view.user.user_id,
            %session_id,
            turn,
            "Submitting user turn"
        );

        let user = self.view.user.clone();
        let instruction = self.instruction.clone();
        let memory = self.memory.clone();
        let hook = self.reply.clone();
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            let content = &message.content;
            push_memory(&memory, &events, &user, &session_id, content, MemoryRole::User).await;

            let user_memory = match memory.get_context(&session_id, &user.user_id).await {
                Ok(context) => context,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user.user_id,
                        %session_id,
                        error = %e,
                        "Failed to fetch memory context"
                    );
                    notify(&events, ToastKind::Error, "Failed to load conversation memory");
                    String::new()
                }
            };

            let args = BettyArgs {
                instruction,
                messages: transcript,
                relevant_feedbacks: String::new(),
                user_metadata: UserMetadata {
                    name: user.name.clone(),
                    influence_style: user.influence_style.clone(),
                },
                user_memory,
            };
            let mut observer = ForwardEffects {
                turn,
                events: events.clone(),
                wrap: |turn, effect| RuntimeEvent::Reply { turn, effect },
            };
            let result = hook.run(ticket, args, &mut observer).await;
            report_outcome(&events, TurnKind::Reply, turn, result);
        });

        Ok(())
    }

    /// Record operator feedback in the current session; no model call
    fn feedback(&mut self, text: String) -> Result<(), ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let message = Message::new(text, Role::Developer, Some(ADMIN_DISPLAY_NAME.to_string()));
        let session_id = self.ensure_session();
        tracing::info!(user_id = %self.view.user.user_id, %session_id, "Recording admin feedback");
        self.view.messages.push(message.clone());
        self.spawn_persist(&session_id, &message);
        Ok(())
    }

    /// Clear the transcript and ask the coach for an opening message
    async fn new_chat(&mut self) {
        self.reply.reset();
        self.greeting.reset();
        self.view.messages.clear();
        self.view.streaming_preview = None;
        self.view.current_session_id = None;
        self.refresh_instruction().await;

        let turn = self.begin_turn(TurnKind::Greeting);
        let ticket = self.greeting.claim();
        self.view.is_loading = true;
        tracing::info!(user_id = %self.view.user.user_id, turn, "Starting new chat");

        let args = InitialMessageArgs {
            instruction: self.instruction.clone(),
            relevant_feedbacks: String::new(),
            user_influence_style: self.view.user.influence_style.clone(),
            user_memory: String::new(),
        };
        let hook = self.greeting.clone();
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            let mut observer = ForwardEffects {
                turn,
                events: events.clone(),
                wrap: |turn, effect| RuntimeEvent::Greeting { turn, effect },
            };
            let result = hook.run(ticket, args, &mut observer).await;
            report_outcome(&events, TurnKind::Greeting, turn, result);
        });
    }

    /// Switch the transcript to another session. An in-flight reply keeps
    /// running and lands in whichever session is current when it finishes.
    async fn select_session(&mut self, session_id: &str) -> Result<(), ChatError> {
        if let Err(e) = self.load_session(session_id).await {
            tracing::error!(
                user_id = %self.view.user.user_id,
                %session_id,
                error = %e,
                "Failed to load session"
            );
            self.push_toast(ToastKind::Error, "Failed to load conversation".to_string());
            return Err(e);
        }
        Ok(())
    }

    // ==================== Events ====================

    async fn handle_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::Reply { turn, effect } => {
                if !self.is_active(TurnKind::Reply, turn) {
                    tracing::debug!(turn, "Dropping callback from inactive reply");
                    return;
                }
                match effect {
                    TurnEffect::StreamData(partial) => {
                        self.view.streaming_preview = Some(partial.answer.unwrap_or_default());
                    }
                    TurnEffect::FinalData(reply) => {
                        self.active = None;
                        let session_id = self.ensure_session();
                        self.commit_assistant(&session_id, reply.answer).await;
                    }
                    TurnEffect::Error(error) => self.fail_turn(&error),
                    TurnEffect::Data(_) => {}
                }
            }
            RuntimeEvent::Greeting { turn, effect } => {
                if !self.is_active(TurnKind::Greeting, turn) {
                    tracing::debug!(turn, "Dropping callback from inactive greeting");
                    return;
                }
                match effect {
                    TurnEffect::StreamData(partial) => {
                        self.view.streaming_preview = Some(partial);
                    }
                    TurnEffect::FinalData(greeting) => {
                        self.active = None;
                        let session_id = uuid::Uuid::new_v4().to_string();
                        self.view.current_session_id = Some(session_id.clone());
                        self.commit_assistant(&session_id, greeting).await;
                    }
                    TurnEffect::Error(error) => self.fail_turn(&error),
                    TurnEffect::Data(_) => {}
                }
            }
            RuntimeEvent::Superseded { kind, turn } => {
                if self.is_active(kind, turn) {
                    tracing::debug!(turn, ?kind, "Active turn superseded, clearing loading state");
                    self.active = None;
                    self.view.streaming_preview = None;
                    self.view.is_loading = false;
                }
            }
            RuntimeEvent::Notify { kind, message } => self.push_toast(kind, message),
            RuntimeEvent::ToastExpired(id) => self.view.toasts.retain(|t| t.id != id),
        }
    }

    /// Persist, remember and display a finished assistant message.
    /// The memory write runs in the background.
    async fn commit_assistant(&mut self, session_id: &str, content: String) {
        let user_id = self.view.user.user_id.clone();
        let display_name = Some(ASSISTANT_DISPLAY_NAME.to_string());
        let message = Message::new(content, Role::Assistant, display_name);

        if let Err(e) = self
            .storage
            .insert_message(
                &user_id,
                session_id,
                &message.content,
                Role::Assistant,
                message.timestamp,
            )
            .await
        {
            tracing::error!(
                %user_id,
                %session_id,
                error = %e,
                "Failed to persist assistant message"
            );
            self.push_toast(ToastKind::Error, "Failed to save reply".to_string());
        }

        let memory = self.memory.clone();
        let events = self.event_tx.clone();
        let user = self.view.user.clone();
        let memory_session = session_id.to_string();
        let content = message.content.clone();
        tokio::spawn(async move {
            let role = MemoryRole::Assistant;
            push_memory(&memory, &events, &user, &memory_session, &content, role).await;
        });

        self.view.streaming_preview = None;
        self.view.history.upsert_and_promote(
            session_id,
            &message.content,
            message.timestamp,
            &self.view.user,
        );
        self.view.messages.push(message);
        self.view.is_loading = false;
        tracing::info!(%user_id, %session_id, "Assistant turn committed");
    }

    fn fail_turn(&mut self, error: &ActionError) {
        self.active = None;
        self.view.streaming_preview = None;
        self.view.is_loading = false;
        if error.kind.is_user_visible() {
            self.push_toast(ToastKind::Error, format!("Failed to get a reply: {}", error.message));
        }
    }

    // ==================== Helpers ====================

    fn begin_turn(&mut self, kind: TurnKind) -> u64 {
        self.next_turn += 1;
        self.active = Some(ActiveTurn {
            kind,
            id: self.next_turn,
        });
        self.next_turn
    }

    fn is_active(&self, kind: TurnKind, turn: u64) -> bool {
        self.active == Some(ActiveTurn { kind, id: turn })
    }

    /// Current session id, minting one if none is active
    fn ensure_session(&mut self) -> String {
        self.view
            .current_session_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }

    fn spawn_persist(&self, session_id: &str, message: &Message) {
        let storage = self.storage.clone();
        let events = self.event_tx.clone();
        let user_id = self.view.user.user_id.clone();
        let session_id = session_id.to_string();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(e) = storage
                .insert_message(
                    &user_id,
                    &session_id,
                    &message.content,
                    message.role,
                    message.timestamp,
                )
                .await
            {
                tracing::error!(
                    %user_id,
                    %session_id,
                    role = %message.role,
                    error = %e,
                    "Failed to persist message"
                );
                notify(&events, ToastKind::Error, "Failed to save message");
            }
        });
    }

    fn push_toast(&mut self, kind: ToastKind, message: String) {
        self.next_toast += 1;
        let id = self.next_toast;
        self.view.toasts.push(Toast { id, kind, message });

        let events = self.event_tx.clone();
        let duration = self.config.toast_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = events.send(RuntimeEvent::ToastExpired(id));
        });
    }

    async fn refresh_instruction(&mut self) {
        match self.storage.instruction().await {
            Ok(Some(instruction)) => self.instruction = instruction,
            Ok(None) => {
                tracing::warn!("No coaching instruction configured");
                self.instruction.clear();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load coaching instruction");
                self.instruction.clear();
            }
        }
    }

    /// Rebuild history and open the most recently active session
    async fn load_latest(&mut self) -> Result<(), ChatError> {
        self.refresh_instruction().await;

        let messages = self
            .storage
            .list_by_user(&self.view.user.user_id, Role::TRANSCRIPT)
            .await
            .map_err(ChatError::Storage)?;
        let mut history = SessionHistory::new();
        history.rebuild_from_history(&messages, &self.view.user);
        let latest = history.latest().map(|s| s.id.clone());
        self.view.history = history;

        match latest {
            Some(session_id) => self.load_session(&session_id).await,
            None => {
                self.view.messages.clear();
                self.view.current_session_id = None;
                Ok(())
            }
        }
    }

    async fn load_session(&mut self, session_id: &str) -> Result<(), ChatError> {
        let stored = self
            .storage
            .list_by_session(session_id, Role::TRANSCRIPT)
            .await
            .map_err(ChatError::Storage)?;
        self.view.messages = stored
            .iter()
            .map(|m| m.to_message(Some(self.display_name(m.role))))
            .collect();
        self.view.current_session_id = Some(session_id.to_string());
        Ok(())
    }

    fn display_name(&self, role: Role) -> String {
        match role {
            Role::User => self.view.user.name.clone(),
            Role::Assistant => ASSISTANT_DISPLAY_NAME.to_string(),
            Role::Developer => ADMIN_DISPLAY_NAME.to_string(),
        }
    }
}

fn notify(events: &mpsc::UnboundedSender<RuntimeEvent>, kind: ToastKind, message: &str) {
    let _ = events.send(RuntimeEvent::Notify {
        kind,
        message: message.to_string(),
    });
}

/// Tell the loop about a turn that was cancelled; other outcomes arrived as
/// callbacks already
fn report_outcome<T>(
    events: &mpsc::UnboundedSender<RuntimeEvent>,
    kind: TurnKind,
    turn: u64,
    result: Result<T, ActionError>,
) {
    match result {
        Ok(_) => {}
        Err(e) if e.kind == ActionErrorKind::Cancelled => {
            let _ = events.send(RuntimeEvent::Superseded { kind, turn });
        }
        Err(e) => tracing::debug!(turn, ?kind, error = %e, "Turn ended without a result"),
    }
}

/// Write a message through to memory, creating the memory session first
async fn push_memory<M: MemoryStore>(
    memory: &M,
    events: &mpsc::UnboundedSender<RuntimeEvent>,
    user: &UserProfile,
    session_id: &str,
    content: &str,
    role: MemoryRole,
) {
    let result = match memory.upsert_session(&user.user_id, session_id).await {
        Ok(()) => {
            memory
                .add_message(session_id, content, role, Some(&user.name))
                .await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::error!(
            user_id = %user.user_id,
            %session_id,
            %role,
            error = %e,
            "Failed to update memory"
        );
        notify(events, ToastKind::Error, "Failed to update conversation memory");
    }
}

/// Wait for a runtime reply, mapping a dropped runtime to `RuntimeStopped`
pub(super) async fn await_reply(
    rx: oneshot::Receiver<Result<(), ChatError>>,
) -> Result<(), ChatError> {
    rx.await.unwrap_or(Err(ChatError::RuntimeStopped))
}

impl ChatView {
    fn new(user: UserProfile) -> Self {
        Self {
            user,
            current_session_id: None,
            messages: Vec::new(),
            streaming_preview: None,
            history: SessionHistory::new(),
            toasts: Vec::new(),
            is_loading: false,
            reply_status: TurnStatus::Idle,
            greeting_status: TurnStatus::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::{
        wait_until, MemoryCall, MockActionClient, MockMemoryStore, MockMessageStore,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::time::Duration;

    fn ada() -> UserProfile {
        UserProfile {
            user_id: "u1".to_string(),
            name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            influence_style: "Analytical".to_string(),
            color: "#ff8800".to_string(),
        }
    }

    struct Harness {
        handle: ChatHandle,
        store: Arc<MockMessageStore>,
        memory: Arc<MockMemoryStore>,
        actions: Arc<MockActionClient>,
    }

    fn start_with(store: MockMessageStore, streaming: bool) -> Harness {
        let store = Arc::new(store);
        let memory = Arc::new(MockMemoryStore::with_context("ada likes tea"));
        let actions = Arc::new(MockActionClient::new());
        let (runtime, handle) = ChatRuntime::new(
            ada(),
            store.clone(),
            memory.clone(),
            actions.clone(),
            RuntimeConfig {
                streaming,
                toast_duration: Duration::from_secs(60),
            },
        );
        tokio::spawn(runtime.run());
        Harness {
            handle,
            store,
            memory,
            actions,
        }
    }

    fn start() -> Harness {
        start_with(MockMessageStore::with_instruction("Coach gently."), true)
    }

    async fn wait_for_view(handle: &ChatHandle, check: impl Fn(&ChatView) -> bool) -> ChatView {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if check(&rx.borrow_and_update()) {
                    return rx.borrow().clone();
                }
                if rx.changed().await.is_err() {
                    panic!("runtime stopped");
                }
            }
        })
        .await
        .expect("view never reached expected state")
    }

    #[tokio::test]
    async fn test_fresh_session_user_turn() {
        let h = start();
        h.actions.queue_stream(&[r#"{"final":{"answer":"Hi Ada!"}}"#]);

        h.handle.submit("Hello".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 2).await;

        let session_id = view.current_session_id.clone().unwrap();
        assert!(!session_id.is_empty());

        let store = h.store.clone();
        wait_until(move || store.inserted().len() == 2).await;
        let inserted = h.store.inserted();
        assert_eq!(inserted[0].user_id, "u1");
        assert_eq!(inserted[0].session_id, session_id);
        assert_eq!(inserted[0].content, "Hello");
        assert_eq!(inserted[0].role, Role::User);

        let memory_calls = h.memory.calls();
        assert!(memory_calls.contains(&MemoryCall::AddMessage {
            session_id: session_id.clone(),
            content: "Hello".to_string(),
            role: MemoryRole::User,
            speaker_name: Some("Ada Lovelace".to_string()),
        }));
        let add_index = memory_calls
            .iter()
            .position(|c| matches!(c, MemoryCall::AddMessage { role: MemoryRole::User, .. }))
            .unwrap();
        let context_index = memory_calls
            .iter()
            .position(|c| matches!(c, MemoryCall::GetContext { .. }))
            .unwrap();
        assert!(add_index < context_index);

        let calls = h.actions.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function, "Betty");
        let named = calls[0].named_args();
        assert_eq!(named["user_memory"], json!("ada likes tea"));
        assert_eq!(named["instruction"], json!("Coach gently."));
        assert_eq!(named["messages"], json!([{"role": "user", "content": "Hello"}]));
    }

    #[tokio::test]
    async fn test_streamed_reply_updates_preview_then_commits_once() {
        let h = start();
        let gate = h.actions.queue_gated_stream();

        h.handle.submit("Hello".to_string()).await.unwrap();

        gate.send(r#"{"partial":{"answer":"Hel"}}"#);
        let view =
            wait_for_view(&h.handle, |v| v.streaming_preview.as_deref() == Some("Hel")).await;
        assert!(view.is_loading);

        gate.send(r#"{"partial":{"answer":"Hello there"}}"#);
        wait_for_view(&h.handle, |v| v.streaming_preview.as_deref() == Some("Hello there")).await;

        gate.send(r#"{"final":{"answer":"Hello there!"}}"#);
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 2).await;

        assert_eq!(view.streaming_preview, None);
        assert!(!view.is_loading);
        assert_eq!(view.messages[1].content, "Hello there!");
        assert_eq!(view.messages[1].role, Role::Assistant);
        assert_eq!(view.reply_status, TurnStatus::Success);

        let assistant_inserts: Vec<_> = h
            .store
            .inserted()
            .into_iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistant_inserts.len(), 1);
        assert_eq!(assistant_inserts[0].content, "Hello there!");

        let summary = view.history.latest().unwrap();
        assert_eq!(Some(&summary.id), view.current_session_id.as_ref());
        assert_eq!(summary.last_message, "Hello there!");
        let expected = MemoryCall::AddMessage {
            session_id: summary.id.clone(),
            content: "Hello there!".to_string(),
            role: MemoryRole::Assistant,
            speaker_name: Some("Ada Lovelace".to_string()),
        };
        let memory = h.memory.clone();
        wait_until(move || memory.calls().contains(&expected)).await;
    }

    #[tokio::test]
    async fn test_error_frame_commits_nothing() {
        let h = start();
        h.actions
            .queue_stream(&[r#"{"partial":{"answer":"Hel"}}"#, r#"{"error":"model overloaded"}"#]);

        h.handle.submit("Hello".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| !v.is_loading && !v.toasts.is_empty()).await;

        assert_eq!(view.reply_status, TurnStatus::Error);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.streaming_preview, None);
        assert!(view.history.is_empty());
        assert!(view.toasts[0].message.contains("model overloaded"));
        assert_eq!(view.toasts[0].kind, ToastKind::Error);
        assert!(h
            .store
            .inserted()
            .iter()
            .all(|m| m.role != Role::Assistant));
    }

    #[tokio::test]
    async fn test_late_final_lands_in_newly_selected_session() {
        let t0 = Utc::now() - ChronoDuration::minutes(5);
        let store = MockMessageStore::with_instruction("Coach gently.");
        store.seed("u1", "session-b", "older chat", Role::User, t0);
        let h = start_with(store, true);
        let view = wait_for_view(&h.handle, |v| v.current_session_id.is_some()).await;
        assert_eq!(view.current_session_id.as_deref(), Some("session-b"));

        h.actions.queue_stream(&[r#"{"final":"Welcome back"}"#]);
        h.handle.new_chat().await.unwrap();
        let view = wait_for_view(&h.handle, |v| {
            v.messages.len() == 1 && v.current_session_id.as_deref() != Some("session-b")
        })
        .await;
        let session_a = view.current_session_id.clone().unwrap();

        let gate = h.actions.queue_gated_stream();
        h.handle.submit("Hi".to_string()).await.unwrap();
        gate.send(r#"{"partial":{"answer":"Thin"}}"#);
        wait_for_view(&h.handle, |v| v.streaming_preview.is_some()).await;

        h.handle.select_session("session-b".to_string()).await.unwrap();
        gate.send(r#"{"final":{"answer":"Thinking done"}}"#);
        let view = wait_for_view(&h.handle, |v| {
            v.messages.iter().any(|m| m.content == "Thinking done")
        })
        .await;

        assert_eq!(view.current_session_id.as_deref(), Some("session-b"));
        assert_eq!(view.messages[0].content, "older chat");
        let committed = h
            .store
            .inserted()
            .into_iter()
            .find(|m| m.content == "Thinking done")
            .unwrap();
        assert_eq!(committed.session_id, "session-b");
        assert_ne!(committed.session_id, session_a);
    }

    #[tokio::test]
    async fn test_double_submit_is_rejected() {
        let h = start();
        let _gate = h.actions.queue_gated_stream();

        h.handle.submit("first".to_string()).await.unwrap();
        let err = h.handle.submit("second".to_string()).await.unwrap_err();

        assert_eq!(err, ChatError::TurnInFlight);
        let view = h.handle.view();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.toasts.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_submit_is_rejected() {
        let h = start();
        assert_eq!(
            h.handle.submit("   ".to_string()).await.unwrap_err(),
            ChatError::EmptyMessage
        );
        assert!(h.actions.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_admin_feedback_is_persisted_but_not_sent_anywhere_else() {
        let h = start();
        h.handle.feedback("Be more concise".to_string()).await.unwrap();

        let view = h.handle.view();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].role, Role::Developer);
        assert_eq!(view.messages[0].display_name.as_deref(), Some("Admin"));
        assert!(!view.is_loading);

        let store = h.store.clone();
        wait_until(move || store.inserted().len() == 1).await;
        assert_eq!(h.store.inserted()[0].role, Role::Developer);
        assert!(h.memory.calls().is_empty());
        assert!(h.actions.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn test_admin_feedback_is_excluded_from_model_transcript() {
        let h = start();
        h.handle.feedback("Be more concise".to_string()).await.unwrap();
        h.actions.queue_stream(&[r#"{"final":{"answer":"ok"}}"#]);
        h.handle.submit("Hello".to_string()).await.unwrap();
        wait_for_view(&h.handle, |v| v.messages.len() == 3).await;

        let named = h.actions.recorded_calls()[0].named_args();
        assert_eq!(named["messages"], json!([{"role": "user", "content": "Hello"}]));
    }

    #[tokio::test]
    async fn test_new_chat_greets_under_fresh_session() {
        let h = start();
        h.actions
            .queue_stream(&[r#"{"partial":"Welc"}"#, r#"{"final":"Welcome, Ada"}"#]);

        h.handle.new_chat().await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 1).await;

        let session_id = view.current_session_id.clone().unwrap();
        assert_eq!(view.messages[0].content, "Welcome, Ada");
        assert_eq!(view.history.latest().map(|s| s.id.clone()), Some(session_id.clone()));
        assert_eq!(view.greeting_status, TurnStatus::Success);

        let call = &h.actions.recorded_calls()[0];
        assert_eq!(call.function, "InitialMessageChat");
        let named = call.named_args();
        assert_eq!(named["instruction"], json!("Coach gently."));
        assert_eq!(named["relevant_feedbacks"], json!(""));
        assert_eq!(named["user_influence_style"], json!("Analytical"));
        assert_eq!(named["user_memory"], json!(""));

        let inserted = h.store.inserted();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].session_id, session_id);
        let expected = MemoryCall::UpsertSession {
            user_id: "u1".to_string(),
            session_id,
        };
        let memory = h.memory.clone();
        wait_until(move || memory.calls().contains(&expected)).await;
    }

    #[tokio::test]
    async fn test_slow_memory_write_does_not_hold_commit() {
        let h = start();
        let release = h.memory.gate_add_message();
        h.actions.queue_stream(&[r#"{"final":"Welcome, Ada"}"#]);

        h.handle.new_chat().await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 1 && !v.is_loading).await;
        assert_eq!(view.messages[0].content, "Welcome, Ada");

        let memory = h.memory.clone();
        wait_until(move || {
            memory
                .calls()
                .iter()
                .any(|c| matches!(c, MemoryCall::AddMessage { role: MemoryRole::Assistant, .. }))
        })
        .await;

        // The loop stays responsive while the write is held.
        h.handle.feedback("noted".to_string()).await.unwrap();
        assert_eq!(h.handle.view().messages.len(), 2);
        let _ = release.send(());
    }

    #[tokio::test]
    async fn test_new_chat_supersedes_in_flight_reply() {
        let h = start();
        let gate = h.actions.queue_gated_stream();
        h.handle.submit("Hello".to_string()).await.unwrap();
        gate.send(r#"{"partial":{"answer":"Hel"}}"#);
        wait_for_view(&h.handle, |v| v.streaming_preview.is_some()).await;

        h.actions.queue_stream(&[r#"{"final":"Fresh start"}"#]);
        h.handle.new_chat().await.unwrap();
        gate.send(r#"{"final":{"answer":"stale reply"}}"#);

        let view = wait_for_view(&h.handle, |v| v.messages.len() == 1 && !v.is_loading).await;
        assert_eq!(view.messages[0].content, "Fresh start");
        assert!(h.store.inserted().iter().all(|m| m.content != "stale reply"));
    }

    #[tokio::test]
    async fn test_new_chat_during_memory_fetch_leaves_chat_usable() {
        let h = start();
        let release_context = h.memory.gate_context();

        h.handle.submit("one".to_string()).await.unwrap();
        let memory = h.memory.clone();
        wait_until(move || {
            memory
                .calls()
                .iter()
                .any(|c| matches!(c, MemoryCall::GetContext { .. }))
        })
        .await;

        h.actions.queue_stream(&[r#"{"final":"Fresh start"}"#]);
        h.handle.new_chat().await.unwrap();
        wait_for_view(&h.handle, |v| v.messages.len() == 1 && !v.is_loading).await;

        let live = h.actions.queue_gated_stream();
        h.handle.submit("two".to_string()).await.unwrap();
        release_context.send(()).unwrap();
        live.send(r#"{"final":{"answer":"Answer to two"}}"#);

        let view = wait_for_view(&h.handle, |v| v.messages.len() == 3 && !v.is_loading).await;
        let contents: Vec<_> = view.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Fresh start", "two", "Answer to two"]);
        assert_eq!(view.reply_status, TurnStatus::Success);

        let calls = h.actions.recorded_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function, "InitialMessageChat");
        assert_eq!(
            calls[1].named_args()["messages"],
            json!([
                {"role": "assistant", "content": "Fresh start"},
                {"role": "user", "content": "two"},
            ])
        );

        h.actions.queue_stream(&[r#"{"final":{"answer":"Answer to three"}}"#]);
        h.handle.submit("three".to_string()).await.unwrap();
        wait_for_view(&h.handle, |v| v.messages.len() == 5).await;
    }

    #[tokio::test]
    async fn test_superseded_active_turn_clears_loading() {
        let actions: Arc<dyn ActionClient> = Arc::new(MockActionClient::new());
        let (mut runtime, _handle) = ChatRuntime::new(
            ada(),
            Arc::new(MockMessageStore::new()),
            Arc::new(MockMemoryStore::with_context("")),
            actions,
            RuntimeConfig::default(),
        );
        let stale = runtime.begin_turn(TurnKind::Reply);
        let turn = runtime.begin_turn(TurnKind::Reply);
        runtime.view.is_loading = true;
        runtime.view.streaming_preview = Some("Hel".to_string());

        runtime
            .handle_event(RuntimeEvent::Superseded { kind: TurnKind::Reply, turn: stale })
            .await;
        assert!(runtime.view.is_loading);

        runtime
            .handle_event(RuntimeEvent::Superseded { kind: TurnKind::Greeting, turn })
            .await;
        assert!(runtime.view.is_loading);

        runtime
            .handle_event(RuntimeEvent::Superseded { kind: TurnKind::Reply, turn })
            .await;
        assert!(!runtime.view.is_loading);
        assert_eq!(runtime.view.streaming_preview, None);
        assert_eq!(runtime.active, None);
    }

    #[tokio::test]
    async fn test_reload_orders_session_by_creation_time() {
        let store = MockMessageStore::with_instruction("Coach gently.");
        store.delay_inserts(Role::User, Duration::from_millis(100));
        let h = start_with(store, true);
        h.actions.queue_stream(&[r#"{"final":{"answer":"reply"}}"#]);

        h.handle.submit("question".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 2).await;
        let store = h.store.clone();
        wait_until(move || store.inserted().len() == 2).await;
        assert_eq!(h.store.inserted()[0].role, Role::Assistant);

        let session_id = view.current_session_id.clone().unwrap();
        h.handle.select_session(session_id).await.unwrap();
        let contents: Vec<_> = h
            .handle
            .view()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect();
        assert_eq!(contents, vec!["question", "reply"]);
    }

    #[tokio::test]
    async fn test_initial_load_opens_latest_session() {
        let t0 = Utc::now() - ChronoDuration::minutes(10);
        let store = MockMessageStore::with_instruction("Coach gently.");
        store.seed("u1", "A", "a1", Role::User, t0);
        store.seed("u1", "B", "b2", Role::User, t0 + ChronoDuration::minutes(1));
        store.seed("u1", "A", "a3", Role::Assistant, t0 + ChronoDuration::minutes(2));
        store.seed("u1", "A", "note", Role::Developer, t0 + ChronoDuration::minutes(3));

        let h = start_with(store, true);
        let view = wait_for_view(&h.handle, |v| v.current_session_id.is_some()).await;

        let ids: Vec<_> = view.history.summaries().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(view.history.latest().unwrap().last_message, "a3");
        assert_eq!(view.current_session_id.as_deref(), Some("A"));
        let contents: Vec<_> = view.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "a3"]);
        assert_eq!(view.messages[0].display_name.as_deref(), Some("Ada Lovelace"));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_optimistic_message() {
        let store = MockMessageStore::with_instruction("Coach gently.");
        store.fail_inserts(true);
        let h = start_with(store, true);
        h.actions.queue_stream(&[r#"{"final":{"answer":"Hi"}}"#]);

        h.handle.submit("Hello".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 2 && v.toasts.len() >= 2).await;

        assert_eq!(view.messages[0].content, "Hello");
        assert!(view.toasts.iter().all(|t| t.kind == ToastKind::Error));
    }

    #[tokio::test]
    async fn test_memory_failure_does_not_block_reply() {
        let h = start();
        h.memory.fail(true);
        h.actions.queue_stream(&[r#"{"final":{"answer":"Hi"}}"#]);

        h.handle.submit("Hello".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 2).await;

        assert_eq!(view.messages[1].content, "Hi");
        let named = h.actions.recorded_calls()[0].named_args();
        assert_eq!(named["user_memory"], json!(""));
    }

    #[tokio::test]
    async fn test_non_streaming_reply_never_shows_preview() {
        let h = start_with(MockMessageStore::with_instruction("Coach gently."), false);
        h.actions.queue_value(json!({"answer": "Hi Ada"}));

        h.handle.submit("Hello".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| v.messages.len() == 2).await;

        assert_eq!(view.messages[1].content, "Hi Ada");
        assert_eq!(view.streaming_preview, None);
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_toast() {
        let h = start();
        h.actions
            .queue_stream_error(ActionError::transport("connection refused"));

        h.handle.submit("Hello".to_string()).await.unwrap();
        let view = wait_for_view(&h.handle, |v| !v.is_loading && !v.toasts.is_empty()).await;

        assert!(view.toasts[0].message.contains("connection refused"));
        assert!(ActionErrorKind::Transport.is_user_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toasts_expire() {
        let h = start();
        let _gate = h.actions.queue_gated_stream();
        h.handle.submit("first".to_string()).await.unwrap();
        let _ = h.handle.submit("second".to_string()).await;
        assert_eq!(h.handle.view().toasts.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        wait_for_view(&h.handle, |v| v.toasts.is_empty()).await;
    }

    #[tokio::test]
    async fn test_dismiss_toast() {
        let h = start();
        let _gate = h.actions.queue_gated_stream();
        h.handle.submit("first".to_string()).await.unwrap();
        let _ = h.handle.submit("second".to_string()).await;
        let id = h.handle.view().toasts[0].id;

        h.handle.dismiss_toast(id).await.unwrap();
        wait_for_view(&h.handle, |v| v.toasts.is_empty()).await;
    }
}
