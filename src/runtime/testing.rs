//! Mock implementations for testing
//!
//! These mocks enable runtime and API tests without real I/O.

use super::traits::*;
use crate::action::{ActionCall, ActionClient, ActionError};
use crate::db::{Role, StoredMessage, UserProfile};
use crate::memory::MemoryRole;
use crate::stream_decoder::ByteStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Mock Action Client
// ============================================================================

enum MockResponse {
    Value(Value),
    Lines(Vec<String>),
    Gated(mpsc::UnboundedReceiver<String>),
    Error(ActionError),
}

/// Feeds lines into a gated mock stream as the test decides
pub struct StreamGate {
    tx: mpsc::UnboundedSender<String>,
}

impl StreamGate {
    /// Deliver one frame line; ignored once the stream has been dropped
    pub fn send(&self, line: &str) {
        let _ = self.tx.send(line.to_string());
    }
}

/// Mock action client that answers calls from a queue
pub struct MockActionClient {
    responses: Mutex<VecDeque<MockResponse>>,
    /// Record of all calls made
    calls: Mutex<Vec<ActionCall>>,
}

impl MockActionClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a non-streaming result
    pub fn queue_value(&self, value: Value) {
        self.push(MockResponse::Value(value));
    }

    /// Queue a stream that yields each line as its own chunk
    pub fn queue_stream(&self, lines: &[&str]) {
        self.push(MockResponse::Lines(
            lines.iter().map(|l| (*l).to_string()).collect(),
        ));
    }

    /// Queue a stream whose lines are released through the returned gate
    pub fn queue_gated_stream(&self) -> StreamGate {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(MockResponse::Gated(rx));
        StreamGate { tx }
    }

    /// Queue a failure for the next call of either kind
    pub fn queue_stream_error(&self, error: ActionError) {
        self.push(MockResponse::Error(error));
    }

    pub fn recorded_calls(&self) -> Vec<ActionCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, response: MockResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn next(&self, call: &ActionCall) -> Option<MockResponse> {
        self.calls.lock().unwrap().push(call.clone());
        self.responses.lock().unwrap().pop_front()
    }
}

impl Default for MockActionClient {
    fn default() -> Self {
        Self::new()
    }
}

fn line_chunk(line: String) -> Result<Vec<u8>, ActionError> {
    Ok(format!("{line}\n").into_bytes())
}

#[async_trait]
impl ActionClient for MockActionClient {
    async fn call(&self, call: &ActionCall) -> Result<Value, ActionError> {
        match self.next(call) {
            Some(MockResponse::Value(value)) => Ok(value),
            Some(MockResponse::Error(error)) => Err(error),
            Some(_) => Err(ActionError::transport("mock queued a stream for a call")),
            None => Err(ActionError::transport("no mock response queued")),
        }
    }

    async fn stream(&self, call: &ActionCall) -> Result<ByteStream, ActionError> {
        match self.next(call) {
            Some(MockResponse::Lines(lines)) => {
                Ok(futures::stream::iter(lines.into_iter().map(line_chunk)).boxed())
            }
            Some(MockResponse::Gated(rx)) => {
                Ok(UnboundedReceiverStream::new(rx).map(line_chunk).boxed())
            }
            Some(MockResponse::Error(error)) => Err(error),
            Some(MockResponse::Value(_)) => {
                Err(ActionError::transport("mock queued a value for a stream"))
            }
            None => Err(ActionError::transport("no mock response queued")),
        }
    }
}

// ============================================================================
// Mock Message Store
// ============================================================================

/// In-memory message store that records inserts
pub struct MockMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
    inserted: Mutex<Vec<StoredMessage>>,
    users: Mutex<HashMap<String, UserProfile>>,
    instruction: Mutex<Option<String>>,
    fail_inserts: Mutex<bool>,
    insert_delays: Mutex<HashMap<Role, Duration>>,
}

impl MockMessageStore {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            inserted: Mutex::new(Vec::new()),
            users: Mutex::new(HashMap::new()),
            instruction: Mutex::new(None),
            fail_inserts: Mutex::new(false),
            insert_delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_instruction(instruction: &str) -> Self {
        let store = Self::new();
        *store.instruction.lock().unwrap() = Some(instruction.to_string());
        store
    }

    /// Pre-existing message, not counted as an insert
    pub fn seed(
        &self,
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        at: DateTime<Utc>,
    ) {
        let mut messages = self.messages.lock().unwrap();
        let message = Self::build(&messages, user_id, session_id, content, role, at);
        messages.push(message);
    }

    pub fn fail_inserts(&self, fail: bool) {
        *self.fail_inserts.lock().unwrap() = fail;
    }

    /// Hold inserts of `role` for `delay` before they land
    pub fn delay_inserts(&self, role: Role, delay: Duration) {
        self.insert_delays.lock().unwrap().insert(role, delay);
    }

    /// Messages inserted through the store API, in call order
    pub fn inserted(&self) -> Vec<StoredMessage> {
        self.inserted.lock().unwrap().clone()
    }

    fn build(
        existing: &[StoredMessage],
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        at: DateTime<Utc>,
    ) -> StoredMessage {
        let sequence_id = existing
            .iter()
            .filter(|m| m.session_id == session_id)
            .count() as i64
            + 1;
        StoredMessage {
            id: format!("msg-{}", existing.len() + 1),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            sequence_id,
            content: content.to_string(),
            role,
            created_at: at,
        }
    }
}

impl Default for MockMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn insert_message(
        &self,
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage, String> {
        let delay = self.insert_delays.lock().unwrap().get(&role).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail_inserts.lock().unwrap() {
            return Err("mock insert failure".to_string());
        }
        let mut messages = self.messages.lock().unwrap();
        let message = Self::build(&messages, user_id, session_id, content, role, created_at);
        messages.push(message.clone());
        self.inserted.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String> {
        let mut found: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id && roles.contains(&m.role))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn list_by_session(
        &self,
        session_id: &str,
        roles: &[Role],
    ) -> Result<Vec<StoredMessage>, String> {
        let mut found: Vec<_> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.session_id == session_id && roles.contains(&m.role))
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.created_at, m.sequence_id));
        Ok(found)
    }

    async fn instruction(&self) -> Result<Option<String>, String> {
        Ok(self.instruction.lock().unwrap().clone())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>, String> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String> {
        self.users
            .lock()
            .unwrap()
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, String> {
        let mut users: Vec<_> = self.users.lock().unwrap().values().cloned().collect();
        users.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(users)
    }
}

// ============================================================================
// Mock Memory Store
// ============================================================================

/// One recorded memory store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCall {
    UpsertUser(String),
    UpsertSession {
        user_id: String,
        session_id: String,
    },
    AddMessage {
        session_id: String,
        content: String,
        role: MemoryRole,
        speaker_name: Option<String>,
    },
    GetContext {
        session_id: String,
        user_id: String,
    },
}

/// Memory store that records calls and returns a fixed context
pub struct MockMemoryStore {
    context: String,
    calls: Mutex<Vec<MemoryCall>>,
    fail: Mutex<bool>,
    context_gate: Mutex<Option<oneshot::Receiver<()>>>,
    message_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MockMemoryStore {
    pub fn with_context(context: &str) -> Self {
        Self {
            context: context.to_string(),
            calls: Mutex::new(Vec::new()),
            fail: Mutex::new(false),
            context_gate: Mutex::new(None),
            message_gate: Mutex::new(None),
        }
    }

    /// Hold the next `get_context` until the returned sender fires or drops
    pub fn gate_context(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.context_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Hold the next `add_message` until the returned sender fires or drops
    pub fn gate_add_message(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.message_gate.lock().unwrap() = Some(rx);
        tx
    }

    /// Make every call fail from now on
    pub fn fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<MemoryCall> {
        self.calls.lock().unwrap().clone()
    }

    async fn pass(gate: &Mutex<Option<oneshot::Receiver<()>>>) {
        let gate = gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
    }

    fn record(&self, call: MemoryCall) -> Result<(), String> {
        self.calls.lock().unwrap().push(call);
        if *self.fail.lock().unwrap() {
            Err("mock memory failure".to_string())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MemoryStore for MockMemoryStore {
    async fn upsert_user(&self, profile: &UserProfile) -> Result<(), String> {
        self.record(MemoryCall::UpsertUser(profile.user_id.clone()))
    }

    async fn upsert_session(&self, user_id: &str, session_id: &str) -> Result<(), String> {
        self.record(MemoryCall::UpsertSession {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        })
    }

    async fn add_message(
        &self,
        session_id: &str,
        content: &str,
        role: MemoryRole,
        speaker_name: Option<&str>,
    ) -> Result<(), String> {
        self.record(MemoryCall::AddMessage {
            session_id: session_id.to_string(),
            content: content.to_string(),
            role,
            speaker_name: speaker_name.map(String::from),
        })?;
        Self::pass(&self.message_gate).await;
        Ok(())
    }

    async fn get_context(&self, session_id: &str, user_id: &str) -> Result<String, String> {
        self.record(MemoryCall::GetContext {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        })?;
        Self::pass(&self.context_gate).await;
        Ok(self.context.clone())
    }
}
