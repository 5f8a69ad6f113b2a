//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatResponse, ErrorResponse, SessionListResponse, SuccessResponse, TextRequest,
    UserListResponse, UserResponse,
};
use super::AppState;
use crate::db::UserProfile;
use crate::runtime::{ChatError, ChatHandle, ChatView};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Profiles
        .route("/api/users", get(list_users).post(upsert_user))
        // Chat view snapshot and live feed
        .route("/api/users/:user_id/view", get(get_view))
        .route("/api/users/:user_id/stream", get(stream_view))
        // Chat actions
        .route("/api/users/:user_id/messages", post(send_message))
        .route("/api/users/:user_id/feedback", post(send_feedback))
        .route("/api/users/:user_id/new-chat", post(new_chat))
        // History
        .route("/api/users/:user_id/sessions", get(list_sessions))
        .route(
            "/api/users/:user_id/sessions/:session_id/select",
            post(select_session),
        )
        .route(
            "/api/users/:user_id/toasts/:toast_id/dismiss",
            post(dismiss_toast),
        )
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

async fn chat(state: &AppState, user_id: &str) -> Result<ChatHandle, AppError> {
    state
        .runtime
        .get_or_create(user_id)
        .await
        .map_err(AppError::from)
}

// ============================================================
// Profiles
// ============================================================

async fn list_users(State(state): State<AppState>) -> Result<Json<UserListResponse>, AppError> {
    let users = state.runtime.list_users().await?;
    Ok(Json(UserListResponse {
        users: users.into_iter().map(UserResponse::from).collect(),
    }))
}

async fn upsert_user(
    State(state): State<AppState>,
    Json(profile): Json<UserProfile>,
) -> Result<Json<UserResponse>, AppError> {
    if profile.user_id.trim().is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }
    state.runtime.upsert_user(profile.clone()).await?;
    Ok(Json(UserResponse::from(profile)))
}

// ============================================================
// Chat View
// ============================================================

async fn get_view(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ChatView>, AppError> {
    Ok(Json(chat(&state, &user_id).await?.view()))
}

async fn stream_view(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let handle = chat(&state, &user_id).await?;
    let view_rx = handle.subscribe();
    Ok(sse_stream(handle.view(), view_rx))
}

// ============================================================
// Chat Actions
// ============================================================

async fn send_message(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<TextRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    chat(&state, &user_id).await?.submit(req.text).await?;
    Ok(Json(ChatResponse { queued: true }))
}

async fn send_feedback(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<TextRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    chat(&state, &user_id).await?.feedback(req.text).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn new_chat(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ChatResponse>, AppError> {
    chat(&state, &user_id).await?.new_chat().await?;
    Ok(Json(ChatResponse { queued: true }))
}

// ============================================================
// History
// ============================================================

async fn list_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionListResponse>, AppError> {
    let view = chat(&state, &user_id).await?.view();
    Ok(Json(SessionListResponse {
        sessions: view.history.summaries().to_vec(),
        current_session_id: view.current_session_id,
    }))
}

async fn select_session(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<SuccessResponse>, AppError> {
    chat(&state, &user_id)
        .await?
        .select_session(session_id)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn dismiss_toast(
    State(state): State<AppState>,
    Path((user_id, toast_id)): Path<(String, u64)>,
) -> Result<Json<SuccessResponse>, AppError> {
    chat(&state, &user_id).await?.dismiss_toast(toast_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn get_version() -> &'static str {
    concat!("influence-engine ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::EmptyMessage => AppError::BadRequest(e.to_string()),
            ChatError::UserNotFound(_) => AppError::NotFound(e.to_string()),
            ChatError::TurnInFlight => AppError::Conflict(e.to_string()),
            ChatError::Storage(_) | ChatError::RuntimeStopped => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
