//! HTTP server for the chat mutation protocol
//!
//! A thin axum surface over [`ChatService`] and [`SessionService`]. Caller
//! identity arrives as the opaque `x-user-id` header, bound upstream by the
//! auth collaborator; this layer only refuses requests without one.

use crate::core::errors::ChatError;
use crate::core::types::{ChatSession, Message, MessageId, SendOutcome, SessionId};
use crate::protocol::{AuthContext, ChatService, SessionService};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Header carrying the opaque caller identity.
const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state
struct AppState {
    chat: Arc<ChatService>,
    sessions: Arc<SessionService>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    model_tag: String,
    prompt: String,
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct EditRequest {
    message_id: MessageId,
    new_content: String,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    message_id: MessageId,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    session_id: Option<SessionId>,
    model_tag: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    model_tag: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameSessionRequest {
    session_id: SessionId,
    title: String,
}

#[derive(Debug, Deserialize)]
struct DeleteSessionRequest {
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    model_tag: Option<String>,
    limit: Option<usize>,
}

/// Error envelope returned for every failed request
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

struct ApiError(ChatError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

fn auth(headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(AuthContext::new)
        .ok_or(ApiError(ChatError::Unauthenticated))
}

/// Build the protocol router over the given services.
pub fn router(chat: Arc<ChatService>, sessions: Arc<SessionService>) -> Router {
    let state = Arc::new(AppState { chat, sessions });

    Router::new()
        .route("/health", get(health_check))
        .route("/chat/send", post(handle_send))
        .route("/chat/history", get(handle_history))
        .route("/chat/edit", post(handle_edit))
        .route("/chat/delete", post(handle_delete))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/rename", post(rename_session))
        .route("/sessions/delete", post(delete_session))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_http_server(
    host: &str,
    port: u16,
    chat: Arc<ChatService>,
    sessions: Arc<SessionService>,
) -> Result<()> {
    let app = router(chat, sessions);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendOutcome>, ApiError> {
    let ctx = auth(&headers)?;
    let outcome = state
        .chat
        .send(&ctx, &req.model_tag, &req.prompt, &req.session_id)
        .await?;
    Ok(Json(outcome))
}

async fn handle_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let ctx = auth(&headers)?;
    let messages = state.chat.history(
        &ctx,
        query.session_id.as_ref(),
        query.model_tag.as_deref(),
        query.limit,
    )?;
    Ok(Json(messages))
}

async fn handle_edit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EditRequest>,
) -> Result<Json<SendOutcome>, ApiError> {
    let ctx = auth(&headers)?;
    let outcome = state
        .chat
        .edit_message(&ctx, &req.message_id, &req.new_content)
        .await?;
    Ok(Json(outcome))
}

async fn handle_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let ctx = auth(&headers)?;
    state.chat.delete_message(&ctx, &req.message_id)?;
    Ok(Json(DeleteResponse { success: true }))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<ChatSession>, ApiError> {
    let ctx = auth(&headers)?;
    let session = state
        .sessions
        .create_session(&ctx, &req.model_tag, req.title.as_deref())?;
    Ok(Json(session))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    let ctx = auth(&headers)?;
    let sessions = state.sessions.list_sessions(
        &ctx,
        query.model_tag.as_deref(),
        query.limit.unwrap_or(50),
    )?;
    Ok(Json(sessions))
}

async fn rename_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RenameSessionRequest>,
) -> Result<Json<ChatSession>, ApiError> {
    let ctx = auth(&headers)?;
    let session = state
        .sessions
        .rename_session(&ctx, &req.session_id, &req.title)?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DeleteSessionRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let ctx = auth(&headers)?;
    state.sessions.delete_session(&ctx, &req.session_id)?;
    Ok(Json(DeleteResponse { success: true }))
}
