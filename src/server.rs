//! Web chat server.
//!
//! Serves the single-page chat UI and the JSON API it talks to. Each browser
//! tab creates its own session, so conversations never leak between users.
//! The index is fetched from the [`IndexCache`] on every question; when the
//! data directory changes it is rebuilt before answering.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/` | Chat UI |
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/api/sessions` | Create a session |
//! | `GET`    | `/api/sessions/{id}/messages` | Conversation so far |
//! | `POST`   | `/api/sessions/{id}/messages` | Ask a question |
//! | `DELETE` | `/api/sessions/{id}/messages` | Clear Conversation |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream_error` (502),
//! `internal` (500). A failed question leaves the conversation unchanged.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::IndexCache;
use crate::completion::CompletionService;
use crate::http::ServiceError;
use crate::index::SemanticRetriever;
use crate::progress::NoProgress;
use crate::query::{QueryEngine, SourceRef};
use crate::session::{HistoryFormat, SessionError, SessionLimits, SessionStore, SharedSession};

const INDEX_HTML: &str = include_str!("ui.html");

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    cache: Arc<IndexCache>,
    llm: Arc<dyn CompletionService>,
    top_k: usize,
    sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(
        cache: Arc<IndexCache>,
        llm: Arc<dyn CompletionService>,
        top_k: usize,
        limits: SessionLimits,
    ) -> Self {
        Self {
            cache,
            llm,
            top_k,
            sessions: Arc::new(SessionStore::new(HistoryFormat::HumanAssistant, limits)),
        }
    }

    /// A query engine over the current index, rebuilding it if stale.
    async fn engine(&self) -> Result<QueryEngine, AppError> {
        let (index, _) = self
            .cache
            .get_or_build(&NoProgress)
            .await
            .map_err(classify_index_error)?;
        let retriever = SemanticRetriever::new(index, self.cache.embedder());
        Ok(QueryEngine::new(
            Arc::new(retriever),
            self.llm.clone(),
            self.top_k,
        ))
    }

    async fn session(&self, id: &str) -> Result<SharedSession, AppError> {
        let not_found_msg = || format!("no session with id: {}", id);
        let uuid = Uuid::parse_str(id).map_err(|_| not_found(not_found_msg()))?;
        self.sessions
            .get(&uuid)
            .await
            .ok_or_else(|| not_found(not_found_msg()))
    }
}

/// The application router. Used by [`run_server`] and by tests that bind
/// their own listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/sessions", post(handle_create_session))
        .route(
            "/api/sessions/{id}/messages",
            get(handle_list_messages)
                .post(handle_ask)
                .delete(handle_clear),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `bind_addr` and serve until the process is terminated.
pub async fn run_server(bind_addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "chat server listening");
    println!("Chat with your docs: http://{}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn upstream_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Index builds fail either on the embedding service or locally (missing
/// data directory, unreadable file).
fn classify_index_error(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "index unavailable");
    let from_service = err.chain().any(|e| e.downcast_ref::<ServiceError>().is_some());
    if from_service {
        upstream_error(format!("{:#}", err))
    } else {
        internal(format!("{:#}", err))
    }
}

fn classify_ask_error(err: anyhow::Error) -> AppError {
    if let Some(e) = err.downcast_ref::<SessionError>() {
        return bad_request(e.to_string());
    }
    error!(error = %format!("{:#}", err), "question failed");
    upstream_error(format!("{:#}", err))
}

// ============ GET / and /health ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionCreated {
    id: Uuid,
}

async fn handle_create_session(State(state): State<AppState>) -> Json<SessionCreated> {
    Json(SessionCreated {
        id: state.sessions.create().await,
    })
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    let session = state.session(&id).await?;
    let session = session.lock().await;
    let messages = session
        .turns()
        .iter()
        .flat_map(|t| {
            [
                Message {
                    role: "user",
                    content: t.question.clone(),
                },
                Message {
                    role: "assistant",
                    content: t.answer.clone(),
                },
            ]
        })
        .collect();
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<SourceRef>,
    turns: usize,
}

async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let session = state.session(&id).await?;
    if req.question.trim().is_empty() {
        return Err(bad_request(SessionError::EmptyQuestion.to_string()));
    }

    let engine = state.engine().await?;
    let mut session = session.lock().await;
    let (turn, response) = session
        .ask(&engine, &req.question)
        .await
        .map_err(classify_ask_error)?;

    Ok(Json(AskResponse {
        answer: turn.answer,
        sources: response.sources,
        turns: session.len(),
    }))
}

#[derive(Serialize)]
struct Cleared {
    turns: usize,
}

async fn handle_clear(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Cleared>, AppError> {
    let session = state.session(&id).await?;
    let mut session = session.lock().await;
    session.reset();
    Ok(Json(Cleared {
        turns: session.len(),
    }))
}
