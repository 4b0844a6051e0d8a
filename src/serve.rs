//! HTTP surface.
//!
//! Exposes the four progression operations to players, plus phase control
//! and a raw progress export for organizers. The requester is identified by
//! the `x-quest-user` header; authenticating that header is left to a proxy
//! in front of this server.
//!
//! Engine calls hold a per-team mutex for a few microseconds but may hit the
//! disk before and after, so they run on the blocking pool.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ConfigError, PhaseError, ProgressionError};
use crate::quest::engine::{SkipOutcome, TeamState};
use crate::quest::gate::CompetitionPhase;
use crate::quest::service::{PhaseController, ProgressExport, QuestService};

/// Header carrying the requesting user's id.
pub const USER_HEADER: &str = "x-quest-user";

/// Request bodies are tiny; anything bigger is refused before parsing.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Shared state of all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Progression operations
    pub service: Arc<QuestService>,
    /// Phase setter
    pub control: Arc<PhaseController>,
}

/// Body of `POST /quest/answer`.
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    /// Submitted answer
    pub answer: String,
}

/// Response of `POST /quest/answer`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
    /// Whether the answer solved the current task
    pub correct: bool,
}

/// Body of `PUT /admin/phase`.
#[derive(Debug, Deserialize)]
pub struct PhaseRequest {
    /// Target phase name, e.g. `pilot`
    pub phase: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Failure of one request.
#[derive(Debug)]
pub enum ApiError {
    /// No `x-quest-user` header, or not valid UTF-8
    MissingUser,
    /// Progression refused or failed
    Progression(ProgressionError),
    /// Phase change refused
    Phase(PhaseError),
    /// The blocking task panicked or was cancelled
    Internal(String),
}

impl From<ProgressionError> for ApiError {
    fn from(err: ProgressionError) -> Self {
        Self::Progression(err)
    }
}

impl From<PhaseError> for ApiError {
    fn from(err: PhaseError) -> Self {
        Self::Phase(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingUser
            | Self::Progression(ProgressionError::MalformedAnswer(_))
            | Self::Phase(PhaseError::Unknown(_)) => StatusCode::BAD_REQUEST,
            Self::Progression(
                ProgressionError::UnknownRequester(_) | ProgressionError::NotLeader { .. },
            ) => StatusCode::FORBIDDEN,
            Self::Phase(PhaseError::Regression { .. }) => StatusCode::CONFLICT,
            Self::Progression(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            Self::MissingUser => "missing_user",
            Self::Progression(e) => e.category(),
            Self::Phase(PhaseError::Regression { .. }) => "phase_regression",
            Self::Phase(PhaseError::Unknown(_)) => "unknown_phase",
            Self::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingUser => write!(f, "missing {USER_HEADER} header"),
            Self::Progression(e) => write!(f, "{e}"),
            Self::Phase(e) => write!(f, "{e}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.category(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Builds the router for every quest and admin route.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/quest/task", get(handle_current_task))
        .route("/quest/start", post(handle_start))
        .route("/quest/answer", post(handle_answer))
        .route("/quest/skip", post(handle_skip))
        .route("/admin/phase", get(handle_get_phase).put(handle_set_phase))
        .route("/admin/progress", get(handle_progress))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serves `state` on `listener` until `cancel` fires.
///
/// # Errors
///
/// Returns an I/O error if the server fails while accepting connections.
pub async fn run(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "quest server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;
    debug!("quest server shut down");
    Ok(())
}

/// Parses a bind address.
///
/// Accepts `:8080` and `8080` as shorthand for `0.0.0.0:8080`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] if the result is not a socket
/// address.
pub fn parse_bind_addr(input: &str) -> Result<SocketAddr, ConfigError> {
    let addr = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else if input.parse::<u16>().is_ok() {
        format!("0.0.0.0:{input}")
    } else {
        input.to_string()
    };
    addr.parse().map_err(|_| ConfigError::InvalidValue {
        field: "bind".to_string(),
        value: input.to_string(),
        expected: "host:port, :port or port".to_string(),
    })
}

// ============================================================================
// Handlers
// ============================================================================

fn requester(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .ok_or(ApiError::MissingUser)
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProgressionError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

async fn handle_current_task(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TeamState>, ApiError> {
    let user = requester(&headers)?;
    let service = Arc::clone(&state.service);
    blocking(move || service.get_current_task(&user)).await.map(Json)
}

async fn handle_start(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TeamState>, ApiError> {
    let user = requester(&headers)?;
    let service = Arc::clone(&state.service);
    blocking(move || service.start_next_task(&user)).await.map(Json)
}

async fn handle_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let user = requester(&headers)?;
    let service = Arc::clone(&state.service);
    let correct = blocking(move || service.try_answer(&user, &body.answer)).await?;
    Ok(Json(AnswerResponse { correct }))
}

async fn handle_skip(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SkipOutcome>, ApiError> {
    let user = requester(&headers)?;
    let service = Arc::clone(&state.service);
    blocking(move || service.skip_task(&user)).await.map(Json)
}

async fn handle_get_phase(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "phase": state.control.current() }))
}

async fn handle_set_phase(
    State(state): State<AppState>,
    Json(body): Json<PhaseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target: CompetitionPhase = body.phase.parse()?;
    let previous = state.control.set_phase(target)?;
    Ok(Json(json!({ "previous": previous, "phase": target })))
}

async fn handle_progress(State(state): State<AppState>) -> Json<ProgressExport> {
    Json(state.service.export())
}
