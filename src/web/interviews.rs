use crate::error::AppError;
use crate::interview::engine::{SessionListItem, SessionStart, StartSessionRequest, SubmitAnswerRequest, SubmitOutcome};
use crate::interview::report::SessionReport;
use crate::state::SharedState;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/start", post(start_session))
        .route("/:id", get(session_report))
        .route("/:id/answer", post(submit_answer))
        .with_state(state)
}

async fn start_session(
    UserSession { user_id, .. }: UserSession,
    State(state): State<SharedState>,
    Json(payload): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionStart>), AppError> {
    let started = state.engine.start_session(user_id, payload).await?;
    tracing::info!("User {} started {} session {}", user_id, started.session.mode.as_str(), started.session.id);
    Ok((StatusCode::CREATED, Json(started)))
}

async fn submit_answer(
    UserSession { user_id, .. }: UserSession,
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<SubmitOutcome>, AppError> {
    if !state.answer_limiter.check(&user_id.to_string()).await {
        tracing::warn!("Answer rate limit exceeded for user {}", user_id);
        return Err(AppError::RateLimited);
    }
    let outcome = state.engine.submit_answer(user_id, session_id, payload).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct SessionList {
    sessions: Vec<SessionListItem>,
}

async fn list_sessions(
    UserSession { user_id, .. }: UserSession,
    State(state): State<SharedState>,
) -> Result<Json<SessionList>, AppError> {
    let sessions = state.engine.list_sessions(user_id).await?;
    Ok(Json(SessionList { sessions }))
}

async fn session_report(
    UserSession { user_id, .. }: UserSession,
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionReport>, AppError> {
    let report = state.engine.session_report(user_id, session_id).await?;
    Ok(Json(report))
}
