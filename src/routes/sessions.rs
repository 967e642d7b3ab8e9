use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::session::SessionSummary, error::AppError, services::session_service, state::SharedState,
};

/// List every session the orchestrator currently drives.
pub async fn list_sessions(State(state): State<SharedState>) -> Json<Vec<SessionSummary>> {
    Json(session_service::list_sessions(&state))
}

/// Describe a single orchestrated session.
pub async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    let summary = session_service::get_session(&state, &id)?;
    Ok(Json(summary))
}

/// Configure the read-only session routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session))
}
