//! Transfer session routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::SessionStatus;

/// Finished sessions are kept this long unless the caller says otherwise.
const DEFAULT_RETENTION_SECS: i64 = 3600;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/purge", post(purge_finished))
        .route("/:session_id", get(session_status).delete(cancel_session))
}

#[derive(Debug, Deserialize)]
struct PurgeQuery {
    older_than_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
struct Purged {
    purged: usize,
}

async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionStatus>> {
    state
        .transfers()
        .session_status(session_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Transfer session {} does not exist", session_id)))
}

/// Request cancellation of a running session
async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.transfers().cancel(session_id).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(AppError::NotFound(format!(
            "No running transfer session {}",
            session_id
        )))
    }
}

async fn purge_finished(
    State(state): State<AppState>,
    Query(query): Query<PurgeQuery>,
) -> Json<Purged> {
    let age = chrono::Duration::seconds(query.older_than_secs.unwrap_or(DEFAULT_RETENTION_SECS));
    let purged = state.transfers().purge_finished_older_than(age).await;
    Json(Purged { purged })
}
