//! Job API routes, including transfer starts
//!
//! Upload and download respond with a server-sent event stream carrying
//! one progress line per event. The session id is in the
//! `x-transfer-session` header so the caller can cancel or poll it.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        AppendHeaders, IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream};

use super::{found, Deleted, IdList};
use crate::error::Result;
use crate::licensing::Job;
use crate::state::AppState;
use crate::transfer::{DownloadRequest, TransferHandle, UploadRequest};

pub const SESSION_HEADER: &str = "x-transfer-session";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(update_job))
        .route("/by-name/:name", get(read_jobs_by_name))
        .route("/:id", get(read_job).delete(delete_job))
        .route("/:id/users", post(connect_users).put(replace_users))
        .route("/:id/users/:user_id", delete(disconnect_user))
        .route("/:id/vartrees", get(real_vartree_names))
        .route("/:id/validate", get(validate_job))
        .route("/:id/upload", post(start_upload))
        .route("/:id/download", post(start_download))
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<Job>>> {
    Ok(Json(state.licensing().list_jobs().await?))
}

async fn read_jobs_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Job>>> {
    Ok(Json(state.licensing().read_jobs_by_name(&name).await?))
}

async fn read_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Job>> {
    found(state.licensing().read_job(&id).await?, "Job", &id)
}

async fn update_job(State(state): State<AppState>, Json(job): Json<Job>) -> Result<Json<Job>> {
    Ok(Json(state.licensing().update_job(&job).await?))
}

/// Delete a job; users left holding every remaining job of the customer
/// get the blanket grant instead
async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Deleted>> {
    let deleted = state.licensing().delete_job(&id).await?;
    Ok(Json(Deleted { deleted }))
}

async fn connect_users(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Job>> {
    found(state.licensing().connect_job_users(&id, &body.ids).await?, "Job", &id)
}

async fn replace_users(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Job>> {
    found(state.licensing().replace_job_users(&id, &body.ids).await?, "Job", &id)
}

async fn disconnect_user(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<Job>> {
    found(state.licensing().disconnect_job_user(&id, &user_id).await?, "Job", &id)
}

// ============================================================================
// Storage
// ============================================================================

/// Vartree names in the root of the job container
async fn real_vartree_names(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Option<Vec<String>>>> {
    Ok(Json(state.inspector().real_vartree_names(&id).await?))
}

async fn validate_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.inspector().validate_job(&id).await?))
}

async fn start_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<Response> {
    let handle = state.transfers().start_upload(&id, request).await?;
    Ok(progress_response(handle))
}

async fn start_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DownloadRequest>,
) -> Result<Response> {
    let handle = state.transfers().start_download(&id, request).await?;
    Ok(progress_response(handle))
}

fn progress_response(handle: TransferHandle) -> Response {
    let session_id = handle.session_id.to_string();
    (
        AppendHeaders([(SESSION_HEADER, session_id)]),
        Sse::new(progress_stream(handle)).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

fn progress_stream(handle: TransferHandle) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream::unfold(handle.events, |mut events| async move {
        let event = events.recv().await?;
        Some((
            Ok(Event::default().event(event.tag()).data(event.to_string())),
            events,
        ))
    })
}
