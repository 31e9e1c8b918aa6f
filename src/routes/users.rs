//! User API routes

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};

use super::{found, Deleted, IdList, RealmFilter};
use crate::error::Result;
use crate::licensing::User;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(update_user))
        .route("/by-name/:name", get(read_users_by_name))
        .route("/:id", get(read_user).delete(delete_user))
        .route("/:id/jobs", post(connect_jobs).put(replace_jobs))
        .route("/:id/jobs/:job_id", delete(disconnect_job))
        .route("/:id/customers", post(connect_customers).put(replace_customers))
        .route("/:id/customers/:customer_id", delete(disconnect_customer))
        .route("/:id/realms", post(connect_realms).put(replace_realms))
        .route("/:id/realms/:realm_id", delete(disconnect_realm))
}

/// List users, optionally only those in the given realms
async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<RealmFilter>,
) -> Result<Json<Vec<User>>> {
    let users = state.licensing().list_users(&filter.realm_ids()).await?;
    Ok(Json(users))
}

async fn read_users_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<User>>> {
    Ok(Json(state.licensing().read_users_by_name(&name).await?))
}

async fn read_user(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<User>> {
    found(state.licensing().read_user(&id).await?, "User", &id)
}

/// Insert (no id) or update a user's own fields
async fn update_user(State(state): State<AppState>, Json(user): Json<User>) -> Result<Json<User>> {
    Ok(Json(state.licensing().update_user(&user).await?))
}

async fn delete_user(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Deleted>> {
    let deleted = state.licensing().delete_user(&id).await?;
    Ok(Json(Deleted { deleted }))
}

// ============================================================================
// Job grants
// ============================================================================

async fn connect_jobs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<User>> {
    found(state.licensing().connect_user_jobs(&id, &body.ids).await?, "User", &id)
}

async fn replace_jobs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<User>> {
    found(state.licensing().replace_user_jobs(&id, &body.ids).await?, "User", &id)
}

async fn disconnect_job(
    State(state): State<AppState>,
    Path((id, job_id)): Path<(String, String)>,
) -> Result<Json<User>> {
    found(state.licensing().disconnect_user_job(&id, &job_id).await?, "User", &id)
}

// ============================================================================
// Customer grants
// ============================================================================

async fn connect_customers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<User>> {
    found(state.licensing().connect_user_customers(&id, &body.ids).await?, "User", &id)
}

async fn replace_customers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<User>> {
    found(state.licensing().replace_user_customers(&id, &body.ids).await?, "User", &id)
}

async fn disconnect_customer(
    State(state): State<AppState>,
    Path((id, customer_id)): Path<(String, String)>,
) -> Result<Json<User>> {
    found(
        state.licensing().disconnect_user_customer(&id, &customer_id).await?,
        "User",
        &id,
    )
}

// ============================================================================
// Realm membership
// ============================================================================

async fn connect_realms(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<User>> {
    found(state.licensing().connect_user_realms(&id, &body.ids).await?, "User", &id)
}

async fn replace_realms(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<User>> {
    found(state.licensing().replace_user_realms(&id, &body.ids).await?, "User", &id)
}

async fn disconnect_realm(
    State(state): State<AppState>,
    Path((id, realm_id)): Path<(String, String)>,
) -> Result<Json<User>> {
    found(state.licensing().disconnect_user_realm(&id, &realm_id).await?, "User", &id)
}
