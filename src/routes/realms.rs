//! Realm API routes

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};

use super::{found, Deleted, IdList};
use crate::error::Result;
use crate::licensing::Realm;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_realms).post(update_realm))
        .route("/by-name/:name", get(read_realms_by_name))
        .route("/:id", get(read_realm).delete(delete_realm))
        .route("/:id/users", post(connect_users).put(replace_users))
        .route("/:id/users/:user_id", delete(disconnect_user))
        .route("/:id/customers", post(connect_customers).put(replace_customers))
        .route("/:id/customers/:customer_id", delete(disconnect_customer))
}

async fn list_realms(State(state): State<AppState>) -> Result<Json<Vec<Realm>>> {
    Ok(Json(state.licensing().list_realms().await?))
}

async fn read_realms_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Realm>>> {
    Ok(Json(state.licensing().read_realms_by_name(&name).await?))
}

async fn read_realm(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Realm>> {
    found(state.licensing().read_realm(&id).await?, "Realm", &id)
}

async fn update_realm(State(state): State<AppState>, Json(realm): Json<Realm>) -> Result<Json<Realm>> {
    Ok(Json(state.licensing().update_realm(&realm).await?))
}

async fn delete_realm(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Deleted>> {
    let deleted = state.licensing().delete_realm(&id).await?;
    Ok(Json(Deleted { deleted }))
}

async fn connect_users(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Realm>> {
    found(state.licensing().connect_realm_users(&id, &body.ids).await?, "Realm", &id)
}

async fn replace_users(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Realm>> {
    found(state.licensing().replace_realm_users(&id, &body.ids).await?, "Realm", &id)
}

async fn disconnect_user(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<Realm>> {
    found(state.licensing().disconnect_realm_user(&id, &user_id).await?, "Realm", &id)
}

async fn connect_customers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Realm>> {
    found(
        state.licensing().connect_realm_customers(&id, &body.ids).await?,
        "Realm",
        &id,
    )
}

async fn replace_customers(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Realm>> {
    found(
        state.licensing().replace_realm_customers(&id, &body.ids).await?,
        "Realm",
        &id,
    )
}

async fn disconnect_customer(
    State(state): State<AppState>,
    Path((id, customer_id)): Path<(String, String)>,
) -> Result<Json<Realm>> {
    found(
        state.licensing().disconnect_realm_customer(&id, &customer_id).await?,
        "Realm",
        &id,
    )
}
