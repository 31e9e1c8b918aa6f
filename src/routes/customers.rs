//! Customer API routes

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use super::{found, Deleted, IdList, RealmFilter};
use crate::error::Result;
use crate::licensing::Customer;
use crate::state::AppState;
use crate::storage::ObjectMetadata;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_customers).post(update_customer))
        .route("/by-name/:name", get(read_customers_by_name))
        .route(
            "/by-name/:name/jobs/:job_name/objects",
            get(list_job_objects),
        )
        .route("/:id", get(read_customer).delete(delete_customer))
        .route("/:id/validate", get(validate_customer))
        .route("/:id/users", post(connect_users).put(replace_users))
        .route("/:id/users/:user_id", delete(disconnect_user))
        .route("/:id/realms", post(connect_realms).put(replace_realms))
        .route("/:id/realms/:realm_id", delete(disconnect_realm))
}

#[derive(Debug, Default, Deserialize)]
struct DeleteOptions {
    /// Delete the customer's jobs instead of detaching them
    #[serde(default)]
    remove_jobs: bool,
}

async fn list_customers(
    State(state): State<AppState>,
    Query(filter): Query<RealmFilter>,
) -> Result<Json<Vec<Customer>>> {
    let customers = state.licensing().list_customers(&filter.realm_ids()).await?;
    Ok(Json(customers))
}

async fn read_customers_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Customer>>> {
    Ok(Json(state.licensing().read_customers_by_name(&name).await?))
}

async fn read_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Customer>> {
    found(state.licensing().read_customer(&id).await?, "Customer", &id)
}

async fn update_customer(
    State(state): State<AppState>,
    Json(customer): Json<Customer>,
) -> Result<Json<Customer>> {
    Ok(Json(state.licensing().update_customer(&customer).await?))
}

async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(options): Query<DeleteOptions>,
) -> Result<Json<Deleted>> {
    let deleted = state
        .licensing()
        .delete_customer(&id, options.remove_jobs)
        .await?;
    Ok(Json(Deleted { deleted }))
}

/// Problems with the customer record or its storage namespace
async fn validate_customer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.inspector().validate_customer(&id).await?))
}

async fn list_job_objects(
    State(state): State<AppState>,
    Path((name, job_name)): Path<(String, String)>,
) -> Result<Json<Vec<ObjectMetadata>>> {
    Ok(Json(state.inspector().list_job_objects(&name, &job_name).await?))
}

// ============================================================================
// User grants
// ============================================================================

async fn connect_users(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Customer>> {
    found(
        state.licensing().connect_customer_users(&id, &body.ids).await?,
        "Customer",
        &id,
    )
}

async fn replace_users(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Customer>> {
    found(
        state.licensing().replace_customer_users(&id, &body.ids).await?,
        "Customer",
        &id,
    )
}

async fn disconnect_user(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<Customer>> {
    found(
        state.licensing().disconnect_customer_user(&id, &user_id).await?,
        "Customer",
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
) -> Result<Json<Customer>> {
    found(
        state.licensing().connect_customer_realms(&id, &body.ids).await?,
        "Customer",
        &id,
    )
}

async fn replace_realms(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<IdList>,
) -> Result<Json<Customer>> {
    found(
        state.licensing().replace_customer_realms(&id, &body.ids).await?,
        "Customer",
        &id,
    )
}

async fn disconnect_realm(
    State(state): State<AppState>,
    Path((id, realm_id)): Path<(String, String)>,
) -> Result<Json<Customer>> {
    found(
        state.licensing().disconnect_customer_realm(&id, &realm_id).await?,
        "Customer",
        &id,
    )
}
