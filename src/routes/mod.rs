//! Route modules for the licensing server

pub mod customers;
pub mod health;
pub mod jobs;
pub mod realms;
pub mod transfers;
pub mod users;

use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest("/api/v1/users", users::router())
        .nest("/api/v1/customers", customers::router())
        .nest("/api/v1/jobs", jobs::router())
        .nest("/api/v1/realms", realms::router())
        .nest("/api/v1/transfers", transfers::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Body of connect and replace requests
#[derive(Debug, Deserialize)]
pub struct IdList {
    pub ids: Vec<String>,
}

/// `?realm=a,b` filter for user and customer listings
#[derive(Debug, Default, Deserialize)]
pub struct RealmFilter {
    pub realm: Option<String>,
}

impl RealmFilter {
    pub fn realm_ids(&self) -> Vec<String> {
        self.realm
            .as_deref()
            .map(|r| {
                r.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: u64,
}

/// 404 when an entity or the initiator of an edge change is missing.
pub(crate) fn found<T>(entity: Option<T>, kind: &str, id: &str) -> Result<Json<T>> {
    entity
        .map(Json)
        .ok_or_else(|| AppError::IdentityNotFound(format!("{} Id {} does not exist", kind, id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::create_memory_pool;
    use crate::licensing::LicensingProvider;
    use crate::storage::DefaultConnector;
    use crate::transfer::{MimeTable, MimeTableCache};

    async fn test_app() -> Router {
        let licensing = LicensingProvider::new(create_memory_pool().await.unwrap());
        let state = AppState::new(
            Config::default(),
            licensing,
            Arc::new(DefaultConnector::new("us-east-1")),
            MimeTableCache::preloaded(MimeTable::default()),
        );
        app(state)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    fn json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_realm_filter() {
        let filter = RealmFilter {
            realm: Some("70000001, 70000002,,".into()),
        };
        assert_eq!(filter.realm_ids(), vec!["70000001", "70000002"]);
        assert!(RealmFilter::default().realm_ids().is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_entitlement_flow_over_http() {
        let app = test_app().await;

        let (status, customer) = send(
            &app,
            json(
                "POST",
                "/api/v1/customers",
                serde_json::json!({"name": "acme", "storageKey": "memory:"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let customer_id = customer["id"].as_str().unwrap().to_string();

        let (_, job) = send(
            &app,
            json(
                "POST",
                "/api/v1/jobs",
                serde_json::json!({"name": "demo", "customerId": customer_id}),
            ),
        )
        .await;
        let job_id = job["id"].as_str().unwrap().to_string();

        let (_, user) = send(
            &app,
            json("POST", "/api/v1/users", serde_json::json!({"name": "ann"})),
        )
        .await;
        let user_id = user["id"].as_str().unwrap().to_string();

        // the only job of the customer collapses to a blanket grant
        let (status, user) = send(
            &app,
            json(
                "POST",
                &format!("/api/v1/users/{}/jobs", user_id),
                serde_json::json!({"ids": [job_id]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["customerIds"], serde_json::json!([customer_id]));
        assert_eq!(user["jobIds"], serde_json::json!([]));

        let (status, body) = send(
            &app,
            json(
                "POST",
                "/api/v1/users/19999999/jobs",
                serde_json::json!({"ids": [job_id]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "IdentityNotFound");

        let (status, body) = send(&app, get("/api/v1/users/not-a-number")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "IdentityBadFormat");
    }

    #[tokio::test]
    async fn test_transfer_status_unknown() {
        let app = test_app().await;
        let (status, _) = send(
            &app,
            get("/api/v1/transfers/00000000-0000-0000-0000-000000000000"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
