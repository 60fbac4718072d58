//! Core of the ACQUA water-delivery backend: customer accounts, bottle
//! orders, promotional coupons with atomic redemption, discount pricing,
//! and loyalty rewards, exposed as an axum API over sea-orm persistence.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

/// Page selection accepted by the list endpoints.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

/// Envelope wrapping every successful response body. Failures use
/// [`errors::ErrorResponse`] instead, so `message` and `errors` stay
/// empty here; clients that predate the split still expect the keys.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: middleware_helpers::request_id::current_request_id()
                .map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// List payload carried inside the envelope's `data`.
#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    /// Wraps a payload, stamping the request id scoped to the current
    /// task along with the response timestamp.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Routes mounted under `/api/v1`. Register and login are the only open
/// routes; everything else requires a bearer token, and admin-only routes
/// enforce the role inside their handlers.
pub fn api_v1_routes() -> Router<AppState> {
    let auth_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me));

    let coupon_routes = Router::new()
        .route(
            "/coupons",
            post(handlers::coupons::create_coupon).get(handlers::coupons::list_coupons),
        )
        .route(
            "/coupons/validate",
            post(handlers::coupons::validate_coupon),
        )
        .route("/coupons/my-coupons", get(handlers::coupons::my_coupons))
        .route("/coupons/:code", delete(handlers::coupons::delete_coupon))
        .route(
            "/coupons/:code/status",
            put(handlers::coupons::set_coupon_status),
        );

    let order_routes = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).delete(handlers::orders::delete_order),
        )
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        );

    Router::new()
        .merge(auth_routes)
        .merge(coupon_routes)
        .merge(order_routes)
        .route("/customers", get(handlers::customers::list_customers))
        .route("/stats", get(handlers::stats::get_stats))
}

/// Service banner served at `/`.
pub async fn api_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "service": "acqua-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

/// Health endpoint served at `/health`: pings the database and reports
/// per-dependency status in the body.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": {
            "database": db_status,
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(health_data)))
}

#[cfg(test)]
mod envelope_tests {
    use super::*;
    use crate::middleware_helpers::request_id::{scope_request_id, RequestId};
    use chrono::DateTime;

    #[tokio::test]
    async fn success_envelope_stamps_request_metadata() {
        let envelope = scope_request_id(RequestId::new("req-envelope-1"), async {
            ApiResponse::success(7_u32)
        })
        .await;

        assert!(envelope.success);
        assert_eq!(envelope.data, Some(7));
        let meta = envelope.meta.expect("meta present");
        assert_eq!(meta.request_id.as_deref(), Some("req-envelope-1"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("rfc3339 timestamp");
    }

    #[tokio::test]
    async fn envelope_without_a_scoped_id_still_carries_a_timestamp() {
        let envelope = ApiResponse::success("ok");

        let meta = envelope.meta.expect("meta present");
        assert!(meta.request_id.is_none());
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("rfc3339 timestamp");
    }

    #[test]
    fn list_query_defaults_to_the_first_page() {
        let query: ListQuery = serde_json::from_str("{}").expect("defaults apply");
        assert_eq!((query.page, query.limit), (1, 20));
    }

    #[test]
    fn paginated_payload_serializes_its_counters() {
        let page = PaginatedResponse {
            items: vec!["a", "b"],
            total: 5,
            page: 1,
            limit: 2,
            total_pages: 3,
        };

        let value = serde_json::to_value(page).expect("serializes");
        assert_eq!(value["total_pages"], 3);
        assert_eq!(value["items"].as_array().map(Vec::len), Some(2));
    }
}
