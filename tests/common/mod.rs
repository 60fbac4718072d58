use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use acqua_api::{
    auth::AuthService,
    config::AppConfig,
    db,
    entities::coupon,
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};

pub const ADMIN_EMAIL: &str = "admin@acqua.local";
pub const ADMIN_PASSWORD: &str = "acqua-test-admin";

/// Test harness running the full router against a throwaway SQLite file.
/// The database lives in a temp directory dropped with the harness.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with a fresh database and a
    /// seeded admin account.
    pub async fn new() -> Self {
        let db_dir = TempDir::new().expect("create temp dir for sqlite");
        let db_path = db_dir.path().join("acqua_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "test_secret_key_for_acqua_api_tests_needs_sixty_four_characters!!".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(cfg.jwt_secret.clone(), cfg.jwt_expiration));
        let services = AppServices::new(db_arc.clone(), auth_service, Some(event_sender));

        services
            .customers
            .ensure_admin(ADMIN_EMAIL, ADMIN_PASSWORD, "Test Admin")
            .await
            .expect("seed admin account");

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
        };

        let router = Router::new()
            .route("/", get(acqua_api::api_status))
            .route("/health", get(acqua_api::health_check))
            .nest("/api/v1", acqua_api::api_v1_routes())
            .layer(axum::middleware::from_fn(
                acqua_api::middleware_helpers::request_id::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Register a customer account, returning its bearer token and id.
    pub async fn register_customer(&self, email: &str) -> (String, Uuid) {
        let payload = json!({
            "email": email,
            "password": "agua-pura-123",
            "name": "Cliente Test",
        });

        let response = self
            .request(Method::POST, "/api/v1/auth/register", Some(payload), None)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED, "registration failed");

        let body = read_json(response).await;
        let token = body["data"]["token"].as_str().expect("token").to_string();
        let user_id = body["data"]["user"]["id"]
            .as_str()
            .expect("user id")
            .parse()
            .expect("user id is a uuid");
        (token, user_id)
    }

    /// Log in as the seeded admin account.
    pub async fn admin_token(&self) -> String {
        let payload = json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD });

        let response = self
            .request(Method::POST, "/api/v1/auth/login", Some(payload), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK, "admin login failed");

        let body = read_json(response).await;
        body["data"]["token"].as_str().expect("token").to_string()
    }

    /// Insert a coupon row directly, bypassing service validation, for
    /// shaping edge states like already-expired codes.
    #[allow(dead_code)]
    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_percentage: i32,
        expiry_date: DateTime<Utc>,
        max_uses: Option<i32>,
        owner_customer_id: Option<Uuid>,
    ) -> coupon::Model {
        coupon::ActiveModel {
            code: Set(code.to_string()),
            discount_percentage: Set(discount_percentage),
            expiry_date: Set(expiry_date),
            max_uses: Set(max_uses),
            current_uses: Set(0),
            is_active: Set(true),
            owner_customer_id: Set(owner_customer_id),
            milestone: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(self.state.db.as_ref())
        .await
        .expect("seed coupon")
    }

    /// Read `current_uses` for a coupon straight from the database.
    #[allow(dead_code)]
    pub async fn coupon_uses(&self, code: &str) -> i32 {
        coupon::Entity::find_by_id(code.to_string())
            .one(self.state.db.as_ref())
            .await
            .expect("query coupon")
            .expect("coupon exists")
            .current_uses
    }
}

/// Parse a response body as JSON.
pub async fn read_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("parse response body as json")
}
