use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use axum::http::HeaderValue;
use axum::{routing::get, Router};
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use acqua_api::{
    api_status, api_v1_routes, auth, config, db, events, handlers, health_check,
    middleware_helpers, openapi, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("opening the database pool")?;
    if cfg.auto_migrate {
        db::run_migrations(&pool)
            .await
            .context("applying migrations")?;
    }
    let pool = Arc::new(pool);

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    tokio::spawn(events::process_events(event_rx));
    let event_sender = Arc::new(events::EventSender::new(event_tx));

    let auth_service = Arc::new(auth::AuthService::new(
        cfg.jwt_secret.clone(),
        cfg.jwt_expiration,
    ));
    let services = handlers::AppServices::new(pool.clone(), auth_service, Some(event_sender));

    // The platform needs one admin before any coupon or order can be
    // managed; seed it here rather than by hand-editing the database.
    if let Some((email, password, name)) = cfg.admin_bootstrap() {
        services
            .customers
            .ensure_admin(&email, &password, &name)
            .await
            .context("seeding the bootstrap admin account")?;
    }

    let cors = build_cors_layer(&cfg)?;

    let state = AppState {
        db: pool,
        config: cfg.clone(),
        services,
    };

    // The request-id layer sits outermost so every other layer and the
    // handlers observe the id.
    let app = Router::<AppState>::new()
        .route("/", get(api_status))
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("🚀 acqua-api listening on http://{addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Explicit origins win; otherwise development (or an explicit opt-in)
/// gets permissive CORS, and anything else refuses to boot. A malformed
/// origin is a startup error, not a silently dropped entry.
fn build_cors_layer(cfg: &config::AppConfig) -> anyhow::Result<CorsLayer> {
    let mut origins: Vec<HeaderValue> = Vec::new();
    if let Some(raw) = cfg.cors_allowed_origins.as_deref() {
        for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            origins.push(
                HeaderValue::from_str(origin)
                    .with_context(|| format!("invalid CORS origin {origin:?}"))?,
            );
        }
    }

    if !origins.is_empty() {
        return Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(cfg.cors_allow_credentials));
    }

    if cfg.should_allow_permissive_cors() {
        info!("CORS is permissive; no explicit origins configured");
        return Ok(CorsLayer::permissive());
    }

    bail!("no CORS origins configured: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true");
}

/// Resolves when the process receives ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(?err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(?err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
