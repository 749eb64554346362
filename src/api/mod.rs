//! HTTP surface: Axum server for the scheduler triggers, admin recovery
//! and read-only ranking/prize queries.

pub mod auth;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::CronAuth;
pub use routes::{ApiState, AppState};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        // Scheduler triggers
        .route("/api/cron/competition-start", post(routes::cron_start))
        .route("/api/cron/competition-end", post(routes::cron_end))
        // Administrative recovery
        .route("/api/admin/rounds/:id/open-draft", post(routes::admin_open_draft))
        .route("/api/admin/rounds/:id/start", post(routes::admin_start_round))
        .route("/api/admin/rounds/:id/end", post(routes::admin_end_round))
        .route("/api/admin/rounds/:id/distribute", post(routes::admin_distribute))
        .route("/api/admin/entries/:id/confirm", post(routes::admin_confirm_entry))
        .route("/api/rounds/:id/rosters", post(routes::submit_roster))
        // Read-only
        .route("/api/rounds/:id/ranking", get(routes::get_ranking))
        .route("/api/rounds/:id/prizes", get(routes::get_prizes))
        .route("/api/rounds/:id/prize-record", get(routes::get_prize_record))
        .route("/api/draft-window", get(routes::get_draft_window))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, bind: &str, port: u16) -> Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
