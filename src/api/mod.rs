//! HTTP API: Axum server over the round scheduler.
//!
//! JSON in, JSON out. CORS is open for local front-ends.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Bind the API port and serve in a background task.
///
/// Binding happens before returning so a taken port fails startup
/// instead of a detached task.
pub async fn spawn_api(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/round", get(routes::get_round))
        .route("/api/rounds", get(routes::get_rounds))
        .route("/api/wagers", post(routes::place_wager))
        .route("/api/balance/:participant", get(routes::get_balance))
        .route("/api/participants/:participant/wagers", get(routes::get_wagers))
        .route("/api/participants/:participant/entries", get(routes::get_entries))
        .route("/api/settlement/alerts", get(routes::get_alerts))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
