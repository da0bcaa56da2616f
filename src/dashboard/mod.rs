//! Dashboard: Axum web server for real-time monitoring and operator control.
//!
//! Serves a REST API and a self-contained HTML dashboard.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::engine::Engine;
use routes::{AppState, DashboardState};

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Start the dashboard web server and its event listener.
///
/// Spawns background tasks and returns immediately.
pub fn spawn_dashboard(engine: Arc<Engine>, port: u16) -> AppState {
    let state = Arc::new(DashboardState::new(Arc::clone(&engine)));
    tokio::spawn(routes::record_events(Arc::clone(&state), engine.subscribe()));

    let app = build_router(Arc::clone(&state));
    tokio::spawn(async move {
        if let Err(e) = serve(app, port).await {
            error!(port, error = %e, "Dashboard server stopped");
        }
    });
    state
}

async fn serve(app: Router, port: u16) -> Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");
    axum::serve(listener, app)
        .await
        .context("Dashboard server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Read API
        .route("/api/status", get(routes::get_status))
        .route("/api/bots", get(routes::get_bots))
        .route("/api/bots/:id", get(routes::get_bot))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/markets", get(routes::get_markets))
        .route("/health", get(routes::health))
        // Operator API
        .route("/api/bots/start-all", post(routes::start_all))
        .route("/api/bots/stop-all", post(routes::stop_all))
        .route("/api/bots/:id/start", post(routes::start_bot))
        .route("/api/bots/:id/stop", post(routes::stop_bot))
        .route("/api/session/reset", post(routes::reset_session))
        .route("/api/stats/reset", post(routes::reset_stats))
        .route("/api/sample-size", put(routes::set_sample_size))
        .route("/api/limits", put(routes::set_limits))
        .route("/api/symbol", put(routes::set_symbol))
        .route("/api/stake", put(routes::set_stake))
        .route("/api/martingale", put(routes::set_martingale))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
