use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tether_vault::{KeySource, Vault};
use tokio::sync::Semaphore;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::api;
use crate::config::GatewayConfig;
use crate::liveness::LivenessTracker;
use crate::security::{self, FixedWindowRateLimiter, SecurityHeaders};
use crate::store::{SessionStore, SessionTier};
use crate::ws;

/// Everything request handlers need, built once by the composition root.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub vault: Arc<Vault>,
    pub key_source: KeySource,
    pub active_sessions: Arc<dyn SessionStore>,
    pub permanent_sessions: Arc<dyn SessionStore>,
    pub tracker: Arc<LivenessTracker>,
    /// Open WebSocket slots; see [`ws::connection_slots`].
    pub ws_slots: Arc<Semaphore>,
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
}

impl AppState {
    pub fn store(&self, tier: SessionTier) -> &Arc<dyn SessionStore> {
        match tier {
            SessionTier::Active => &self.active_sessions,
            SessionTier::Permanent => &self.permanent_sessions,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_ws_connections: usize,
    pub active_sessions: usize,
    pub permanent_sessions: usize,
    pub key_durable: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_ws_connections: state.tracker.len(),
        active_sessions: state.active_sessions.len(),
        permanent_sessions: state.permanent_sessions.len(),
        key_durable: state.key_source.is_durable(),
    })
}

pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let api_routes = Router::new()
        .route("/sessions", post(api::create_session))
        .route(
            "/sessions/:id",
            get(api::get_session).delete(api::delete_session),
        )
        .route("/sessions/:id/bundle", get(api::get_session_bundle))
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            security::api_rate_limit,
        ));

    let static_files = ServeDir::new(&config.public_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api_routes)
        .fallback_service(static_files)
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(middleware::from_fn_with_state(
            SecurityHeaders { hsts: config.hsts },
            security::security_headers,
        ))
        .layer(security::build_cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
