//! HTTP/WebSocket surface
//!
//! - `GET /ws`: streaming WebSocket (JSON commands in; JSON headers plus
//!   binary PCM out)
//! - `GET /health`: liveness and slot usage

pub mod handlers;
pub mod ws;

use crate::context::EngineContext;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<EngineContext>,
}

/// Build the router
pub fn create_router(engine: Arc<EngineContext>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppContext { engine })
}
