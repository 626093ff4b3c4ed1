//! HTTP request handlers

use super::AppContext;
use crate::buffering::WorkerState;
use axum::extract::State;
use axum::response::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub active_streams: usize,
    pub available_slots: usize,
    pub max_streams: usize,
    pub buffer_worker_running: bool,
}

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    let controller = &ctx.engine.controller;
    let status = if controller.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "chunkstream".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_streams: controller.active_streams(),
        available_slots: controller.available_slots(),
        max_streams: controller.max_streams(),
        buffer_worker_running: ctx.engine.buffer_worker.state().await == WorkerState::Running,
    })
}
