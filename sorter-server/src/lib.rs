//! HTTP and WebSocket transport for the sorting line

pub mod websocket;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sorter_core::{EngineState, HardwareCapabilities, StatusClass};
use sorter_engine::{CounterSnapshot, SortingLine};
use std::sync::Arc;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub line: Arc<SortingLine>,
}

impl AppState {
    pub fn new(line: Arc<SortingLine>) -> Self {
        Self { line }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub state: EngineState,
    pub class: StatusClass,
    pub capabilities: HardwareCapabilities,
    pub running: bool,
    pub counters: CounterSnapshot,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket::websocket_handler))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let engine = state.line.engine();
    let engine_state = engine.state();
    Json(HealthReport {
        state: engine_state,
        class: engine_state.status_class(),
        capabilities: engine.capabilities(),
        running: state.line.control().is_running(),
        counters: engine.counters(),
    })
}
