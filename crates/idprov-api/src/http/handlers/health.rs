//! GET /api/v1/health - Liveness check.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::http::response::ApiResponse;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let start = Instant::now();
    let data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workflow": state.engine.workflow().name(),
        "execution_timeout_secs": state.config.engine.execution_timeout_secs,
        "map_concurrency": state.config.engine.map_concurrency,
    });
    let elapsed = start.elapsed().as_millis() as u64;
    Json(ApiResponse::success(data, uuid::Uuid::now_v7().to_string(), elapsed))
}
