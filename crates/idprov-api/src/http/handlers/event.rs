//! Trigger event intake.
//!
//! POST /api/v1/events - Start one provisioning execution per event.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use idprov_types::trigger::TriggerEvent;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /api/v1/events - Accept a lifecycle event and queue its execution.
///
/// Responds `202 Accepted` once the execution is persisted; the worker
/// advances it in the background.
pub async fn submit_event(
    State(state): State<AppState>,
    body: Result<Json<TriggerEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    let Json(event) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let execution_id = state.engine.start_event(&event).await?;

    tracing::info!(
        %execution_id,
        detail_type = event.detail_type.as_str(),
        deployment_module = event.detail.deployment_module.as_str(),
        callback = event.has_callback_token(),
        "trigger event accepted"
    );

    let elapsed = start.elapsed().as_millis() as u64;
    let data = json!({
        "execution_id": execution_id,
        "workflow_name": state.engine.workflow().name(),
    });
    let response = ApiResponse::success(data, request_id, elapsed)
        .with_link("self", &format!("/api/v1/executions/{execution_id}"))
        .with_link("steps", &format!("/api/v1/executions/{execution_id}/steps"));

    Ok((StatusCode::ACCEPTED, Json(response)))
}
