//! Execution inspection endpoints.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use idprov_types::error::ErrorInfo;
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Upper bound for `GET /executions?limit=`.
const MAX_LIST_LIMIT: u32 = 200;

/// An execution together with a summary of its Map items.
#[derive(Debug, Serialize)]
pub struct ExecutionView {
    #[serde(flatten)]
    pub execution: ExecutionRecord,
    pub items: Vec<ItemSummary>,
}

#[derive(Debug, Serialize)]
pub struct ItemSummary {
    pub id: Uuid,
    pub item_index: Option<usize>,
    pub status: ExecutionStatus,
    pub current_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ExecutionRecord> for ItemSummary {
    fn from(record: ExecutionRecord) -> Self {
        Self {
            id: record.id,
            item_index: record.parent.as_ref().map(|p| p.item_index),
            status: record.status,
            current_state: record.current_state,
            error: record.error,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// GET /api/v1/executions - Most recent top-level executions.
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<ItemSummary>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let limit = query.limit.unwrap_or(20).clamp(1, MAX_LIST_LIMIT);
    let executions = state.engine.list(limit).await?;
    let data: Vec<ItemSummary> = executions.into_iter().map(ItemSummary::from).collect();

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(data, request_id, elapsed)))
}

/// GET /api/v1/executions/{id} - One execution and its Map items.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExecutionView>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state.engine.execution(id).await?;
    let items = state
        .engine
        .children(id)
        .await?
        .into_iter()
        .map(ItemSummary::from)
        .collect();

    let elapsed = start.elapsed().as_millis() as u64;
    let view = ExecutionView { execution, items };
    Ok(Json(
        ApiResponse::success(view, request_id, elapsed)
            .with_link("steps", &format!("/api/v1/executions/{id}/steps")),
    ))
}

/// GET /api/v1/executions/{id}/steps - Step log, oldest first.
pub async fn get_steps(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<StepLog>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    // Distinguish an unknown id from an execution with no steps yet.
    state.engine.execution(id).await?;
    let steps = state.engine.step_logs(id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(steps, request_id, elapsed)))
}
