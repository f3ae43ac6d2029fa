//! Long-poll task results for the SailPoint and CyberArk launch/poll pairs.
//!
//! A launch activity returns a task-result id; the poll activity reads the
//! result and maps it onto the error kinds the workflow routes on:
//! still running is retried in place, a missing result triggers a wait and
//! relaunch, and a failed or terminated task is permanent.

use std::future::Future;
use std::sync::Arc;

use idprov_types::error::kinds;
use serde_json::{json, Value};

use crate::workflow::activity::{Activity, ActivityError, ActivityFuture, ActivityRequest};

/// Status reported by the external workflow system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResultStatus {
    Succeeded,
    InProgress,
    Terminated,
    Failed { errors: Vec<String> },
    /// The response could not be interpreted; treated as not yet complete.
    InvalidResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskResultError {
    #[error("task result not found (404)")]
    NotFound,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("task result API error: {0}")]
    Api(String),
}

/// Reads task results by id.
pub trait TaskResultSource: Send + Sync {
    fn task_result(
        &self,
        task_result_id: &str,
    ) -> impl Future<Output = Result<TaskResultStatus, TaskResultError>> + Send;
}

impl<T: TaskResultSource> TaskResultSource for Arc<T> {
    fn task_result(
        &self,
        task_result_id: &str,
    ) -> impl Future<Output = Result<TaskResultStatus, TaskResultError>> + Send {
        (**self).task_result(task_result_id)
    }
}

/// Map a poll outcome onto an activity result.
pub fn classify_task_result(
    result: Result<TaskResultStatus, TaskResultError>,
) -> Result<Value, ActivityError> {
    match result {
        Ok(TaskResultStatus::Succeeded) => Ok(completed()),
        Ok(TaskResultStatus::InProgress) => Err(ActivityError::new(
            kinds::TASK_NOT_COMPLETED,
            "Workflow is still in progress",
        )),
        Ok(TaskResultStatus::InvalidResponse) => Err(ActivityError::new(
            kinds::TASK_NOT_COMPLETED,
            "Invalid API response received for Get TaskResult API. Try again later.",
        )),
        Ok(TaskResultStatus::Terminated) => Err(ActivityError::new(
            kinds::TASK_RESULT_FAILED,
            "Workflow terminated (terminated flag is set)",
        )),
        Ok(TaskResultStatus::Failed { errors }) => Err(ActivityError::new(
            kinds::TASK_RESULT_FAILED,
            format!("Workflow failed. Errors: [{}]", errors.join(", ")),
        )),
        Err(TaskResultError::NotFound) => Err(ActivityError::new(
            kinds::TASK_RESULT_NOT_FOUND,
            "Failed to retrieve task result due to NotFound (404) error",
        )),
        Err(e @ (TaskResultError::Auth(_) | TaskResultError::Api(_))) => Err(
            ActivityError::non_retriable(format!("Failed to get task result: {e}")),
        ),
    }
}

fn completed() -> Value {
    json!({ "role_onboarding_status": "COMPLETED" })
}

/// Poll activity over a `TaskResultSource`.
///
/// The request is the Map item document; the task-result id and the
/// per-system enabled flag are read from it by JSON pointer.
pub struct TaskResultActivity<S> {
    source: S,
    id_pointer: &'static str,
    enabled_pointer: &'static str,
}

impl<S: TaskResultSource + 'static> TaskResultActivity<S> {
    pub fn sailpoint(source: S) -> Arc<dyn Activity> {
        Arc::new(Self {
            source,
            id_pointer: "/role/sailpoint_launch_workflow/taskresult_id",
            enabled_pointer: "/base_configs/data/sailpoint_state_enabled",
        })
    }

    pub fn cyberark(source: S) -> Arc<dyn Activity> {
        Arc::new(Self {
            source,
            id_pointer: "/role/cyberark_taskresult_id/cyberark_taskresult_id",
            enabled_pointer: "/base_configs/data/cyberark_state_enabled",
        })
    }

    async fn poll(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        if !enabled_flag(request.payload.pointer(self.enabled_pointer))? {
            tracing::info!(
                execution_id = %request.execution_id,
                state = %request.state,
                "task result polling disabled; reporting completed"
            );
            return Ok(completed());
        }

        let task_result_id = request
            .payload
            .pointer(self.id_pointer)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ActivityError::non_retriable(format!(
                    "TaskResult ID must be a non-empty string at {}",
                    self.id_pointer
                ))
            })?;

        let result = self.source.task_result(task_result_id).await;
        tracing::debug!(
            execution_id = %request.execution_id,
            task_result_id,
            result = ?result,
            "task result polled"
        );
        classify_task_result(result)
    }
}

impl<S: TaskResultSource + 'static> Activity for TaskResultActivity<S> {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        Box::pin(self.poll(request))
    }
}

/// Parse an enabled flag. A missing flag means enabled.
fn enabled_flag(value: Option<&Value>) -> Result<bool, ActivityError> {
    match value {
        None | Some(Value::Null) => Ok(true),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" => Ok(true),
            "false" | "no" | "n" | "0" | "off" => Ok(false),
            other => Err(ActivityError::non_retriable(format!(
                "enabled flag must be a boolean, got '{other}'"
            ))),
        },
        Some(other) => Err(ActivityError::non_retriable(format!(
            "enabled flag must be a boolean, got {other}"
        ))),
    }
}
