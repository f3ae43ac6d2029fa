//! HTTP task-result source for the SailPoint and CyberArk pollers.
//!
//! `GET {base}/{task_result_id}` returns the workflow system's task result:
//!
//! ```json
//! { "terminated": false, "completed": "2026-01-01T00:00:00Z",
//!   "completion_status": "Success", "messages": [{ "type": "Error", "text": "..." }] }
//! ```
//!
//! A missing `completed` timestamp means the task is still running. A
//! `Success` completion counts only when no error messages were attached.

use std::time::Duration;

use idprov_core::identity::task_result::{TaskResultError, TaskResultSource, TaskResultStatus};
use reqwest::StatusCode;
use serde::Deserialize;

use super::client;

#[derive(Debug, Deserialize)]
struct TaskResultBody {
    #[serde(default)]
    terminated: bool,
    #[serde(default)]
    completed: Option<String>,
    #[serde(default)]
    completion_status: Option<String>,
    #[serde(default)]
    messages: Vec<TaskMessage>,
}

#[derive(Debug, Deserialize)]
struct TaskMessage {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

pub struct HttpTaskResultSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTaskResultSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let base_url: String = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: client(timeout)?,
        })
    }
}

/// Interpret a task-result body.
fn interpret(body: &str) -> TaskResultStatus {
    let Ok(body) = serde_json::from_str::<TaskResultBody>(body) else {
        return TaskResultStatus::InvalidResponse;
    };
    if body.terminated {
        return TaskResultStatus::Terminated;
    }
    if body.completed.is_none() {
        return TaskResultStatus::InProgress;
    }

    let errors: Vec<String> = body
        .messages
        .into_iter()
        .filter(|m| m.kind.eq_ignore_ascii_case("error"))
        .map(|m| m.text)
        .collect();
    match body.completion_status.as_deref() {
        Some(s) if s.eq_ignore_ascii_case("success") && errors.is_empty() => TaskResultStatus::Succeeded,
        Some(_) => TaskResultStatus::Failed { errors },
        None => TaskResultStatus::InvalidResponse,
    }
}

impl TaskResultSource for HttpTaskResultSource {
    async fn task_result(&self, task_result_id: &str) -> Result<TaskResultStatus, TaskResultError> {
        let url = format!("{}/{task_result_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TaskResultError::Api(format!("GET task result failed: {e}")))?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Err(TaskResultError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TaskResultError::Auth(format!("HTTP {status}")));
            }
            s if !s.is_success() => {
                return Err(TaskResultError::Api(format!("received non-200 response {status}")));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| TaskResultError::Api(format!("task result body unreadable: {e}")))?;
        let result = interpret(&body);
        if result == TaskResultStatus::InvalidResponse {
            tracing::warn!(task_result_id, "unrecognised task result response");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use crate::http::test_server;

    #[test]
    fn interprets_task_states() {
        assert_eq!(interpret(r#"{"terminated": true}"#), TaskResultStatus::Terminated);
        assert_eq!(interpret(r#"{"completed": null}"#), TaskResultStatus::InProgress);
        assert_eq!(
            interpret(r#"{"completed": "2026-01-01T00:00:00Z", "completion_status": "Success"}"#),
            TaskResultStatus::Succeeded
        );
        assert_eq!(
            interpret(
                r#"{"completed": "2026-01-01T00:00:00Z", "completion_status": "Success",
                    "messages": [{"type": "Error", "text": "Role r1 not onboarded"}]}"#
            ),
            TaskResultStatus::Failed { errors: vec!["Role r1 not onboarded".into()] }
        );
        assert_eq!(
            interpret(r#"{"completed": "2026-01-01T00:00:00Z", "completion_status": "Error"}"#),
            TaskResultStatus::Failed { errors: vec![] }
        );
        assert_eq!(interpret("not json"), TaskResultStatus::InvalidResponse);
    }

    #[tokio::test]
    async fn maps_http_statuses() {
        let router = Router::new().route(
            "/task-results/{id}",
            get(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "done" => (
                        StatusCode::OK,
                        Json(json!({ "completed": "2026-01-01T00:00:00Z", "completion_status": "Success" })),
                    ),
                    "locked" => (StatusCode::UNAUTHORIZED, Json(json!({}))),
                    "broken" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
                    _ => (StatusCode::NOT_FOUND, Json(json!({}))),
                }
            }),
        );
        let base = test_server::spawn(router).await;
        let source = HttpTaskResultSource::new(format!("{base}/task-results/"), Duration::from_secs(5)).unwrap();

        assert_eq!(source.task_result("done").await.unwrap(), TaskResultStatus::Succeeded);
        assert_eq!(source.task_result("gone").await.unwrap_err(), TaskResultError::NotFound);
        assert!(matches!(source.task_result("locked").await, Err(TaskResultError::Auth(_))));
        assert!(matches!(source.task_result("broken").await, Err(TaskResultError::Api(_))));
    }
}
