//! HTTP callback channel.
//!
//! Posts `send-task-success` / `send-task-failure` to the configured
//! callback endpoint. The raw token is exposed only while building the
//! request body and is never logged.

use std::time::Duration;

use idprov_core::callback::channel::{CallbackChannel, CallbackError, CallbackFuture};
use idprov_core::callback::token::CallbackToken;
use idprov_types::error::ErrorInfo;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{client, send_fault, status_fault};

/// Error names a callback service uses for tokens it no longer accepts.
const EXPIRED_TOKEN_ERRORS: &[&str] = &["TaskTimedOut", "TaskDoesNotExist", "InvalidToken"];

pub struct HttpCallbackChannel {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpCallbackChannel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let endpoint: String = endpoint.into();
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: client(timeout)?,
        })
    }

    async fn post(&self, path: &str, token: &CallbackToken, body: Value) -> Result<(), CallbackError> {
        let url = format!("{}/{path}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallbackError::Transport {
                fault: send_fault(&e),
                cause: format!("{path} request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let error_name = serde_json::from_str::<ErrorInfo>(&text).ok().map(|e| e.error);
        tracing::warn!(
            token = token.fingerprint(),
            status = status.as_u16(),
            error = error_name.as_deref().unwrap_or(""),
            "callback endpoint rejected notification"
        );

        if status == StatusCode::CONFLICT {
            return Err(CallbackError::TokenConsumed);
        }
        if status == StatusCode::GONE
            || error_name
                .as_deref()
                .is_some_and(|name| EXPIRED_TOKEN_ERRORS.contains(&name))
        {
            return Err(CallbackError::TokenExpired);
        }
        Err(CallbackError::Transport {
            fault: status_fault(status),
            cause: format!("{path} returned HTTP {status}"),
        })
    }
}

impl CallbackChannel for HttpCallbackChannel {
    fn send_success<'a>(&'a self, token: &'a CallbackToken, output: &'a str) -> CallbackFuture<'a> {
        Box::pin(async move {
            let body = json!({ "task_token": token.expose(), "output": output });
            self.post("send-task-success", token, body).await
        })
    }

    fn send_failure<'a>(
        &'a self,
        token: &'a CallbackToken,
        error: &'a str,
        cause: &'a str,
    ) -> CallbackFuture<'a> {
        Box::pin(async move {
            let body = json!({ "task_token": token.expose(), "error": error, "cause": cause });
            self.post("send-task-failure", token, body).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use idprov_types::error::kinds;

    use crate::http::test_server;

    type Received = Arc<Mutex<Vec<(String, Value)>>>;

    async fn capture(received: Received) -> String {
        let router = Router::new()
            .route(
                "/send-task-success",
                post(|State(r): State<Received>, Json(body): Json<Value>| async move {
                    r.lock().unwrap().push(("success".into(), body));
                    Json(json!({}))
                }),
            )
            .route(
                "/send-task-failure",
                post(|State(r): State<Received>, Json(body): Json<Value>| async move {
                    r.lock().unwrap().push(("failure".into(), body));
                    Json(json!({}))
                }),
            )
            .with_state(received);
        test_server::spawn(router).await
    }

    #[tokio::test]
    async fn sends_both_signals() {
        let received = Received::default();
        let base = capture(received.clone()).await;
        let channel = HttpCallbackChannel::new(format!("{base}/"), Duration::from_secs(5)).unwrap();
        let token = CallbackToken::new("tok1").unwrap();

        channel.send_success(&token, "Successfully executed").await.unwrap();
        channel
            .send_failure(&token, "UnhandledChoice", "Choice state failure due to no matching choice")
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received[0].0, "success");
        assert_eq!(received[0].1["task_token"], "tok1");
        assert_eq!(received[0].1["output"], "Successfully executed");
        assert_eq!(received[1].0, "failure");
        assert_eq!(received[1].1["error"], "UnhandledChoice");
    }

    #[tokio::test]
    async fn rejected_tokens_map_to_token_errors() {
        let router = Router::new()
            .route(
                "/send-task-success",
                post(|| async {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(json!({ "error": "TaskTimedOut", "cause": "token expired" })),
                    )
                }),
            )
            .route("/send-task-failure", post(|| async { StatusCode::CONFLICT }));
        let base = test_server::spawn(router).await;
        let channel = HttpCallbackChannel::new(base, Duration::from_secs(5)).unwrap();
        let token = CallbackToken::new("tok1").unwrap();

        let err = channel.send_success(&token, "x").await.unwrap_err();
        assert!(matches!(err, CallbackError::TokenExpired));
        let err = channel.send_failure(&token, "E", "C").await.unwrap_err();
        assert!(matches!(err, CallbackError::TokenConsumed));
    }

    #[tokio::test]
    async fn server_errors_are_transport_faults() {
        let router = Router::new().route(
            "/send-task-success",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let base = test_server::spawn(router).await;
        let channel = HttpCallbackChannel::new(base, Duration::from_secs(5)).unwrap();
        let token = CallbackToken::new("tok1").unwrap();

        let err = channel.send_success(&token, "x").await.unwrap_err();
        let activity_error = idprov_core::workflow::activity::ActivityError::from(err);
        assert_eq!(activity_error.kind, kinds::HTTP_ERROR);
    }
}
