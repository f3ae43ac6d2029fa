//! Generic HTTP-backed activity.
//!
//! POSTs the rendered payload to the configured endpoint. The idempotency key
//! and execution id travel as headers so a service can deduplicate replays of
//! the same attempt after a crash.

use std::sync::Arc;
use std::time::Duration;

use idprov_core::workflow::activity::{Activity, ActivityError, ActivityFuture, ActivityRequest};
use serde_json::Value;

use super::{client, response_error, send_fault};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const EXECUTION_HEADER: &str = "X-Execution-Id";

pub struct HttpActivity {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpActivity {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client: client(timeout)?,
        })
    }

    pub fn shared(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Arc<dyn Activity>, reqwest::Error> {
        Ok(Arc::new(Self::new(name, url, timeout)?))
    }

    async fn call(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        let response = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .header(EXECUTION_HEADER, request.execution_id.to_string())
            .json(&request.payload)
            .send()
            .await
            .map_err(|e| send_fault(&e).into_error(format!("{} request failed: {e}", self.name)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| send_fault(&e).into_error(format!("{} response unreadable: {e}", self.name)))?;

        if !status.is_success() {
            let err = response_error(status, &body);
            tracing::warn!(
                activity = %self.name,
                execution_id = %request.execution_id,
                status = status.as_u16(),
                kind = %err.kind,
                "activity endpoint returned an error"
            );
            return Err(err);
        }

        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&body).map_err(|e| {
            ActivityError::non_retriable(format!("{} returned invalid JSON: {e}", self.name))
        })
    }
}

impl Activity for HttpActivity {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        Box::pin(self.call(request))
    }
}
