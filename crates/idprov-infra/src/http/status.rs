//! HTTP deployment-status sink.

use std::time::Duration;

use idprov_core::identity::status::{StatusSink, StatusUpdate};
use idprov_core::workflow::activity::ActivityError;

use super::{client, response_error, send_fault};

/// PUTs each status update as JSON to a fixed URL.
pub struct HttpStatusSink {
    url: String,
    client: reqwest::Client,
}

impl HttpStatusSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.into(),
            client: client(timeout)?,
        })
    }
}

impl StatusSink for HttpStatusSink {
    async fn put_status(&self, update: &StatusUpdate) -> Result<(), ActivityError> {
        let response = self
            .client
            .put(&self.url)
            .json(update)
            .send()
            .await
            .map_err(|e| send_fault(&e).into_error(format!("deployment status request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(response_error(status, &body))
    }
}
