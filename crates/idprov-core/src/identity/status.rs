//! Deployment-status updates.
//!
//! The workflow writes `running` when it starts and `success` / `failure`
//! before the matching callback. The payload is checked against the closed
//! status and detail-type sets before it reaches the sink.

use std::future::Future;
use std::sync::{Arc, Mutex};

use idprov_types::trigger::{DeploymentStatus, DetailType};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::workflow::activity::{Activity, ActivityError, ActivityFuture, ActivityRequest};

/// One write to the deployment-status sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub deployment_status: DeploymentStatus,
    #[serde(rename = "detail-type")]
    pub detail_type: DetailType,
    pub detail: Value,
}

/// Destination of deployment-status updates.
pub trait StatusSink: Send + Sync {
    fn put_status(
        &self,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<(), ActivityError>> + Send;
}

impl<T: StatusSink> StatusSink for Arc<T> {
    fn put_status(
        &self,
        update: &StatusUpdate,
    ) -> impl Future<Output = Result<(), ActivityError>> + Send {
        (**self).put_status(update)
    }
}

/// Activity adapter over a `StatusSink`.
pub struct DeploymentStatusActivity<S> {
    sink: S,
}

impl<S: StatusSink + 'static> DeploymentStatusActivity<S> {
    pub fn new(sink: S) -> Arc<dyn Activity> {
        Arc::new(Self { sink })
    }

    async fn put(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        let update: StatusUpdate = serde_json::from_value(request.payload).map_err(|e| {
            ActivityError::non_retriable(format!("invalid deployment status update: {e}"))
        })?;
        self.sink.put_status(&update).await?;
        tracing::info!(
            execution_id = %request.execution_id,
            deployment_status = ?update.deployment_status,
            "deployment status updated"
        );
        Ok(json!({ "deployment_status": update.deployment_status }))
    }
}

impl<S: StatusSink + 'static> Activity for DeploymentStatusActivity<S> {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        Box::pin(self.put(request))
    }
}

/// Sink that keeps every update in memory.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<DeploymentStatus> {
        self.updates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|u| u.deployment_status)
            .collect()
    }
}

impl StatusSink for RecordingStatusSink {
    async fn put_status(&self, update: &StatusUpdate) -> Result<(), ActivityError> {
        self.updates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(update.clone());
        Ok(())
    }
}
