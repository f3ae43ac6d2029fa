//! Execution events broadcast on the event bus.
//!
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorInfo;
use crate::execution::ExecutionStatus;

/// Events emitted while executions advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_name: String,
        parent_id: Option<Uuid>,
    },

    StateEntered {
        execution_id: Uuid,
        state: String,
        state_type: String,
    },

    /// A Task failed and will be re-invoked after `delay_ms`.
    RetryScheduled {
        execution_id: Uuid,
        state: String,
        attempt: u32,
        delay_ms: u64,
        error: ErrorInfo,
    },

    /// A failure was routed through a Catch rule.
    FailureCaught {
        execution_id: Uuid,
        state: String,
        next: String,
        error: ErrorInfo,
    },

    ExecutionSuspended {
        execution_id: Uuid,
        state: String,
        resume_in_ms: Option<u64>,
    },

    ExecutionResumed { execution_id: Uuid, state: String },

    MapItemStarted {
        execution_id: Uuid,
        item_execution_id: Uuid,
        item_index: usize,
    },

    MapItemFinished {
        execution_id: Uuid,
        item_execution_id: Uuid,
        item_index: usize,
        succeeded: bool,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
        error: Option<ErrorInfo>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::StateEntered { execution_id, .. }
            | ExecutionEvent::RetryScheduled { execution_id, .. }
            | ExecutionEvent::FailureCaught { execution_id, .. }
            | ExecutionEvent::ExecutionSuspended { execution_id, .. }
            | ExecutionEvent::ExecutionResumed { execution_id, .. }
            | ExecutionEvent::MapItemStarted { execution_id, .. }
            | ExecutionEvent::MapItemFinished { execution_id, .. }
            | ExecutionEvent::ExecutionCompleted { execution_id, .. } => *execution_id,
        }
    }
}
