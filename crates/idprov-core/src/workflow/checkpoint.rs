//! Durable checkpoint manager for execution state.
//!
//! Wraps `ExecutionRepository` to provide a higher-level API for recording
//! execution checkpoints. The engine saves the full execution record after
//! every step and appends one step log per step, so a crashed process can
//! resume every execution from its last completed step.

use chrono::{DateTime, Utc};
use idprov_types::error::ErrorInfo;
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog, StepOutcome};
use uuid::Uuid;

use crate::repository::execution::ExecutionRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints.
///
/// Generic over `R: ExecutionRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.). Every state transition is persisted before
/// the engine moves forward.
pub struct CheckpointManager<R: ExecutionRepository> {
    repo: R,
}

impl<R: ExecutionRepository> CheckpointManager<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Persist a new execution.
    pub async fn create(&self, record: &ExecutionRecord) -> Result<(), CheckpointError> {
        self.repo
            .create_execution(record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Persist the current state of an execution.
    pub async fn save(&self, record: &ExecutionRecord) -> Result<(), CheckpointError> {
        self.repo
            .save_execution(record)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Load an execution, failing if it does not exist.
    pub async fn load(&self, id: Uuid) -> Result<ExecutionRecord, CheckpointError> {
        self.repo
            .get_execution(&id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?
            .ok_or(CheckpointError::ExecutionNotFound(id))
    }

    /// Append the audit entry for one step.
    pub async fn log_step(
        &self,
        execution_id: Uuid,
        state: &str,
        attempt: u32,
        outcome: StepOutcome,
        error: Option<ErrorInfo>,
        delay_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<(), CheckpointError> {
        let log = StepLog {
            id: Uuid::now_v7(),
            execution_id,
            state: state.to_string(),
            attempt,
            outcome,
            idempotency_key: idempotency_key(execution_id, state, attempt),
            error,
            delay_ms,
            recorded_at: now,
        };
        self.repo
            .append_step_log(&log)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    pub async fn step_logs(&self, execution_id: Uuid) -> Result<Vec<StepLog>, CheckpointError> {
        self.repo
            .list_step_logs(&execution_id)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Ids of suspended executions whose timer has fired.
    pub async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Uuid>, CheckpointError> {
        let records = self
            .repo
            .list_due(now, limit)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    pub async fn next_resume_at(&self) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        self.repo
            .next_resume_at()
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))
    }

    /// Ids of executions left `Running` (e.g. by a crash), for recovery.
    pub async fn running(&self) -> Result<Vec<Uuid>, CheckpointError> {
        let records = self
            .repo
            .list_by_status(ExecutionStatus::Running)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        Ok(records.into_iter().map(|r| r.id).collect())
    }
}

/// Key passed to activities so a re-delivered invocation can be deduplicated.
pub fn idempotency_key(execution_id: Uuid, state: &str, attempt: u32) -> String {
    format!("{execution_id}-{state}-{attempt}")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryExecutionRepository;
    use serde_json::json;

    #[tokio::test]
    async fn log_step_builds_idempotency_key() {
        let manager = CheckpointManager::new(InMemoryExecutionRepository::new());
        let now = Utc::now();
        let record = ExecutionRecord::new("wf", "Create AD group", json!({}), now, now);
        manager.create(&record).await.unwrap();

        manager
            .log_step(record.id, "Create AD group", 2, StepOutcome::RetryScheduled, None, Some(120_000), now)
            .await
            .unwrap();

        let logs = manager.step_logs(record.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].idempotency_key, format!("{}-Create AD group-2", record.id));
        assert_eq!(logs[0].delay_ms, Some(120_000));
    }

    #[tokio::test]
    async fn load_missing_execution() {
        let manager = CheckpointManager::new(InMemoryExecutionRepository::new());
        let id = Uuid::now_v7();
        assert!(matches!(
            manager.load(id).await,
            Err(CheckpointError::ExecutionNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn running_lists_unfinished_executions() {
        let manager = CheckpointManager::new(InMemoryExecutionRepository::new());
        let now = Utc::now();
        let running = ExecutionRecord::new("wf", "A", json!({}), now, now);
        let mut done = ExecutionRecord::new("wf", "A", json!({}), now, now);
        done.status = ExecutionStatus::Succeeded;
        manager.create(&running).await.unwrap();
        manager.create(&done).await.unwrap();
        assert_eq!(manager.running().await.unwrap(), vec![running.id]);
    }
}
