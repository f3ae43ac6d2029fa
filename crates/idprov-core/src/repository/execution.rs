//! Execution repository trait definition.
//!
//! Defines the storage interface for execution records and their step logs.
//! The infrastructure layer (idprov-infra) implements this trait with SQLite
//! persistence; `memory::InMemoryExecutionRepository` backs tests and dry runs.

use chrono::{DateTime, Utc};
use idprov_types::error::RepositoryError;
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog};
use uuid::Uuid;

/// Repository trait for execution persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Insert a new execution record. Fails with `Conflict` if the id exists.
    fn create_execution(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite an existing execution record. Fails with `NotFound` if absent.
    fn save_execution(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    /// Most recent top-level executions first.
    fn list_executions(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    /// Map item executions spawned by `parent_id`, in item order.
    fn list_children(
        &self,
        parent_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    /// Suspended executions whose `resume_at` is at or before `now`, earliest first.
    fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    /// Earliest pending `resume_at` among suspended executions.
    fn next_resume_at(
        &self,
    ) -> impl std::future::Future<Output = Result<Option<DateTime<Utc>>, RepositoryError>> + Send;

    fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step logs
    // -----------------------------------------------------------------------

    fn append_step_log(
        &self,
        log: &StepLog,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Step logs for one execution, oldest first.
    fn list_step_logs(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepLog>, RepositoryError>> + Send;
}
