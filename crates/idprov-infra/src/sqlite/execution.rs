//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `idprov-core` using sqlx with split
//! read/write pools. Each execution record is stored as a JSON blob next to
//! the columns the engine queries on (status, pending resume time, parent).
//! Step logs are an append-only audit table.

use chrono::{DateTime, Utc};
use idprov_core::repository::execution::ExecutionRepository;
use idprov_types::error::{ErrorInfo, RepositoryError};
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog, StepOutcome};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct StepLogRow {
    id: String,
    execution_id: String,
    state: String,
    attempt: i64,
    outcome: String,
    idempotency_key: String,
    error: Option<String>,
    delay_ms: Option<i64>,
    recorded_at: String,
}

impl StepLogRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            state: row.try_get("state")?,
            attempt: row.try_get("attempt")?,
            outcome: row.try_get("outcome")?,
            idempotency_key: row.try_get("idempotency_key")?,
            error: row.try_get("error")?,
            delay_ms: row.try_get("delay_ms")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn into_step_log(self) -> Result<StepLog, RepositoryError> {
        let outcome: StepOutcome = serde_json::from_value(serde_json::Value::String(self.outcome.clone()))
            .map_err(|_| RepositoryError::Query(format!("invalid step outcome: {}", self.outcome)))?;

        let error = self
            .error
            .as_deref()
            .map(|s| {
                serde_json::from_str::<ErrorInfo>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid step error: {e}")))
            })
            .transpose()?;

        Ok(StepLog {
            id: parse_uuid(&self.id)?,
            execution_id: parse_uuid(&self.execution_id)?,
            state: self.state,
            attempt: self.attempt as u32,
            outcome,
            idempotency_key: self.idempotency_key,
            error,
            delay_ms: self.delay_ms.map(|d| d as u64),
            recorded_at: parse_datetime(&self.recorded_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Resume times are compared in SQL, so they are stored as integer micros.
fn resume_micros(record: &ExecutionRecord) -> Option<i64> {
    record.resume_at.map(|at| at.timestamp_micros())
}

fn record_json(record: &ExecutionRecord) -> Result<String, RepositoryError> {
    serde_json::to_string(record)
        .map_err(|e| RepositoryError::Query(format!("serialize execution: {e}")))
}

fn parse_record(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord, RepositoryError> {
    let json: String = row
        .try_get("record")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&json)
        .map_err(|e| RepositoryError::Query(format!("invalid execution JSON: {e}")))
}

fn parse_records(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ExecutionRecord>, RepositoryError> {
    rows.iter().map(parse_record).collect()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let json = record_json(record)?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_name, parent_id, item_index, status, current_state,
                resume_at_us, record, started_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.workflow_name)
        .bind(record.parent.as_ref().map(|p| p.execution_id.to_string()))
        .bind(record.parent.as_ref().map(|p| p.item_index as i64))
        .bind(record.status.as_str())
        .bind(&record.current_state)
        .bind(resume_micros(record))
        .bind(&json)
        .bind(format_datetime(&record.started_at))
        .bind(format_datetime(&record.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("execution {} already exists", record.id))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let json = record_json(record)?;

        let result = sqlx::query(
            r#"UPDATE executions
               SET status = ?, current_state = ?, resume_at_us = ?, record = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(record.status.as_str())
        .bind(&record.current_state)
        .bind(resume_micros(record))
        .bind(&json)
        .bind(format_datetime(&record.updated_at))
        .bind(record.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT record FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(parse_record).transpose()
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM executions WHERE parent_id IS NULL ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        parse_records(&rows)
    }

    async fn list_children(&self, parent_id: &Uuid) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT record FROM executions WHERE parent_id = ? ORDER BY item_index ASC, id ASC",
        )
        .bind(parent_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        parse_records(&rows)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT record FROM executions
               WHERE status = 'suspended' AND resume_at_us IS NOT NULL AND resume_at_us <= ?
               ORDER BY resume_at_us ASC, id ASC
               LIMIT ?"#,
        )
        .bind(now.timestamp_micros())
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        parse_records(&rows)
    }

    async fn next_resume_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT MIN(resume_at_us) FROM executions WHERE status = 'suspended'",
        )
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(row.0.and_then(DateTime::<Utc>::from_timestamp_micros))
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT record FROM executions WHERE status = ? ORDER BY id ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        parse_records(&rows)
    }

    async fn append_step_log(&self, log: &StepLog) -> Result<(), RepositoryError> {
        let error = log
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO step_logs
               (id, execution_id, state, attempt, outcome, idempotency_key, error, delay_ms, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(log.execution_id.to_string())
        .bind(&log.state)
        .bind(log.attempt as i64)
        .bind(log.outcome.as_str())
        .bind(&log.idempotency_key)
        .bind(&error)
        .bind(log.delay_ms.map(|d| d as i64))
        .bind(format_datetime(&log.recorded_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_step_logs(&self, execution_id: &Uuid) -> Result<Vec<StepLog>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM step_logs WHERE execution_id = ? ORDER BY seq ASC")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepLogRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            logs.push(r.into_step_log()?);
        }
        Ok(logs)
    }
}
