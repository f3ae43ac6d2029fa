//! In-memory repository implementations.
//!
//! Used by tests and by dry runs, where nothing should touch the data
//! directory. Same semantics as the SQLite implementations in idprov-infra.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use idprov_types::error::RepositoryError;
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog};
use uuid::Uuid;

use super::execution::ExecutionRepository;
use super::ledger::{CallbackLedger, TokenClaim};

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ExecutionTables {
    executions: HashMap<Uuid, ExecutionRecord>,
    step_logs: Vec<StepLog>,
}

/// Execution repository backed by a mutex-guarded map.
///
/// Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    tables: Arc<Mutex<ExecutionTables>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExecutionTables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        if tables.executions.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                record.id
            )));
        }
        tables.executions.insert(record.id, record.clone());
        Ok(())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let mut tables = self.lock();
        match tables.executions.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        Ok(self.lock().executions.get(id).cloned())
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let tables = self.lock();
        let mut out: Vec<ExecutionRecord> = tables
            .executions
            .values()
            .filter(|r| r.parent.is_none())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn list_children(&self, parent_id: &Uuid) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let tables = self.lock();
        let mut out: Vec<ExecutionRecord> = tables
            .executions
            .values()
            .filter(|r| r.parent.as_ref().is_some_and(|p| p.execution_id == *parent_id))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.parent.as_ref().map(|p| p.item_index), r.id));
        Ok(out)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let tables = self.lock();
        let mut out: Vec<ExecutionRecord> = tables
            .executions
            .values()
            .filter(|r| {
                r.status == ExecutionStatus::Suspended && r.resume_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.resume_at, r.id));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn next_resume_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|r| r.status == ExecutionStatus::Suspended)
            .filter_map(|r| r.resume_at)
            .min())
    }

    async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let tables = self.lock();
        let mut out: Vec<ExecutionRecord> = tables
            .executions
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn append_step_log(&self, log: &StepLog) -> Result<(), RepositoryError> {
        self.lock().step_logs.push(log.clone());
        Ok(())
    }

    async fn list_step_logs(&self, execution_id: &Uuid) -> Result<Vec<StepLog>, RepositoryError> {
        Ok(self
            .lock()
            .step_logs
            .iter()
            .filter(|l| l.execution_id == *execution_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Callback ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ClaimRow {
    execution_id: Uuid,
    outcome: String,
    attempted: bool,
    sent: bool,
}

#[derive(Default)]
pub struct InMemoryCallbackLedger {
    claims: Mutex<HashMap<String, ClaimRow>>,
}

impl InMemoryCallbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, digest: &str, f: impl FnOnce(&mut ClaimRow)) -> Result<(), RepositoryError> {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        let row = claims.get_mut(digest).ok_or(RepositoryError::NotFound)?;
        f(row);
        Ok(())
    }
}

impl CallbackLedger for InMemoryCallbackLedger {
    async fn claim(
        &self,
        digest: &str,
        execution_id: &Uuid,
        outcome: &str,
    ) -> Result<TokenClaim, RepositoryError> {
        let mut claims = self.claims.lock().unwrap_or_else(|p| p.into_inner());
        let claim = match claims.get(digest) {
            None => {
                claims.insert(
                    digest.to_string(),
                    ClaimRow {
                        execution_id: *execution_id,
                        outcome: outcome.to_string(),
                        attempted: false,
                        sent: false,
                    },
                );
                TokenClaim::Acquired
            }
            Some(row) => TokenClaim::for_existing(
                &row.execution_id,
                &row.outcome,
                row.attempted,
                row.sent,
                execution_id,
                outcome,
            ),
        };
        Ok(claim)
    }

    async fn mark_attempted(&self, digest: &str) -> Result<(), RepositoryError> {
        self.update(digest, |row| row.attempted = true)
    }

    async fn mark_sent(&self, digest: &str) -> Result<(), RepositoryError> {
        self.update(digest, |row| row.sent = true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use idprov_types::execution::ParentLink;
    use serde_json::json;

    fn record(now: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord::new("wf", "Start", json!({}), now, now + Duration::hours(1))
    }

    #[tokio::test]
    async fn create_get_save() {
        let repo = InMemoryExecutionRepository::new();
        let mut rec = record(Utc::now());
        repo.create_execution(&rec).await.unwrap();
        assert!(matches!(
            repo.create_execution(&rec).await,
            Err(RepositoryError::Conflict(_))
        ));

        rec.current_state = "Next".into();
        repo.save_execution(&rec).await.unwrap();
        let loaded = repo.get_execution(&rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.current_state, "Next");

        let other = record(Utc::now());
        assert!(matches!(repo.save_execution(&other).await, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn due_and_children_queries() {
        let repo = InMemoryExecutionRepository::new();
        let now = Utc::now();

        let mut parent = record(now);
        parent.status = ExecutionStatus::Suspended;
        repo.create_execution(&parent).await.unwrap();

        let mut due = record(now);
        due.status = ExecutionStatus::Suspended;
        due.resume_at = Some(now - Duration::seconds(1));
        due.parent = Some(ParentLink {
            execution_id: parent.id,
            map_state: "Map".into(),
            map_instance: Uuid::now_v7(),
            item_index: 1,
        });
        repo.create_execution(&due).await.unwrap();

        let mut later = record(now);
        later.status = ExecutionStatus::Suspended;
        later.resume_at = Some(now + Duration::minutes(2));
        repo.create_execution(&later).await.unwrap();

        let ids: Vec<Uuid> = repo.list_due(now, 10).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![due.id]);
        assert_eq!(repo.next_resume_at().await.unwrap(), due.resume_at);
        assert_eq!(repo.list_children(&parent.id).await.unwrap().len(), 1);
        assert_eq!(repo.list_executions(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ledger_claims() {
        let ledger = InMemoryCallbackLedger::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        assert_eq!(ledger.claim("d1", &a, "success").await.unwrap(), TokenClaim::Acquired);
        assert_eq!(ledger.claim("d1", &a, "success").await.unwrap(), TokenClaim::Reclaimed);
        assert_eq!(ledger.claim("d1", &a, "failure").await.unwrap(), TokenClaim::OutcomeConflict);
        assert_eq!(ledger.claim("d1", &b, "failure").await.unwrap(), TokenClaim::ClaimedElsewhere);

        ledger.mark_attempted("d1").await.unwrap();
        assert_eq!(ledger.claim("d1", &a, "success").await.unwrap(), TokenClaim::Attempted);
        assert!(matches!(ledger.mark_attempted("d9").await, Err(RepositoryError::NotFound)));

        ledger.mark_sent("d1").await.unwrap();
        assert_eq!(ledger.claim("d1", &a, "failure").await.unwrap(), TokenClaim::AlreadySent);
        assert!(!TokenClaim::AlreadySent.may_send());
    }
}
