//! Persisted execution records.
//!
//! Every execution (a top-level run or one Map item) is an `ExecutionRecord`
//! that is rewritten after each interpreter step. A suspended record carries
//! the instant it should resume at, so nothing needs to stay in memory while
//! an execution waits.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorInfo;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Ready to advance (queued or being advanced).
    Running,
    /// Waiting for a timer or for Map items.
    Suspended,
    Succeeded,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Suspended => "suspended",
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "suspended" => Ok(ExecutionStatus::Suspended),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "timed_out" => Ok(ExecutionStatus::TimedOut),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// Links a Map item execution to the parent that fanned it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub execution_id: Uuid,
    /// Id of the Map state in the parent's graph.
    pub map_state: String,
    /// Identifies one entry into the Map state.
    pub map_instance: Uuid,
    pub item_index: usize,
}

/// Fan-out bookkeeping kept on the parent while its Map state is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapProgress {
    pub instance: Uuid,
    pub state: String,
    /// Seed documents for every item, in item order.
    pub items: Vec<Value>,
    /// Concurrency bound; `0` is unbounded.
    pub concurrency: usize,
    /// Index of the next item to start.
    pub next_index: usize,
    /// Started items still running, keyed by item index.
    pub in_flight: BTreeMap<usize, Uuid>,
    /// Final documents of succeeded items.
    pub results: Vec<Option<Value>>,
    /// The first failure observed, by completion order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_index: usize,
    pub error: ErrorInfo,
}

/// A single execution, persisted after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentLink>,
    /// Map state ids leading from the top-level graph to this execution's graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scope: Vec<String>,
    pub status: ExecutionStatus,
    pub current_state: String,
    pub document: Value,
    /// Invocations of the current Task entry so far. A Wait state sets it to
    /// 1 once its timer is armed.
    #[serde(default)]
    pub task_attempt: u32,
    /// Retries already scheduled per Retry rule index for the current Task entry.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retry_counts: BTreeMap<usize, u32>,
    /// Number of entries per state id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub visits: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<MapProgress>,
    /// Wall-clock budget shared with every Map item spawned from this execution.
    pub deadline: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ExecutionRecord {
    /// A fresh running execution positioned at `start_at`.
    pub fn new(
        workflow_name: impl Into<String>,
        start_at: impl Into<String>,
        document: Value,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        let current_state = start_at.into();
        let mut visits = BTreeMap::new();
        visits.insert(current_state.clone(), 1);
        Self {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.into(),
            parent: None,
            scope: Vec::new(),
            status: ExecutionStatus::Running,
            current_state,
            document,
            task_attempt: 0,
            retry_counts: BTreeMap::new(),
            visits,
            resume_at: None,
            map: None,
            deadline,
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Move to another state: count the visit and reset per-entry counters.
    pub fn enter(&mut self, state: impl Into<String>) {
        let state = state.into();
        *self.visits.entry(state.clone()).or_insert(0) += 1;
        self.current_state = state;
        self.task_attempt = 0;
        self.retry_counts.clear();
        self.resume_at = None;
    }

    /// Number of entries into `state` so far.
    pub fn visits_to(&self, state: &str) -> u32 {
        self.visits.get(state).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Step logs
// ---------------------------------------------------------------------------

/// Outcome recorded for one interpreter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    RetryScheduled,
    Caught,
    Waiting,
    FannedOut,
    Failed,
    Succeeded,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Completed => "completed",
            StepOutcome::RetryScheduled => "retry_scheduled",
            StepOutcome::Caught => "caught",
            StepOutcome::Waiting => "waiting",
            StepOutcome::FannedOut => "fanned_out",
            StepOutcome::Failed => "failed",
            StepOutcome::Succeeded => "succeeded",
        }
    }
}

/// Audit entry for one interpreter step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub state: String,
    pub attempt: u32,
    pub outcome: StepOutcome,
    /// `{execution_id}-{state}-{attempt}`, passed to activities as an idempotency key.
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Scheduled delay before the next step, for waits and retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}
