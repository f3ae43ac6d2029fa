//! Durable execution engine.
//!
//! The engine owns a ready queue of execution ids. Advancing an execution
//! loads its record, runs interpreter steps until it suspends or finishes,
//! and persists the record plus a step log after every step. Suspended
//! executions hold no memory: a timer scan (`fire_due_timers`) re-queues
//! them once their `resume_at` passes, and a Map parent is re-queued by its
//! last item. Advancing one execution is serialized by a per-execution lock;
//! different executions advance concurrently on a `JoinSet`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use idprov_types::config::EngineConfig;
use idprov_types::error::{kinds, ErrorInfo};
use idprov_types::event::ExecutionEvent;
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog};
use idprov_types::trigger::TriggerEvent;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::activity::{ActivityGateway, ActivityRegistry};
use super::checkpoint::{CheckpointError, CheckpointManager};
use super::clock::{Clock, ManualClock, SystemClock};
use super::definition::{DefinitionError, Workflow};
use super::document;
use super::interpreter::{spawn_items, Interpreter, StepResult};
use super::map::{self, ItemOutcome, MapStatus};
use crate::event::bus::EventBus;
use crate::repository::execution::ExecutionRepository;

/// Most timers fired by a single scan.
const TIMER_BATCH: u32 = 500;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("execution {execution_id} is positioned at unknown state '{state}'")]
    UnknownState { execution_id: Uuid, state: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles an `Engine`, checking that every activity the workflow uses is
/// registered.
pub struct EngineBuilder<R: ExecutionRepository> {
    workflow: Workflow,
    repo: R,
    registry: ActivityRegistry,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl<R: ExecutionRepository + 'static> EngineBuilder<R> {
    pub fn new(workflow: Workflow, repo: R, registry: ActivityRegistry) -> Self {
        Self {
            workflow,
            repo,
            registry,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            event_bus: EventBus::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn build(self) -> Result<Engine<R>, EngineError> {
        self.workflow.ensure_activities(&self.registry)?;
        let default_timeout = Duration::from_secs(self.config.activity_timeout_secs);
        Ok(Engine {
            inner: Arc::new(Inner {
                workflow: self.workflow,
                checkpoint: CheckpointManager::new(self.repo),
                gateway: ActivityGateway::new(self.registry, default_timeout),
                clock: self.clock,
                config: self.config,
                event_bus: self.event_bus,
                ready: Mutex::new(VecDeque::new()),
                locks: DashMap::new(),
                wake: Notify::new(),
            }),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Inner<R: ExecutionRepository> {
    workflow: Workflow,
    checkpoint: CheckpointManager<R>,
    gateway: ActivityGateway,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    event_bus: EventBus,
    ready: Mutex<VecDeque<Uuid>>,
    /// One async lock per execution being advanced or folded into.
    locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    wake: Notify,
}

/// Cheaply cloneable handle to the execution engine.
pub struct Engine<R: ExecutionRepository> {
    inner: Arc<Inner<R>>,
}

impl<R: ExecutionRepository> Clone for Engine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: ExecutionRepository + 'static> Engine<R> {
    pub fn workflow(&self) -> &Workflow {
        &self.inner.workflow
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn repository(&self) -> &R {
        self.inner.checkpoint.repo()
    }

    // -----------------------------------------------------------------------
    // Starting executions
    // -----------------------------------------------------------------------

    /// Persist a new top-level execution and queue it.
    pub async fn start(&self, input: Value) -> Result<Uuid, EngineError> {
        if !input.is_object() {
            return Err(EngineError::InvalidInput(
                "execution input must be a JSON object".to_string(),
            ));
        }
        document::check_size(&input).map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let workflow = &self.inner.workflow;
        let now = self.inner.clock.now();
        let timeout_secs = workflow
            .timeout_secs()
            .unwrap_or(self.inner.config.execution_timeout_secs);
        let timeout = chrono::Duration::seconds(i64::try_from(timeout_secs).unwrap_or(i64::MAX));
        let deadline = now.checked_add_signed(timeout).unwrap_or(now);

        let record = ExecutionRecord::new(workflow.name(), workflow.root().start_at(), input, now, deadline);
        self.inner.checkpoint.create(&record).await?;

        tracing::info!(
            execution_id = %record.id,
            workflow = workflow.name(),
            deadline = %deadline,
            "execution started"
        );
        self.publish(ExecutionEvent::ExecutionStarted {
            execution_id: record.id,
            workflow_name: record.workflow_name.clone(),
            parent_id: None,
        });
        self.enqueue(record.id);
        Ok(record.id)
    }

    /// Start an execution from a lifecycle event.
    pub async fn start_event(&self, event: &TriggerEvent) -> Result<Uuid, EngineError> {
        let document = event
            .to_document()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;
        self.start(document).await
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Advance every queued execution until none is runnable.
    ///
    /// Executions that suspend on a timer stay suspended; call
    /// `fire_due_timers` to wake them. Returns the number of advances and
    /// the first error encountered, after all work has drained.
    pub async fn run_until_idle(&self) -> Result<usize, EngineError> {
        let mut tasks = JoinSet::new();
        let mut advanced = 0;
        let mut first_error = None;
        loop {
            self.spawn_ready(&mut tasks);
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            advanced += 1;
            if let Some(e) = Self::log_joined(joined) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(advanced),
        }
    }

    /// Drive everything to completion against a manual clock, jumping the
    /// clock to each pending timer instead of waiting for it.
    pub async fn run_to_completion(&self, clock: &ManualClock) -> Result<(), EngineError> {
        loop {
            self.run_until_idle().await?;
            match self.inner.checkpoint.next_resume_at().await? {
                Some(at) => {
                    clock.set(at);
                    self.fire_due_timers().await?;
                }
                None => return Ok(()),
            }
        }
    }

    /// Re-queue suspended executions whose timer has passed.
    pub async fn fire_due_timers(&self) -> Result<usize, EngineError> {
        let now = self.inner.clock.now();
        let due = self.inner.checkpoint.due(now, TIMER_BATCH).await?;
        let mut fired = 0;
        for id in due {
            let lock = self.lock_for(id);
            let _guard = lock.lock().await;
            let mut record = self.inner.checkpoint.load(id).await?;
            let is_due = record.status == ExecutionStatus::Suspended
                && record.resume_at.is_some_and(|at| at <= now);
            if !is_due {
                continue;
            }
            record.status = ExecutionStatus::Running;
            record.resume_at = None;
            record.updated_at = now;
            self.inner.checkpoint.save(&record).await?;

            tracing::debug!(execution_id = %id, state = %record.current_state, "timer fired");
            self.publish(ExecutionEvent::ExecutionResumed {
                execution_id: id,
                state: record.current_state.clone(),
            });
            self.enqueue(id);
            fired += 1;
        }
        Ok(fired)
    }

    /// Re-queue executions a previous process left mid-flight, and fold in
    /// Map items that finished without their parent hearing about it.
    pub async fn recover(&self) -> Result<usize, EngineError> {
        let running = self.inner.checkpoint.running().await?;
        for id in &running {
            self.enqueue(*id);
        }

        let suspended = self
            .repository()
            .list_by_status(ExecutionStatus::Suspended)
            .await
            .map_err(|e| CheckpointError::Repository(e.to_string()))?;
        let mut folded = 0;
        for parent in suspended {
            let Some(progress) = &parent.map else {
                continue;
            };
            for child_id in progress.in_flight.values() {
                let child = self.inner.checkpoint.load(*child_id).await?;
                if child.status.is_terminal() {
                    self.fold_child(&child).await?;
                    folded += 1;
                }
            }
        }

        tracing::info!(requeued = running.len(), folded, "recovered executions");
        Ok(running.len() + folded)
    }

    /// Long-running worker: fires timers, advances queued executions and
    /// stops when `shutdown` is cancelled.
    ///
    /// Advances still in flight at shutdown are aborted; their executions
    /// remain `Running` and are picked up by `recover` on the next start.
    pub async fn run_worker(&self, shutdown: CancellationToken) -> Result<(), EngineError> {
        self.worker_loop(shutdown, None).await.map(|_| ())
    }

    /// Like `run_worker`, but returns once execution `id` is terminal.
    pub async fn run_until_finished(
        &self,
        id: Uuid,
        shutdown: CancellationToken,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        self.worker_loop(shutdown, Some(id)).await
    }

    async fn worker_loop(
        &self,
        shutdown: CancellationToken,
        watch: Option<Uuid>,
    ) -> Result<Option<ExecutionRecord>, EngineError> {
        self.recover().await?;
        let interval = Duration::from_millis(self.inner.config.timer_poll_interval_ms.max(10));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        tracing::info!(poll_ms = interval.as_millis() as u64, "engine worker started");
        let finished = loop {
            self.spawn_ready(&mut tasks);
            tokio::select! {
                _ = shutdown.cancelled() => break None,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::log_joined(joined);
                    if let Some(id) = watch {
                        let record = self.inner.checkpoint.load(id).await?;
                        if record.status.is_terminal() {
                            break Some(record);
                        }
                    }
                }
                _ = self.inner.wake.notified() => {}
                _ = ticker.tick() => {
                    if let Err(e) = self.fire_due_timers().await {
                        tracing::warn!(error = %e, "timer scan failed");
                    }
                }
            }
        };

        tasks.abort_all();
        tracing::info!("engine worker stopped");
        Ok(finished)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn execution(&self, id: Uuid) -> Result<ExecutionRecord, EngineError> {
        Ok(self.inner.checkpoint.load(id).await?)
    }

    pub async fn step_logs(&self, id: Uuid) -> Result<Vec<StepLog>, EngineError> {
        Ok(self.inner.checkpoint.step_logs(id).await?)
    }

    pub async fn children(&self, id: Uuid) -> Result<Vec<ExecutionRecord>, EngineError> {
        self.repository()
            .list_children(&id)
            .await
            .map_err(|e| EngineError::Checkpoint(CheckpointError::Repository(e.to_string())))
    }

    pub async fn list(&self, limit: u32) -> Result<Vec<ExecutionRecord>, EngineError> {
        self.repository()
            .list_executions(limit)
            .await
            .map_err(|e| EngineError::Checkpoint(CheckpointError::Repository(e.to_string())))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn publish(&self, event: ExecutionEvent) {
        self.inner.event_bus.publish(event);
    }

    fn enqueue(&self, id: Uuid) {
        self.inner
            .ready
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(id);
        self.inner.wake.notify_one();
    }

    fn pop_ready(&self) -> Option<Uuid> {
        self.inner
            .ready
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }

    fn spawn_ready(&self, tasks: &mut JoinSet<Result<(), (Uuid, EngineError)>>) {
        while let Some(id) = self.pop_ready() {
            let engine = self.clone();
            tasks.spawn(async move { engine.advance(id).await.map_err(|e| (id, e)) });
        }
    }

    /// Log the result of one advance task, returning its error if any.
    fn log_joined(
        joined: Result<Result<(), (Uuid, EngineError)>, tokio::task::JoinError>,
    ) -> Option<EngineError> {
        match joined {
            Ok(Ok(())) => None,
            Ok(Err((id, e))) => {
                tracing::error!(execution_id = %id, error = %e, "advancing execution failed");
                Some(e)
            }
            Err(e) => {
                tracing::error!(error = %e, "advance task panicked or was cancelled");
                None
            }
        }
    }

    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Step one execution until it suspends or finishes.
    async fn advance(&self, id: Uuid) -> Result<(), EngineError> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let mut record = self.inner.checkpoint.load(id).await?;
        if record.status != ExecutionStatus::Running {
            return Ok(());
        }

        let interpreter = Interpreter {
            workflow: &self.inner.workflow,
            gateway: &self.inner.gateway,
            clock: self.inner.clock.as_ref(),
            default_concurrency: self.inner.config.map_concurrency as usize,
        };

        loop {
            let step = interpreter.step(&mut record).await?;
            let now = self.inner.clock.now();
            record.updated_at = now;

            // Items are persisted before the parent records them as in flight.
            if let StepResult::FannedOut(children) = &step.result {
                for child in children {
                    self.inner.checkpoint.create(child).await?;
                }
            }
            self.inner.checkpoint.save(&record).await?;
            self.inner
                .checkpoint
                .log_step(
                    record.id,
                    &step.state,
                    step.attempt,
                    step.outcome,
                    step.error.clone(),
                    step.delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    now,
                )
                .await?;
            for event in step.events {
                self.publish(event);
            }

            match step.result {
                StepResult::Continue => continue,
                StepResult::Suspended => {
                    self.publish(ExecutionEvent::ExecutionSuspended {
                        execution_id: record.id,
                        state: record.current_state.clone(),
                        resume_in_ms: record
                            .resume_at
                            .and_then(|at| (at - now).to_std().ok())
                            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                    });
                    break;
                }
                StepResult::FannedOut(children) => {
                    for child in &children {
                        self.publish(ExecutionEvent::ExecutionStarted {
                            execution_id: child.id,
                            workflow_name: child.workflow_name.clone(),
                            parent_id: Some(record.id),
                        });
                        self.enqueue(child.id);
                    }
                    break;
                }
                StepResult::Finished => {
                    drop(guard);
                    self.inner.locks.remove(&id);
                    self.on_finished(&record).await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn on_finished(&self, record: &ExecutionRecord) -> Result<(), EngineError> {
        self.publish(ExecutionEvent::ExecutionCompleted {
            execution_id: record.id,
            status: record.status,
            error: record.error.clone(),
        });

        if record.parent.is_some() {
            return self.fold_child(record).await;
        }

        match &record.error {
            None => tracing::info!(
                execution_id = %record.id,
                status = %record.status,
                "execution finished"
            ),
            Some(error) => tracing::warn!(
                execution_id = %record.id,
                status = %record.status,
                error = %error,
                "execution finished"
            ),
        }
        Ok(())
    }

    /// Report a finished Map item to its parent.
    async fn fold_child(&self, child: &ExecutionRecord) -> Result<(), EngineError> {
        let Some(link) = &child.parent else {
            return Ok(());
        };
        let parent_id = link.execution_id;
        let lock = self.lock_for(parent_id);
        let _guard = lock.lock().await;

        let mut parent = self.inner.checkpoint.load(parent_id).await?;
        let Some(mut progress) = parent.map.take() else {
            tracing::debug!(
                execution_id = %parent_id,
                item_execution_id = %child.id,
                "map already finished; ignoring item"
            );
            return Ok(());
        };
        if progress.instance != link.map_instance {
            return Ok(());
        }

        let succeeded = child.status == ExecutionStatus::Succeeded;
        let outcome = if succeeded {
            ItemOutcome::Succeeded(child.document.clone())
        } else {
            ItemOutcome::Failed(child.error.clone().unwrap_or_else(|| {
                ErrorInfo::new(kinds::TASK_FAILED, "map item ended without an error")
            }))
        };
        if !map::record_finished(&mut progress, link.item_index, outcome) {
            return Ok(());
        }
        self.publish(ExecutionEvent::MapItemFinished {
            execution_id: parent_id,
            item_execution_id: child.id,
            item_index: link.item_index,
            succeeded,
        });

        let now = self.inner.clock.now();
        let children = match map::status(&progress) {
            MapStatus::Running => spawn_items(&self.inner.workflow, &parent, &mut progress, now)?,
            MapStatus::Succeeded(_) | MapStatus::Failed(_) => {
                parent.status = ExecutionStatus::Running;
                Vec::new()
            }
        };
        parent.map = Some(progress);
        parent.updated_at = now;

        for item in &children {
            self.inner.checkpoint.create(item).await?;
        }
        self.inner.checkpoint.save(&parent).await?;

        for item in &children {
            if let Some(item_link) = &item.parent {
                self.publish(ExecutionEvent::MapItemStarted {
                    execution_id: parent_id,
                    item_execution_id: item.id,
                    item_index: item_link.item_index,
                });
            }
            self.publish(ExecutionEvent::ExecutionStarted {
                execution_id: item.id,
                workflow_name: item.workflow_name.clone(),
                parent_id: Some(parent_id),
            });
            self.enqueue(item.id);
        }
        if parent.status == ExecutionStatus::Running {
            self.enqueue(parent_id);
        }
        Ok(())
    }
}
