//! Single-step state interpreter.
//!
//! `Interpreter::step` executes the current state of one execution and
//! mutates its record in place: the document, the current state, the retry
//! counters and the status. It never touches storage; the engine persists
//! the record and the returned `Step` after every call.

use std::time::Duration;

use chrono::{DateTime, Utc};
use idprov_types::error::{kinds, ErrorInfo};
use idprov_types::event::ExecutionEvent;
use idprov_types::execution::{ExecutionRecord, ExecutionStatus, MapProgress, ParentLink, StepOutcome};
use idprov_types::workflow::{
    ChoiceDefault, ChoiceState, FailState, MapState, PassState, StateKind, TaskState, WaitState,
};
use serde_json::Value;

use super::activity::{ActivityError, ActivityGateway, ActivityRequest};
use super::checkpoint::idempotency_key;
use super::clock::Clock;
use super::definition::{CompiledGraph, Workflow};
use super::document::{self, DocumentError};
use super::engine::EngineError;
use super::expression::evaluate_condition;
use super::map::{self, MapStatus};
use super::policy::{route_catch, route_failure, Route};

/// How the engine should continue after a step.
#[derive(Debug)]
pub enum StepResult {
    /// The execution moved to another state; step again.
    Continue,
    /// Waiting on a timer or on Map items.
    Suspended,
    /// A Map state started these item executions; the parent is suspended.
    FannedOut(Vec<ExecutionRecord>),
    /// The execution reached a terminal status.
    Finished,
}

/// Outcome of one interpreter step, for the step log and the event bus.
#[derive(Debug)]
pub struct Step {
    pub state: String,
    pub attempt: u32,
    pub outcome: StepOutcome,
    pub error: Option<ErrorInfo>,
    pub delay: Option<Duration>,
    pub events: Vec<ExecutionEvent>,
    pub result: StepResult,
}

impl Step {
    fn new(state: &str, attempt: u32, outcome: StepOutcome, result: StepResult) -> Self {
        Self {
            state: state.to_string(),
            attempt,
            outcome,
            error: None,
            delay: None,
            events: Vec::new(),
            result,
        }
    }
}

pub struct Interpreter<'a> {
    pub workflow: &'a Workflow,
    pub gateway: &'a ActivityGateway,
    pub clock: &'a dyn Clock,
    /// Map concurrency when the state declares none.
    pub default_concurrency: usize,
}

impl Interpreter<'_> {
    /// Execute the current state of `record`.
    pub async fn step(&self, record: &mut ExecutionRecord) -> Result<Step, EngineError> {
        let now = self.clock.now();
        let state_id = record.current_state.clone();

        if now >= record.deadline {
            let error = ErrorInfo::new(
                kinds::EXECUTION_TIMEOUT,
                format!("execution exceeded its deadline of {}", record.deadline.to_rfc3339()),
            );
            return Ok(self.finish_failed(record, &state_id, record.task_attempt, error, now));
        }

        let graph = self
            .workflow
            .graph(&record.scope)
            .ok_or_else(|| EngineError::UnknownState {
                execution_id: record.id,
                state: state_id.clone(),
            })?;
        let state = graph.state(&state_id).ok_or_else(|| EngineError::UnknownState {
            execution_id: record.id,
            state: state_id.clone(),
        })?;

        let step = match &state.kind {
            StateKind::Task(task) => self.task(graph, record, &state_id, task, now).await,
            StateKind::Choice(choice) => self.choice(graph, record, &state_id, choice, now),
            StateKind::Map(map) => self.map(graph, record, &state_id, map, now)?,
            StateKind::Wait(wait) => self.wait(graph, record, &state_id, wait, now),
            StateKind::Pass(pass) => self.pass(graph, record, &state_id, pass, now),
            StateKind::Succeed => {
                record.status = ExecutionStatus::Succeeded;
                record.completed_at = Some(now);
                record.resume_at = None;
                Step::new(&state_id, 0, StepOutcome::Succeeded, StepResult::Finished)
            }
            StateKind::Fail(fail) => {
                let error = fail_error(fail, &record.document);
                self.finish_failed(record, &state_id, 0, error, now)
            }
        };
        Ok(step)
    }

    // -----------------------------------------------------------------------
    // Task
    // -----------------------------------------------------------------------

    async fn task(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        task: &TaskState,
        now: DateTime<Utc>,
    ) -> Step {
        if record.task_attempt == 0 {
            if let Some(max) = task.max_visits {
                let visits = record.visits_to(state_id);
                if visits > max {
                    let error = ErrorInfo::new(
                        kinds::RELAUNCH_LIMIT_EXCEEDED,
                        format!("state '{state_id}' entered {visits} times; the limit is {max}"),
                    );
                    let route = route_catch(&task.catch, &error);
                    return self.apply_route(graph, record, state_id, 0, error, route, now);
                }
            }
        }

        record.task_attempt += 1;
        let attempt = record.task_attempt;

        let payload = match &task.parameters {
            Some(template) => document::render(template, &record.document, None),
            None => Ok(record.document.clone()),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                let error = e.to_error_info();
                let route = route_catch(&task.catch, &error);
                return self.apply_route(graph, record, state_id, attempt, error, route, now);
            }
        };

        let request = ActivityRequest {
            execution_id: record.id,
            state: state_id.to_string(),
            attempt,
            idempotency_key: idempotency_key(record.id, state_id, attempt),
            payload,
        };
        let budget = (record.deadline - now).to_std().unwrap_or(Duration::ZERO);
        let timeout = task.timeout_secs.map(Duration::from_secs);
        let invocation = self.gateway.invoke(&task.activity, request, timeout);
        let result = match tokio::time::timeout(budget, invocation).await {
            Ok(result) => result,
            Err(_) => Err(ActivityError::new(
                kinds::EXECUTION_TIMEOUT,
                format!("execution deadline reached while '{state_id}' was running"),
            )),
        };

        match result {
            Ok(response) => {
                let shaped = match &task.result_selector {
                    Some(selector) => document::render(selector, &response, None),
                    None => Ok(response),
                };
                let applied = shaped.and_then(|value| {
                    let mut doc = record.document.clone();
                    document::write(&mut doc, &task.result_path, value)?;
                    document::check_size(&doc)?;
                    Ok(doc)
                });
                match applied {
                    Ok(doc) => {
                        record.document = doc;
                        tracing::debug!(
                            execution_id = %record.id,
                            state = state_id,
                            attempt,
                            "task completed"
                        );
                        let mut step = Step::new(state_id, attempt, StepOutcome::Completed, StepResult::Continue);
                        self.enter(graph, record, &task.next, &mut step.events);
                        step
                    }
                    Err(e) => {
                        let error = e.to_error_info();
                        let route = route_catch(&task.catch, &error);
                        self.apply_route(graph, record, state_id, attempt, error, route, now)
                    }
                }
            }
            Err(e) => {
                let error = e.into_error_info();
                tracing::info!(
                    execution_id = %record.id,
                    state = state_id,
                    attempt,
                    error = %error,
                    "task failed"
                );
                let route = route_failure(&task.retry, &task.catch, &error, &record.retry_counts);
                self.apply_route(graph, record, state_id, attempt, error, route, now)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Choice / Wait / Pass
    // -----------------------------------------------------------------------

    fn choice(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        choice: &ChoiceState,
        now: DateTime<Utc>,
    ) -> Step {
        let mut chosen: Option<&str> = None;
        for branch in &choice.branches {
            match evaluate_condition(&branch.condition, &record.document) {
                Ok(true) => {
                    chosen = Some(branch.next.as_str());
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    let error = ErrorInfo::new(kinds::EXPRESSION_FAILED, e.to_string());
                    let route = route_catch(&choice.catch, &error);
                    return self.apply_route(graph, record, state_id, 0, error, route, now);
                }
            }
        }

        let next = match (chosen, &choice.default) {
            (Some(next), _) => next,
            (None, Some(ChoiceDefault::Next(next))) => next.as_str(),
            (None, _) => {
                let error = ErrorInfo::new(kinds::UNHANDLED_CHOICE, kinds::UNHANDLED_CHOICE_CAUSE);
                let route = route_catch(&choice.catch, &error);
                return self.apply_route(graph, record, state_id, 0, error, route, now);
            }
        };

        let mut step = Step::new(state_id, 0, StepOutcome::Completed, StepResult::Continue);
        self.enter(graph, record, next, &mut step.events);
        step
    }

    fn wait(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        wait: &WaitState,
        now: DateTime<Utc>,
    ) -> Step {
        if record.task_attempt == 0 && wait.seconds > 0 {
            record.task_attempt = 1;
            let delay = Duration::from_secs(wait.seconds);
            self.suspend_for(record, delay, now);
            let mut step = Step::new(state_id, 0, StepOutcome::Waiting, StepResult::Suspended);
            step.delay = Some(delay);
            return step;
        }

        let mut step = Step::new(state_id, 0, StepOutcome::Completed, StepResult::Continue);
        self.enter(graph, record, &wait.next, &mut step.events);
        step
    }

    fn pass(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        pass: &PassState,
        now: DateTime<Utc>,
    ) -> Step {
        let value = match (&pass.result, &pass.parameters) {
            (Some(result), _) => Ok(result.clone()),
            (None, Some(parameters)) => document::render(parameters, &record.document, None),
            (None, None) => Ok(record.document.clone()),
        };
        let applied = value.and_then(|value| {
            let mut doc = record.document.clone();
            document::write(&mut doc, &pass.result_path, value)?;
            if let Some(output) = &pass.output_path {
                doc = document::narrow(&doc, output)?;
            }
            document::check_size(&doc)?;
            Ok(doc)
        });

        match applied {
            Ok(doc) => {
                record.document = doc;
                let mut step = Step::new(state_id, 0, StepOutcome::Completed, StepResult::Continue);
                self.enter(graph, record, &pass.next, &mut step.events);
                step
            }
            Err(e) => self.finish_failed(record, state_id, 0, e.to_error_info(), now),
        }
    }

    // -----------------------------------------------------------------------
    // Map
    // -----------------------------------------------------------------------

    fn map(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        map: &MapState,
        now: DateTime<Utc>,
    ) -> Result<Step, EngineError> {
        let Some(progress) = record.map.take() else {
            return self.enter_map(graph, record, state_id, map, now);
        };

        let step = match map::status(&progress) {
            MapStatus::Running => {
                // Woken while items are still running: keep waiting.
                record.map = Some(progress);
                record.status = ExecutionStatus::Suspended;
                Step::new(state_id, 0, StepOutcome::Waiting, StepResult::Suspended)
            }
            MapStatus::Succeeded(results) => {
                let mut doc = record.document.clone();
                let applied = document::write(&mut doc, &map.result_path, Value::Array(results))
                    .map_err(DocumentError::from)
                    .and_then(|()| document::check_size(&doc));
                match applied {
                    Ok(()) => {
                        record.document = doc;
                        let mut step =
                            Step::new(state_id, 0, StepOutcome::Completed, StepResult::Continue);
                        self.enter(graph, record, &map.next, &mut step.events);
                        step
                    }
                    Err(e) => {
                        let error = e.to_error_info();
                        let route = route_catch(&map.catch, &error);
                        self.apply_route(graph, record, state_id, 0, error, route, now)
                    }
                }
            }
            MapStatus::Failed(failure) => {
                tracing::info!(
                    execution_id = %record.id,
                    state = state_id,
                    item_index = failure.item_index,
                    error = %failure.error,
                    "map item failed"
                );
                let route = route_catch(&map.catch, &failure.error);
                let error = match route {
                    Route::Propagate if !failure.error.is_fatal() => {
                        ErrorInfo::new(kinds::MAP_FAILED, failure.error.cause)
                    }
                    _ => failure.error,
                };
                self.apply_route(graph, record, state_id, 0, error, route, now)
            }
        };
        Ok(step)
    }

    fn enter_map(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        map: &MapState,
        now: DateTime<Utc>,
    ) -> Result<Step, EngineError> {
        let seeds = match map::seed_items(map, &record.document) {
            Ok(seeds) => seeds,
            Err(e) => {
                let error = e.to_error_info();
                let route = route_catch(&map.catch, &error);
                return Ok(self.apply_route(graph, record, state_id, 0, error, route, now));
            }
        };

        if seeds.is_empty() {
            if let Err(e) = document::write(&mut record.document, &map.result_path, Value::Array(Vec::new())) {
                let error = ErrorInfo::new(e.kind(), e.to_string());
                let route = route_catch(&map.catch, &error);
                return Ok(self.apply_route(graph, record, state_id, 0, error, route, now));
            }
            let mut step = Step::new(state_id, 0, StepOutcome::Completed, StepResult::Continue);
            self.enter(graph, record, &map.next, &mut step.events);
            return Ok(step);
        }

        let concurrency = map
            .max_concurrency
            .map(|c| c as usize)
            .unwrap_or(self.default_concurrency);
        let mut progress = map::plan(state_id, seeds, concurrency);
        let children = spawn_items(self.workflow, record, &mut progress, now)?;

        tracing::info!(
            execution_id = %record.id,
            state = state_id,
            items = progress.items.len(),
            concurrency,
            "map fanned out"
        );

        let mut step = Step::new(state_id, 0, StepOutcome::FannedOut, StepResult::Suspended);
        step.events = children
            .iter()
            .filter_map(|child| {
                child.parent.as_ref().map(|link| ExecutionEvent::MapItemStarted {
                    execution_id: record.id,
                    item_execution_id: child.id,
                    item_index: link.item_index,
                })
            })
            .collect();
        step.result = StepResult::FannedOut(children);

        record.map = Some(progress);
        record.status = ExecutionStatus::Suspended;
        record.resume_at = None;
        Ok(step)
    }

    // -----------------------------------------------------------------------
    // Shared transitions
    // -----------------------------------------------------------------------

    fn enter(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        next: &str,
        events: &mut Vec<ExecutionEvent>,
    ) {
        record.enter(next);
        events.push(ExecutionEvent::StateEntered {
            execution_id: record.id,
            state: next.to_string(),
            state_type: graph
                .state(next)
                .map(|s| s.kind.type_name())
                .unwrap_or("unknown")
                .to_string(),
        });
    }

    /// Suspend until `now + delay`, never past the execution deadline.
    fn suspend_for(&self, record: &mut ExecutionRecord, delay: Duration, now: DateTime<Utc>) {
        let resume_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(record.deadline)
            .min(record.deadline);
        record.resume_at = Some(resume_at);
        record.status = ExecutionStatus::Suspended;
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_route(
        &self,
        graph: &CompiledGraph,
        record: &mut ExecutionRecord,
        state_id: &str,
        attempt: u32,
        error: ErrorInfo,
        route: Route<'_>,
        now: DateTime<Utc>,
    ) -> Step {
        match route {
            Route::Retry { rule, delay } => {
                *record.retry_counts.entry(rule).or_insert(0) += 1;
                self.suspend_for(record, delay, now);
                tracing::info!(
                    execution_id = %record.id,
                    state = state_id,
                    attempt,
                    delay_ms = duration_ms(delay),
                    error = %error,
                    "retry scheduled"
                );
                let mut step = Step::new(state_id, attempt, StepOutcome::RetryScheduled, StepResult::Suspended);
                step.delay = Some(delay);
                step.events.push(ExecutionEvent::RetryScheduled {
                    execution_id: record.id,
                    state: state_id.to_string(),
                    attempt,
                    delay_ms: duration_ms(delay),
                    error: error.clone(),
                });
                step.error = Some(error);
                step
            }
            Route::Catch { next, result_path } => {
                if let Err(e) = document::write(&mut record.document, result_path, error.to_value()) {
                    let write_error = ErrorInfo::new(e.kind(), e.to_string());
                    return self.finish_failed(record, state_id, attempt, write_error, now);
                }
                tracing::info!(
                    execution_id = %record.id,
                    state = state_id,
                    next,
                    error = %error,
                    "failure caught"
                );
                let mut step = Step::new(state_id, attempt, StepOutcome::Caught, StepResult::Continue);
                step.events.push(ExecutionEvent::FailureCaught {
                    execution_id: record.id,
                    state: state_id.to_string(),
                    next: next.to_string(),
                    error: error.clone(),
                });
                step.error = Some(error);
                self.enter(graph, record, next, &mut step.events);
                step
            }
            Route::Propagate => self.finish_failed(record, state_id, attempt, error, now),
        }
    }

    fn finish_failed(
        &self,
        record: &mut ExecutionRecord,
        state_id: &str,
        attempt: u32,
        error: ErrorInfo,
        now: DateTime<Utc>,
    ) -> Step {
        record.status = if error.error == kinds::EXECUTION_TIMEOUT {
            ExecutionStatus::TimedOut
        } else {
            ExecutionStatus::Failed
        };
        record.error = Some(error.clone());
        record.completed_at = Some(now);
        record.resume_at = None;
        record.map = None;
        let mut step = Step::new(state_id, attempt, StepOutcome::Failed, StepResult::Finished);
        step.error = Some(error);
        step
    }
}

/// Create item executions for every item that may start now.
pub(crate) fn spawn_items(
    workflow: &Workflow,
    parent: &ExecutionRecord,
    progress: &mut MapProgress,
    now: DateTime<Utc>,
) -> Result<Vec<ExecutionRecord>, EngineError> {
    let mut scope = parent.scope.clone();
    scope.push(progress.state.clone());
    let iterator = workflow.graph(&scope).ok_or_else(|| EngineError::UnknownState {
        execution_id: parent.id,
        state: progress.state.clone(),
    })?;

    let mut children = Vec::new();
    for (index, seed) in map::take_startable(progress) {
        let mut child = ExecutionRecord::new(
            parent.workflow_name.clone(),
            iterator.start_at(),
            seed,
            now,
            parent.deadline,
        );
        child.parent = Some(ParentLink {
            execution_id: parent.id,
            map_state: progress.state.clone(),
            map_instance: progress.instance,
            item_index: index,
        });
        child.scope = scope.clone();
        map::record_started(progress, index, child.id);
        children.push(child);
    }
    Ok(children)
}

/// Error raised by a Fail state.
fn fail_error(fail: &FailState, doc: &Value) -> ErrorInfo {
    let from_path = |path: &Option<idprov_types::path::DocPath>| {
        path.as_ref()
            .and_then(|p| document::read(doc, p).ok())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    };
    let error = from_path(&fail.error_path)
        .or_else(|| fail.error.clone())
        .unwrap_or_else(|| kinds::STATE_FAILED.to_string());
    let cause = from_path(&fail.cause_path)
        .or_else(|| fail.cause.clone())
        .unwrap_or_default();
    ErrorInfo::new(error, cause)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
