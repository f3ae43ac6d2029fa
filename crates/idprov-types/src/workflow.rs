//! Workflow definition model.
//!
//! A `WorkflowDefinition` is an immutable graph of named states. Each state
//! is one of Task, Choice, Map, Wait, Pass, Succeed or Fail. Definitions are
//! plain data (YAML/JSON via serde); idprov-core validates them into an
//! executable graph before any execution starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::kinds;
use crate::path::DocPath;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow: a top-level state graph plus execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    /// Semantic version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hard wall-clock budget for one execution, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Paths the triggering event is guaranteed to carry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_paths: Vec<DocPath>,
    #[serde(flatten)]
    pub graph: StateGraph,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// A start state plus the states reachable from it.
///
/// Used for the top-level workflow and for every Map iterator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateGraph {
    pub start_at: String,
    pub states: Vec<StateDefinition>,
}

/// A single named state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefinition {
    /// Unique within its graph.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub kind: StateKind,
}

/// State variants, internally tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateKind {
    Task(TaskState),
    Choice(ChoiceState),
    Map(MapState),
    Wait(WaitState),
    Pass(PassState),
    Succeed,
    Fail(FailState),
}

impl StateKind {
    /// Short variant name for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            StateKind::Task(_) => "task",
            StateKind::Choice(_) => "choice",
            StateKind::Map(_) => "map",
            StateKind::Wait(_) => "wait",
            StateKind::Pass(_) => "pass",
            StateKind::Succeed => "succeed",
            StateKind::Fail(_) => "fail",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateKind::Succeed | StateKind::Fail(_))
    }

    /// Every state id this state can transition to, including Catch fallbacks.
    pub fn successors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = match self {
            StateKind::Task(task) => vec![task.next.as_str()],
            StateKind::Choice(choice) => {
                let mut out: Vec<&str> = choice.branches.iter().map(|b| b.next.as_str()).collect();
                if let Some(ChoiceDefault::Next(next)) = &choice.default {
                    out.push(next.as_str());
                }
                out
            }
            StateKind::Map(map) => vec![map.next.as_str()],
            StateKind::Wait(wait) => vec![wait.next.as_str()],
            StateKind::Pass(pass) => vec![pass.next.as_str()],
            StateKind::Succeed | StateKind::Fail(_) => Vec::new(),
        };
        out.extend(self.catch_rules().iter().map(|r| r.next.as_str()));
        out
    }

    /// Catch rules declared on this state (empty for variants without any).
    pub fn catch_rules(&self) -> &[CatchRule] {
        match self {
            StateKind::Task(task) => &task.catch,
            StateKind::Choice(choice) => &choice.catch,
            StateKind::Map(map) => &map.catch,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Invokes one registered activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    /// Registered activity name.
    pub activity: String,
    /// Request payload built from the document. `None` sends the whole document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Template>,
    /// Reshapes the activity response before it is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<Template>,
    #[serde(default)]
    pub result_path: ResultPath,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry: Vec<RetryRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchRule>,
    /// Per-invocation timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Maximum number of entries into this state within one execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_visits: Option<u32>,
    pub next: String,
}

// ---------------------------------------------------------------------------
// Choice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
    /// Evaluated in declaration order; the first true branch wins.
    pub branches: Vec<ChoiceBranch>,
    /// Required. A missing default is rejected when the definition is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ChoiceDefault>,
    /// Routes the structural `UnhandledChoice` failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceBranch {
    pub condition: Condition,
    pub next: String,
}

/// What happens when no branch matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoiceDefault {
    /// Transition to the named state.
    Next(String),
    /// Fail with the structural `UnhandledChoice` kind.
    Unhandled,
}

/// Predicate over the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    StringEquals { path: DocPath, value: String },
    BooleanEquals { path: DocPath, value: bool },
    NumericEquals { path: DocPath, value: f64 },
    IsPresent { path: DocPath },
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    /// JEXL expression evaluated against the whole document.
    Expression { expr: String },
}

impl Condition {
    pub fn string_equals(path: DocPath, value: impl Into<String>) -> Self {
        Condition::StringEquals {
            path,
            value: value.into(),
        }
    }

    pub fn is_present(path: DocPath) -> Self {
        Condition::IsPresent { path }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And { conditions }
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

/// Runs `iterator` once per element of the array at `items_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    pub items_path: DocPath,
    /// Seeds each item document. `None` uses the raw item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_selector: Option<Template>,
    /// Concurrent item executions. `None` uses the engine default, `0` is unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    pub iterator: StateGraph,
    #[serde(default)]
    pub result_path: ResultPath,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<CatchRule>,
    pub next: String,
}

// ---------------------------------------------------------------------------
// Wait / Pass / Fail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitState {
    pub seconds: u64,
    pub next: String,
}

/// Pure document transform.
///
/// The written value is `result` if set, else the rendered `parameters`, else
/// the current document. `output_path` then narrows the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Template>,
    #[serde(default)]
    pub result_path: ResultPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<DocPath>,
    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Read the error kind from the document (overrides `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<DocPath>,
    /// Read the cause from the document (overrides `cause`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_path: Option<DocPath>,
}

// ---------------------------------------------------------------------------
// Result paths and templates
// ---------------------------------------------------------------------------

/// Where a state's result lands in the document.
///
/// Serialized as a path string, or `null` to discard the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Option<String>", into = "Option<String>")]
pub enum ResultPath {
    #[default]
    Discard,
    At(DocPath),
}

impl ResultPath {
    pub fn at(path: &str) -> Result<Self, crate::path::PathError> {
        DocPath::parse(path).map(ResultPath::At)
    }
}

impl TryFrom<Option<String>> for ResultPath {
    type Error = crate::path::PathError;

    fn try_from(value: Option<String>) -> Result<Self, Self::Error> {
        match value {
            None => Ok(ResultPath::Discard),
            Some(raw) => DocPath::parse(&raw).map(ResultPath::At),
        }
    }
}

impl From<ResultPath> for Option<String> {
    fn from(value: ResultPath) -> Self {
        match value {
            ResultPath::Discard => None,
            ResultPath::At(path) => Some(path.into()),
        }
    }
}

/// An object whose fields are computed from the document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(pub BTreeMap<String, TemplateValue>);

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: TemplateValue) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Whether any field (recursively) refers to the current Map item.
    pub fn uses_item(&self) -> bool {
        self.0.values().any(|v| match v {
            TemplateValue::Item => true,
            TemplateValue::Nested(inner) => inner.uses_item(),
            _ => false,
        })
    }

    /// Every document path the template reads.
    pub fn paths(&self) -> Vec<&DocPath> {
        let mut out = Vec::new();
        for value in self.0.values() {
            match value {
                TemplateValue::Path(p) | TemplateValue::JsonText(p) => out.push(p),
                TemplateValue::Format { args, .. } => out.extend(args.iter()),
                TemplateValue::Nested(inner) => out.extend(inner.paths()),
                TemplateValue::Value(_) | TemplateValue::Item => {}
            }
        }
        out
    }
}

/// One computed template field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateValue {
    /// Copy the value found at a path.
    Path(DocPath),
    /// A literal value.
    Value(Value),
    /// The current Map item (only valid in a Map `item_selector`).
    Item,
    /// Fill `{}` placeholders in order with the string form of each path.
    Format { template: String, args: Vec<DocPath> },
    /// Parse the JSON text found at a path.
    JsonText(DocPath),
    Nested(Template),
}

impl TemplateValue {
    pub fn path(raw: &str) -> Result<Self, crate::path::PathError> {
        DocPath::parse(raw).map(TemplateValue::Path)
    }
}

// ---------------------------------------------------------------------------
// Retry / Catch
// ---------------------------------------------------------------------------

/// Matches error kinds in Retry and Catch rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorMatcher {
    /// Matches any non-fatal kind.
    All,
    Kind(String),
}

impl ErrorMatcher {
    pub fn matches(&self, kind: &str) -> bool {
        if kinds::is_fatal(kind) {
            return false;
        }
        match self {
            ErrorMatcher::All => true,
            ErrorMatcher::Kind(k) => k == kind,
        }
    }
}

impl From<String> for ErrorMatcher {
    fn from(value: String) -> Self {
        if value == kinds::ALL || value == "States.ALL" {
            ErrorMatcher::All
        } else {
            ErrorMatcher::Kind(value)
        }
    }
}

impl From<&str> for ErrorMatcher {
    fn from(value: &str) -> Self {
        ErrorMatcher::from(value.to_string())
    }
}

impl From<ErrorMatcher> for String {
    fn from(value: ErrorMatcher) -> Self {
        match value {
            ErrorMatcher::All => kinds::ALL.to_string(),
            ErrorMatcher::Kind(k) => k,
        }
    }
}

/// Same-state re-attempt on a transient error.
///
/// `max_attempts` counts total invocations of one Task entry, so a value of
/// `N` allows `N - 1` retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryRule {
    pub errors: Vec<ErrorMatcher>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<u64>,
}

fn default_interval_secs() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_rate() -> f64 {
    2.0
}

impl RetryRule {
    pub fn new(errors: &[&str], interval_secs: u64, max_attempts: u32, backoff_rate: f64) -> Self {
        Self {
            errors: errors.iter().map(|e| ErrorMatcher::from(*e)).collect(),
            interval_secs,
            max_attempts,
            backoff_rate,
            max_delay_secs: None,
        }
    }

    pub fn with_max_delay(mut self, secs: u64) -> Self {
        self.max_delay_secs = Some(secs);
        self
    }

    pub fn matches(&self, kind: &str) -> bool {
        self.errors.iter().any(|m| m.matches(kind))
    }
}

/// Graph reroute on a permanent error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchRule {
    pub errors: Vec<ErrorMatcher>,
    pub next: String,
    /// Where the `{error, cause}` object is written.
    #[serde(default)]
    pub result_path: ResultPath,
}

impl CatchRule {
    pub fn new(errors: &[&str], next: impl Into<String>, result_path: ResultPath) -> Self {
        Self {
            errors: errors.iter().map(|e| ErrorMatcher::from(*e)).collect(),
            next: next.into(),
            result_path,
        }
    }

    pub fn matches(&self, kind: &str) -> bool {
        self.errors.iter().any(|m| m.matches(kind))
    }
}
