//! Workflow definition parsing, validation and compilation.
//!
//! Converts YAML/JSON into the `WorkflowDefinition` IR, then compiles it
//! into a `Workflow`: every state graph (top-level and Map iterators) is
//! indexed by id and checked before any execution starts. Checks cover
//! unique ids, dangling references, Choice defaults, reachability, template
//! shapes, and whether each Map's items path is guaranteed to exist on
//! every route into the Map.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use idprov_types::path::DocPath;
use idprov_types::workflow::{
    ChoiceDefault, ResultPath, RetryRule, StateDefinition, StateGraph, StateKind, Template,
    TemplateValue, WorkflowDefinition,
};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use petgraph::Direction;
use thiserror::Error;

use super::activity::ActivityRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or building a definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("duplicate state id '{0}'")]
    DuplicateState(String),

    #[error("state '{state}' refers to unknown state '{target}'")]
    UnknownState { state: String, target: String },

    #[error("choice state '{0}' has no default")]
    MissingChoiceDefault(String),

    #[error("state '{0}' is unreachable from the start state")]
    UnreachableState(String),

    #[error("map state '{state}' reads '{path}', which is not guaranteed on every route into it")]
    ItemsPathNotProvided { state: String, path: String },

    #[error("invalid template in state '{state}': {reason}")]
    InvalidTemplate { state: String, reason: String },

    #[error("activities not registered: {}", .0.join(", "))]
    UnknownActivities(Vec<String>),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a `WorkflowDefinition`.
///
/// Only deserializes; call `Workflow::build` to validate.
pub fn parse_definition_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

pub fn parse_definition_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_definition_yaml(def: &WorkflowDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::ParseError(e.to_string()))
}

/// Load a definition file, choosing the format by extension (`.json` or YAML).
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_definition_json(&content),
        _ => parse_definition_yaml(&content),
    }
}

// ---------------------------------------------------------------------------
// Compiled graphs
// ---------------------------------------------------------------------------

/// One validated state graph, indexed by state id.
#[derive(Debug, Clone)]
pub struct CompiledGraph {
    start_at: String,
    states: HashMap<String, StateDefinition>,
    /// Compiled iterator per Map state id.
    iterators: HashMap<String, CompiledGraph>,
}

impl CompiledGraph {
    pub fn start_at(&self) -> &str {
        &self.start_at
    }

    pub fn state(&self, id: &str) -> Option<&StateDefinition> {
        self.states.get(id)
    }

    pub fn iterator(&self, map_state: &str) -> Option<&CompiledGraph> {
        self.iterators.get(map_state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn collect_activities<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        for state in self.states.values() {
            if let StateKind::Task(task) = &state.kind {
                out.insert(task.activity.as_str());
            }
        }
        for iterator in self.iterators.values() {
            iterator.collect_activities(out);
        }
    }
}

/// A validated, executable workflow.
#[derive(Debug, Clone)]
pub struct Workflow {
    definition: WorkflowDefinition,
    root: CompiledGraph,
}

impl Workflow {
    /// Validate `definition` and compile every graph it contains.
    pub fn build(definition: WorkflowDefinition) -> Result<Self, DefinitionError> {
        if definition.name.trim().is_empty() {
            return Err(DefinitionError::ValidationError(
                "workflow name must not be empty".to_string(),
            ));
        }
        let root = compile(&definition.graph, definition.input_paths.clone())?;
        Ok(Self { definition, root })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn timeout_secs(&self) -> Option<u64> {
        self.definition.timeout_secs
    }

    pub fn root(&self) -> &CompiledGraph {
        &self.root
    }

    /// The graph an execution runs in, given its chain of Map state ids.
    pub fn graph(&self, scope: &[String]) -> Option<&CompiledGraph> {
        let mut graph = &self.root;
        for map_state in scope {
            graph = graph.iterator(map_state)?;
        }
        Some(graph)
    }

    /// Every activity name used by a Task state anywhere in the workflow.
    pub fn activities(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.root.collect_activities(&mut out);
        out
    }

    /// Fail if any Task refers to an activity missing from `registry`.
    pub fn ensure_activities(&self, registry: &ActivityRegistry) -> Result<(), DefinitionError> {
        let missing: Vec<String> = self
            .activities()
            .into_iter()
            .filter(|name| !registry.contains(name))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::UnknownActivities(missing))
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn compile(graph: &StateGraph, available: Vec<DocPath>) -> Result<CompiledGraph, DefinitionError> {
    let mut states: HashMap<String, StateDefinition> = HashMap::new();
    for state in &graph.states {
        if states.insert(state.id.clone(), state.clone()).is_some() {
            return Err(DefinitionError::DuplicateState(state.id.clone()));
        }
    }

    if !states.contains_key(&graph.start_at) {
        return Err(DefinitionError::UnknownState {
            state: "start_at".to_string(),
            target: graph.start_at.clone(),
        });
    }

    for state in &graph.states {
        for target in state.kind.successors() {
            if !states.contains_key(target) {
                return Err(DefinitionError::UnknownState {
                    state: state.id.clone(),
                    target: target.to_string(),
                });
            }
        }
        check_state(state)?;
    }

    let flow = FlowGraph::new(graph);
    flow.check_reachable(&graph.start_at)?;
    let entry = flow.available_on_entry(&graph.start_at, available);

    let mut iterators = HashMap::new();
    for state in &graph.states {
        let StateKind::Map(map) = &state.kind else {
            continue;
        };
        let covered = entry
            .get(state.id.as_str())
            .is_some_and(|set| set.as_ref().is_some_and(|paths| covers(paths, &map.items_path)));
        if !covered {
            return Err(DefinitionError::ItemsPathNotProvided {
                state: state.id.clone(),
                path: map.items_path.to_string(),
            });
        }

        let seeded = match &map.item_selector {
            Some(selector) => selector
                .0
                .keys()
                .map(|key| DocPath::root().child(key))
                .collect(),
            None => vec![DocPath::root()],
        };
        iterators.insert(state.id.clone(), compile(&map.iterator, seeded)?);
    }

    Ok(CompiledGraph {
        start_at: graph.start_at.clone(),
        states,
        iterators,
    })
}

fn check_state(state: &StateDefinition) -> Result<(), DefinitionError> {
    let invalid = |reason: String| DefinitionError::InvalidTemplate {
        state: state.id.clone(),
        reason,
    };
    match &state.kind {
        StateKind::Task(task) => {
            if task.activity.trim().is_empty() {
                return Err(DefinitionError::ValidationError(format!(
                    "task state '{}' has an empty activity name",
                    state.id
                )));
            }
            for rule in &task.retry {
                check_retry(&state.id, rule)?;
            }
            if task.max_visits == Some(0) {
                return Err(DefinitionError::ValidationError(format!(
                    "task state '{}' has max_visits 0",
                    state.id
                )));
            }
            for template in task.parameters.iter().chain(task.result_selector.iter()) {
                check_template(template, false).map_err(invalid)?;
            }
        }
        StateKind::Choice(choice) => {
            if choice.default.is_none() {
                return Err(DefinitionError::MissingChoiceDefault(state.id.clone()));
            }
        }
        StateKind::Map(map) => {
            if let Some(selector) = &map.item_selector {
                check_template(selector, true).map_err(invalid)?;
            }
        }
        StateKind::Pass(pass) => {
            if let Some(parameters) = &pass.parameters {
                check_template(parameters, false).map_err(invalid)?;
            }
        }
        StateKind::Wait(_) | StateKind::Succeed | StateKind::Fail(_) => {}
    }
    Ok(())
}

fn check_retry(state: &str, rule: &RetryRule) -> Result<(), DefinitionError> {
    if rule.errors.is_empty() {
        return Err(DefinitionError::ValidationError(format!(
            "retry rule on '{state}' matches no errors"
        )));
    }
    if rule.max_attempts == 0 {
        return Err(DefinitionError::ValidationError(format!(
            "retry rule on '{state}' has max_attempts 0"
        )));
    }
    if !rule.backoff_rate.is_finite() || rule.backoff_rate < 1.0 {
        return Err(DefinitionError::ValidationError(format!(
            "retry rule on '{state}' has backoff_rate {} (must be >= 1.0)",
            rule.backoff_rate
        )));
    }
    Ok(())
}

fn check_template(template: &Template, item_allowed: bool) -> Result<(), String> {
    for (key, value) in &template.0 {
        match value {
            TemplateValue::Item if !item_allowed => {
                return Err(format!("field '{key}' refers to the map item outside an item selector"));
            }
            TemplateValue::Format { template: text, args } => {
                let placeholders = text.matches("{}").count();
                if placeholders != args.len() {
                    return Err(format!(
                        "field '{key}' has {placeholders} placeholders but {} arguments",
                        args.len()
                    ));
                }
            }
            TemplateValue::Nested(inner) => check_template(inner, item_allowed)?,
            _ => {}
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Dataflow
// ---------------------------------------------------------------------------

/// Document changes made along one transition.
#[derive(Debug, Clone, Default)]
struct EdgeEffect {
    write: Option<DocPath>,
    /// Pass `output_path`: the document is replaced by the value found here.
    narrow: Option<DocPath>,
}

/// Paths known to exist. `None` means "not yet reached" during the fixpoint.
type Available = Option<Vec<DocPath>>;

struct FlowGraph<'a> {
    graph: DiGraph<&'a str, EdgeEffect>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> FlowGraph<'a> {
    fn new(graph: &'a StateGraph) -> Self {
        let mut g = DiGraph::<&str, EdgeEffect>::new();
        let index: HashMap<&str, NodeIndex> = graph
            .states
            .iter()
            .map(|s| (s.id.as_str(), g.add_node(s.id.as_str())))
            .collect();

        for state in &graph.states {
            let from = index[state.id.as_str()];
            let mut edge = |target: &str, effect: EdgeEffect| {
                if let Some(&to) = index.get(target) {
                    g.add_edge(from, to, effect);
                }
            };
            let write_of = |rp: &ResultPath| match rp {
                ResultPath::At(p) => Some(p.clone()),
                ResultPath::Discard => None,
            };
            match &state.kind {
                StateKind::Task(task) => edge(
                    &task.next,
                    EdgeEffect {
                        write: write_of(&task.result_path),
                        narrow: None,
                    },
                ),
                StateKind::Choice(choice) => {
                    for branch in &choice.branches {
                        edge(&branch.next, EdgeEffect::default());
                    }
                    if let Some(ChoiceDefault::Next(next)) = &choice.default {
                        edge(next, EdgeEffect::default());
                    }
                }
                StateKind::Map(map) => edge(
                    &map.next,
                    EdgeEffect {
                        write: write_of(&map.result_path),
                        narrow: None,
                    },
                ),
                StateKind::Wait(wait) => edge(&wait.next, EdgeEffect::default()),
                StateKind::Pass(pass) => edge(
                    &pass.next,
                    EdgeEffect {
                        write: write_of(&pass.result_path),
                        narrow: pass.output_path.clone(),
                    },
                ),
                StateKind::Succeed | StateKind::Fail(_) => {}
            }
            for rule in state.kind.catch_rules() {
                edge(
                    &rule.next,
                    EdgeEffect {
                        write: write_of(&rule.result_path),
                        narrow: None,
                    },
                );
            }
        }

        Self { graph: g, index }
    }

    fn check_reachable(&self, start: &str) -> Result<(), DefinitionError> {
        let mut dfs = Dfs::new(&self.graph, self.index[start]);
        let mut seen = HashSet::new();
        while let Some(node) = dfs.next(&self.graph) {
            seen.insert(node);
        }
        for node in self.graph.node_indices() {
            if !seen.contains(&node) {
                return Err(DefinitionError::UnreachableState(self.graph[node].to_string()));
            }
        }
        Ok(())
    }

    /// Paths guaranteed present on entry to each state, on every route.
    fn available_on_entry(&self, start: &str, initial: Vec<DocPath>) -> HashMap<&'a str, Available> {
        let start_idx = self.index[start];
        let mut entry: HashMap<NodeIndex, Available> =
            self.graph.node_indices().map(|n| (n, None)).collect();
        entry.insert(start_idx, Some(normalize(initial.clone())));

        // Sets only shrink, so this terminates.
        let mut changed = true;
        while changed {
            changed = false;
            for node in self.graph.node_indices() {
                let mut acc: Available = (node == start_idx).then(|| normalize(initial.clone()));
                for edge in self.graph.edges_directed(node, Direction::Incoming) {
                    let Some(incoming) = &entry[&edge.source()] else {
                        continue;
                    };
                    let out = transfer(incoming, edge.weight());
                    acc = Some(match acc {
                        None => out,
                        Some(current) => intersect(&current, &out),
                    });
                }
                if acc != entry[&node] {
                    entry.insert(node, acc);
                    changed = true;
                }
            }
        }

        entry
            .into_iter()
            .map(|(n, set)| (self.graph[n], set))
            .collect()
    }
}

/// Whether `path` exists whenever every path in `set` does.
fn covers(set: &[DocPath], path: &DocPath) -> bool {
    set.iter().any(|p| path.starts_with(p))
}

fn transfer(incoming: &[DocPath], effect: &EdgeEffect) -> Vec<DocPath> {
    let mut out = incoming.to_vec();
    if let Some(write) = &effect.write {
        out.push(write.clone());
    }
    if let Some(narrow) = &effect.narrow {
        out = if covers(&out, narrow) {
            vec![DocPath::root()]
        } else {
            Vec::new()
        };
    }
    normalize(out)
}

fn intersect(a: &[DocPath], b: &[DocPath]) -> Vec<DocPath> {
    let mut out: Vec<DocPath> = a.iter().filter(|p| covers(b, p)).cloned().collect();
    out.extend(b.iter().filter(|p| covers(a, p)).cloned());
    normalize(out)
}

/// Drop paths already covered by a shorter one, then sort for comparison.
fn normalize(mut paths: Vec<DocPath>) -> Vec<DocPath> {
    paths.sort_by(|a, b| {
        a.segments()
            .len()
            .cmp(&b.segments().len())
            .then_with(|| a.as_str().cmp(b.as_str()))
    });
    let mut kept: Vec<DocPath> = Vec::new();
    for path in paths {
        if !covers(&kept, &path) {
            kept.push(path);
        }
    }
    kept.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    kept
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: minimal
input_paths: ["$.detail"]
start_at: Fetch
states:
  - id: Fetch
    type: task
    activity: fetch
    result_path: $.metadata
    catch:
      - errors: [ALL]
        next: Failed
        result_path: $.error_output
    next: Fan out
  - id: Fan out
    type: map
    items_path: $.metadata.roles
    item_selector:
      role: item
      detail:
        path: $.detail
    iterator:
      start_at: Work
      states:
        - id: Work
          type: task
          activity: work
          parameters:
            role:
              path: $.role
          result_path: $.role.result
          next: Item done
        - id: Item done
          type: succeed
    result_path: $.results
    next: Done
  - id: Done
    type: succeed
  - id: Failed
    type: fail
    error_path: $.error_output.error
    cause_path: $.error_output.cause
"#;

    fn build(yaml: &str) -> Result<Workflow, DefinitionError> {
        Workflow::build(parse_definition_yaml(yaml).unwrap())
    }

    #[test]
    fn builds_minimal_workflow() {
        let workflow = build(MINIMAL).unwrap();
        assert_eq!(workflow.name(), "minimal");
        assert_eq!(workflow.root().start_at(), "Fetch");
        let iterator = workflow.graph(&["Fan out".to_string()]).unwrap();
        assert_eq!(iterator.start_at(), "Work");
        assert!(workflow.graph(&["Nope".to_string()]).is_none());
        assert_eq!(
            workflow.activities().into_iter().collect::<Vec<_>>(),
            vec!["fetch", "work"]
        );
    }

    #[test]
    fn yaml_round_trip_rebuilds() {
        let workflow = build(MINIMAL).unwrap();
        let yaml = serialize_definition_yaml(workflow.definition()).unwrap();
        let again = build(&yaml).unwrap();
        assert_eq!(again.definition(), workflow.definition());
    }

    #[test]
    fn rejects_duplicate_state() {
        let yaml = MINIMAL.replace("  - id: Done\n", "  - id: Fetch\n");
        assert!(matches!(build(&yaml), Err(DefinitionError::DuplicateState(id)) if id == "Fetch"));
    }

    #[test]
    fn rejects_dangling_next() {
        let yaml = MINIMAL.replace("next: Done", "next: Nowhere");
        let err = build(&yaml).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownState { ref target, .. } if target == "Nowhere"));
    }

    #[test]
    fn rejects_unreachable_state() {
        let yaml = format!("{MINIMAL}  - id: Orphan\n    type: succeed\n");
        assert!(matches!(build(&yaml), Err(DefinitionError::UnreachableState(id)) if id == "Orphan"));
    }

    #[test]
    fn rejects_choice_without_default() {
        let yaml = r#"
name: choice
start_at: Pick
states:
  - id: Pick
    type: choice
    branches:
      - condition: { op: is_present, path: $.a }
        next: Done
  - id: Done
    type: succeed
"#;
        assert!(matches!(build(yaml), Err(DefinitionError::MissingChoiceDefault(id)) if id == "Pick"));
    }

    #[test]
    fn rejects_items_path_nobody_writes() {
        let yaml = MINIMAL.replace("result_path: $.metadata\n", "result_path: $.other\n");
        let err = build(&yaml).unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::ItemsPathNotProvided { ref path, .. } if path == "$.metadata.roles"
        ));
    }

    #[test]
    fn items_path_must_hold_on_every_route() {
        // The catch edge reaches the map without writing $.metadata.
        let yaml = r#"
name: routes
input_paths: ["$.detail"]
start_at: Fetch
states:
  - id: Fetch
    type: task
    activity: fetch
    result_path: $.metadata
    catch:
      - errors: [ALL]
        next: Fan out
        result_path: $.error_output
    next: Fan out
  - id: Fan out
    type: map
    items_path: $.metadata.roles
    iterator:
      start_at: Item done
      states:
        - id: Item done
          type: succeed
    next: Done
  - id: Done
    type: succeed
"#;
        assert!(matches!(build(yaml), Err(DefinitionError::ItemsPathNotProvided { .. })));
    }

    #[test]
    fn input_paths_cover_items() {
        let yaml = r#"
name: input
input_paths: ["$.detail"]
start_at: Fan out
states:
  - id: Fan out
    type: map
    items_path: $.detail.roles
    iterator:
      start_at: Item done
      states:
        - id: Item done
          type: succeed
    next: Done
  - id: Done
    type: succeed
"#;
        assert!(build(yaml).is_ok());
    }

    #[test]
    fn rejects_item_outside_selector() {
        let yaml = MINIMAL.replace(
            "          parameters:\n            role:\n              path: $.role\n",
            "          parameters:\n            role: item\n",
        );
        assert!(matches!(build(&yaml), Err(DefinitionError::InvalidTemplate { .. })));
    }

    #[test]
    fn rejects_bad_backoff() {
        let yaml = MINIMAL.replace(
            "    result_path: $.metadata\n",
            "    result_path: $.metadata\n    retry:\n      - errors: [Timeout]\n        backoff_rate: 0.5\n",
        );
        assert!(matches!(build(&yaml), Err(DefinitionError::ValidationError(_))));
    }

    #[test]
    fn ensure_activities_lists_missing() {
        let workflow = build(MINIMAL).unwrap();
        let registry = ActivityRegistry::new();
        let err = workflow.ensure_activities(&registry).unwrap_err();
        assert_eq!(err.to_string(), "activities not registered: fetch, work");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let def = load_definition_file(&path).unwrap();
        assert_eq!(def.name, "minimal");

        let json_path = dir.path().join("wf.json");
        std::fs::write(&json_path, serde_json::to_string(&def).unwrap()).unwrap();
        assert_eq!(load_definition_file(&json_path).unwrap(), def);
    }
}
