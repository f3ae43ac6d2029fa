//! The identity provisioning workflow.
//!
//! The graph ships as YAML inside the crate. Engine limits from the config
//! (execution timeout, Map concurrency, relaunch ceiling) are applied on top
//! before the definition is validated.

use idprov_types::config::EngineConfig;
use idprov_types::workflow::{StateGraph, StateKind, WorkflowDefinition};

use crate::workflow::definition::{parse_definition_yaml, DefinitionError, Workflow};

const PROVISIONING_YAML: &str = include_str!("../../definitions/identity_provisioning.yaml");

/// The provisioning definition with `config` limits applied.
pub fn provisioning_definition(config: &EngineConfig) -> Result<WorkflowDefinition, DefinitionError> {
    let mut definition = parse_definition_yaml(PROVISIONING_YAML)?;
    definition.timeout_secs = Some(config.execution_timeout_secs);
    apply_limits(&mut definition.graph, config);
    Ok(definition)
}

/// The validated provisioning workflow.
pub fn provisioning_workflow(config: &EngineConfig) -> Result<Workflow, DefinitionError> {
    Workflow::build(provisioning_definition(config)?)
}

/// Launch tasks (the ones declaring `max_visits`) take the relaunch ceiling;
/// Map states take the configured concurrency.
fn apply_limits(graph: &mut StateGraph, config: &EngineConfig) {
    for state in &mut graph.states {
        match &mut state.kind {
            StateKind::Task(task) if task.max_visits.is_some() => {
                task.max_visits = Some(config.relaunch_ceiling.max(1));
            }
            StateKind::Map(map) => {
                map.max_concurrency = Some(config.map_concurrency);
                apply_limits(&mut map.iterator, config);
            }
            _ => {}
        }
    }
}
