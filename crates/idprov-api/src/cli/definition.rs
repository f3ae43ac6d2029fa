//! Workflow definition commands: `definition` (export) and `validate`.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use idprov_core::identity::definition::provisioning_definition;
use idprov_core::identity::simulated::{sample_base_configs, Simulation};
use idprov_core::workflow::definition::{load_definition_file, serialize_definition_yaml, Workflow};
use idprov_infra::config::{load_global_config, resolve_data_dir};

use crate::cli::DefinitionFormat;

/// Print the built-in provisioning definition, with engine limits from
/// `config.toml` applied.
pub async fn export(format: DefinitionFormat) -> Result<()> {
    let config = load_global_config(&resolve_data_dir()).await;
    let definition = provisioning_definition(&config.engine)?;
    let text = match format {
        DefinitionFormat::Yaml => serialize_definition_yaml(&definition)?,
        DefinitionFormat::Json => serde_json::to_string_pretty(&definition)?,
    };
    println!("{text}");
    Ok(())
}

/// Summary of a validated definition file.
#[derive(Debug, serde::Serialize)]
pub struct ValidationReport {
    pub name: String,
    pub version: String,
    pub start_at: String,
    pub states: usize,
    pub activities: Vec<String>,
    /// Activities no provisioning adapter exists for.
    pub unknown_activities: Vec<String>,
}

/// Parse and validate a definition file without running it.
pub fn validate_file(path: &Path) -> Result<ValidationReport> {
    let definition = load_definition_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let workflow = Workflow::build(definition)
        .with_context(|| format!("{} is not a valid workflow", path.display()))?;

    let known = Simulation::new(sample_base_configs()).registry();
    let activities: Vec<String> = workflow.activities().into_iter().map(str::to_string).collect();
    let unknown_activities = activities
        .iter()
        .filter(|name| !known.contains(name))
        .cloned()
        .collect();

    Ok(ValidationReport {
        name: workflow.name().to_string(),
        version: workflow.definition().version.clone(),
        start_at: workflow.root().start_at().to_string(),
        states: workflow.root().len(),
        activities,
        unknown_activities,
    })
}

pub fn validate(path: &Path, json: bool) -> Result<()> {
    let report = validate_file(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} v{} is valid",
        style("✓").green(),
        style(&report.name).cyan(),
        report.version
    );
    println!("  Starts at: {}", report.start_at);
    println!("  States:    {}", report.states);
    println!("  Activities: {}", report.activities.join(", "));
    for name in &report.unknown_activities {
        println!(
            "  {} activity '{}' has no built-in adapter",
            style("!").yellow().bold(),
            name
        );
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: minimal
start_at: Lookup
states:
  - id: Lookup
    type: task
    activity: ad_group
    next: Audit
  - id: Audit
    type: task
    activity: audit_log
    next: Done
  - id: Done
    type: succeed
"#;

    #[test]
    fn reports_unknown_activities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("minimal.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let report = validate_file(&path).unwrap();
        assert_eq!(report.name, "minimal");
        assert_eq!(report.start_at, "Lookup");
        assert_eq!(report.states, 3);
        assert_eq!(report.activities, vec!["ad_group", "audit_log"]);
        assert_eq!(report.unknown_activities, vec!["audit_log"]);
    }

    #[test]
    fn dangling_transition_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, MINIMAL.replace("next: Done", "next: Nowhere")).unwrap();
        assert!(validate_file(&path).is_err());
    }

    #[test]
    fn builtin_definition_round_trips_through_yaml() {
        let definition = provisioning_definition(&Default::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioning.yaml");
        std::fs::write(&path, serialize_definition_yaml(&definition).unwrap()).unwrap();

        let report = validate_file(&path).unwrap();
        assert_eq!(report.name, definition.name);
        assert!(report.unknown_activities.is_empty());
    }
}
