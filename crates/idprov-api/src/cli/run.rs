//! `idprov run`: drive one trigger event in the foreground.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use idprov_core::identity::definition::provisioning_workflow;
use idprov_core::identity::simulated::{sample_base_configs, Simulation};
use idprov_core::repository::memory::InMemoryExecutionRepository;
use idprov_core::workflow::clock::{Clock, ManualClock};
use idprov_core::workflow::engine::EngineBuilder;
use idprov_infra::config::{load_global_config, resolve_data_dir};
use idprov_types::trigger::TriggerEvent;

use crate::cli::execution::print_execution;
use crate::state::AppState;

/// Read a trigger event from a file, or from stdin when `path` is `-`.
pub fn read_event(path: &Path) -> Result<TriggerEvent> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read event file {}", path.display()))?
    };
    parse_event(&raw)
}

fn parse_event(raw: &str) -> Result<TriggerEvent> {
    serde_json::from_str(raw).context("event is not a valid trigger event")
}

/// Run against the configured activity endpoints, persisting to SQLite.
///
/// Ctrl+C stops the foreground worker; the execution stays durable and is
/// resumed by the next `serve` or `run`.
pub async fn run_live(event: &TriggerEvent, json: bool) -> Result<()> {
    let state = AppState::init().await?;
    let id = state.engine.start_event(event).await?;
    if !json {
        println!();
        println!("  Started execution {}", style(id).cyan());
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    match state.engine.run_until_finished(id, shutdown).await? {
        Some(record) => {
            let items = state.engine.children(id).await?;
            print_execution(&record, &items, json)
        }
        None => {
            if json {
                println!("{}", json!({ "execution_id": id, "interrupted": true }));
            } else {
                println!(
                    "  {} Interrupted; execution {} will resume on the next start.",
                    style("!").yellow().bold(),
                    id
                );
            }
            Ok(())
        }
    }
}

/// Run against simulated activities with an in-memory store, jumping a
/// manual clock over every timer.
pub async fn run_dry(event: &TriggerEvent, base_configs: Option<&Path>, json: bool) -> Result<()> {
    let base_configs = match base_configs {
        Some(path) => load_bundle(path)?,
        None => sample_base_configs(),
    };
    let config = load_global_config(&resolve_data_dir()).await;

    let sim = Simulation::new(base_configs);
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let started = clock.now();
    let engine = EngineBuilder::new(
        provisioning_workflow(&config.engine)?,
        InMemoryExecutionRepository::new(),
        sim.registry(),
    )
    .config(config.engine.clone())
    .clock(clock.clone())
    .build()?;

    let id = engine.start_event(event).await?;
    engine.run_to_completion(&clock).await?;

    let record = engine.execution(id).await?;
    let items = engine.children(id).await?;
    let simulated_secs = (clock.now() - started).num_seconds();

    if json {
        let activities: Vec<Value> = sim
            .calls()
            .iter()
            .map(|c| json!({ "activity": c.activity, "state": c.state }))
            .collect();
        let notifications: Vec<Value> = sim
            .notifications()
            .iter()
            .map(|n| json!({ "kind": n.kind.as_str(), "body": n.body }))
            .collect();
        let report = json!({
            "execution": record,
            "items": items,
            "steps": engine.step_logs(id).await?,
            "activities": activities,
            "statuses": sim.statuses(),
            "notifications": notifications,
            "simulated_seconds": simulated_secs,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    print_execution(&record, &items, false)?;

    println!("  {}", style("── Activities ──").dim());
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Activity").fg(Color::White),
        Cell::new("State").fg(Color::White),
    ]);
    for (n, call) in sim.calls().iter().enumerate() {
        table.add_row(vec![
            Cell::new(n + 1),
            Cell::new(&call.activity).fg(Color::Cyan),
            Cell::new(&call.state),
        ]);
    }
    println!("{table}");
    println!();

    let statuses: Vec<String> = sim
        .statuses()
        .iter()
        .filter_map(|s| serde_json::to_value(s).ok())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    println!("  Deployment status: {}", statuses.join(" -> "));
    for notification in sim.notifications() {
        println!(
            "  Callback {}: {}",
            style(notification.kind.as_str()).bold(),
            notification.body
        );
    }
    println!(
        "  {}",
        style(format!("Simulated time elapsed: {simulated_secs}s")).dim()
    );
    println!();
    Ok(())
}

fn load_bundle(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read base configs {}", path.display()))?;
    let bundle: Value = serde_json::from_str(&raw).context("base configs are not valid JSON")?;
    anyhow::ensure!(bundle.is_object(), "base configs must be a JSON object");
    Ok(bundle)
}
