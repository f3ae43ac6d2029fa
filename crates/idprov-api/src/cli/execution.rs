//! Execution inspection commands: `status`, `steps` and `list`.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use uuid::Uuid;

use idprov_types::execution::{ExecutionRecord, ExecutionStatus, StepLog};

use crate::state::AppState;

/// Show one execution and its Map items.
pub async fn status(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    let record = state.engine.execution(id).await?;
    let items = state.engine.children(id).await?;
    print_execution(&record, &items, json)
}

/// Show the step log of one execution.
pub async fn steps(state: &AppState, id: Uuid, json: bool) -> Result<()> {
    state.engine.execution(id).await?;
    let steps = state.engine.step_logs(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    println!();
    println!("  Step log for {}", style(id).cyan());
    println!();
    if steps.is_empty() {
        println!("  {}", style("No steps recorded yet.").dim());
    } else {
        println!("{}", steps_table(&steps));
    }
    println!();
    Ok(())
}

/// List recent top-level executions.
pub async fn list(state: &AppState, limit: u32, json: bool) -> Result<()> {
    let executions = state.engine.list(limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  {}", style("No executions yet.").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Execution").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Started").fg(Color::White),
    ]);
    for record in &executions {
        table.add_row(vec![
            Cell::new(record.id).fg(Color::Cyan),
            Cell::new(record.status).fg(status_color(record.status)),
            Cell::new(&record.current_state),
            Cell::new(record.started_at.format("%Y-%m-%d %H:%M:%S")).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn print_execution(record: &ExecutionRecord, items: &[ExecutionRecord], json: bool) -> Result<()> {
    if json {
        let view = serde_json::json!({
            "execution": record,
            "items": items,
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Execution").bold(),
        style(record.id).cyan()
    );
    println!("  Workflow: {}", record.workflow_name);
    println!("  Status:   {}", styled_status(record.status));
    println!("  State:    {}", record.current_state);
    println!("  Started:  {}", record.started_at.to_rfc3339());
    if let Some(completed) = record.completed_at {
        println!("  Finished: {}", completed.to_rfc3339());
    }
    if let Some(resume_at) = record.resume_at {
        println!("  Resumes:  {}", resume_at.to_rfc3339());
    }
    if let Some(error) = &record.error {
        println!("  Error:    {}", style(&error.error).red());
        println!("  Cause:    {}", error.cause);
    }

    if !items.is_empty() {
        println!();
        println!("  {}", style("── Map items ──").dim());
        let mut table = Table::new();
        table.load_preset(presets::UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("#").fg(Color::White),
            Cell::new("Status").fg(Color::White),
            Cell::new("State").fg(Color::White),
            Cell::new("Error").fg(Color::White),
        ]);
        for item in items {
            let index = item
                .parent
                .as_ref()
                .map(|p| p.item_index.to_string())
                .unwrap_or_default();
            let error = item
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(index),
                Cell::new(item.status).fg(status_color(item.status)),
                Cell::new(&item.current_state),
                Cell::new(error).fg(Color::DarkGrey),
            ]);
        }
        println!("{table}");
    }
    println!();
    Ok(())
}

pub fn steps_table(steps: &[StepLog]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("State").fg(Color::White),
        Cell::new("Attempt").fg(Color::White),
        Cell::new("Outcome").fg(Color::White),
        Cell::new("Delay").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);
    for step in steps {
        let delay = step.delay_ms.map(format_delay).unwrap_or_default();
        let error = step
            .error
            .as_ref()
            .map(|e| e.error.clone())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&step.state).fg(Color::Cyan),
            Cell::new(step.attempt),
            Cell::new(step.outcome.as_str()),
            Cell::new(delay),
            Cell::new(error).fg(Color::Red),
        ]);
    }
    table
}

pub fn styled_status(status: ExecutionStatus) -> StyledObject<&'static str> {
    let text = style(status.as_str());
    match status {
        ExecutionStatus::Succeeded => text.green(),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => text.red(),
        ExecutionStatus::Suspended => text.yellow(),
        ExecutionStatus::Running => text.cyan(),
    }
}

fn status_color(status: ExecutionStatus) -> Color {
    match status {
        ExecutionStatus::Succeeded => Color::Green,
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => Color::Red,
        ExecutionStatus::Suspended => Color::Yellow,
        ExecutionStatus::Running => Color::Cyan,
    }
}

/// `90_000` -> `1m30s`.
fn format_delay(ms: u64) -> String {
    let secs = ms / 1000;
    match (secs / 60, secs % 60) {
        (0, 0) => format!("{ms}ms"),
        (0, s) => format!("{s}s"),
        (m, 0) => format!("{m}m"),
        (m, s) => format!("{m}m{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_render_compactly() {
        assert_eq!(format_delay(250), "250ms");
        assert_eq!(format_delay(30_000), "30s");
        assert_eq!(format_delay(120_000), "2m");
        assert_eq!(format_delay(90_000), "1m30s");
    }

    #[test]
    fn terminal_failures_are_red() {
        assert_eq!(status_color(ExecutionStatus::TimedOut), Color::Red);
        assert_eq!(status_color(ExecutionStatus::Suspended), Color::Yellow);
    }
}
