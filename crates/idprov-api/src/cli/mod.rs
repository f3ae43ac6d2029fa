//! CLI command definitions for the `idprov` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod definition;
pub mod execution;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use uuid::Uuid;

/// Durable identity provisioning orchestrator.
#[derive(Parser)]
#[command(name = "idprov", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "IDPROV_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API and the execution worker.
    Serve {
        /// Port to listen on.
        #[arg(long, short, default_value = "8640")]
        port: u16,

        /// Host address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Run one trigger event to completion in the foreground.
    Run {
        /// Path to the event JSON, or `-` for stdin.
        event: PathBuf,

        /// Use simulated activities, an in-memory store and a manual clock.
        #[arg(long)]
        dry_run: bool,

        /// Base-configuration bundle served to a dry run (JSON object).
        #[arg(long, requires = "dry_run")]
        base_configs: Option<PathBuf>,
    },

    /// Show one execution and its Map items.
    Status {
        /// Execution id.
        id: Uuid,
    },

    /// Show the step log of an execution.
    Steps {
        /// Execution id.
        id: Uuid,
    },

    /// List recent executions.
    #[command(alias = "ls")]
    List {
        /// Maximum number of executions to show.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Print the built-in provisioning workflow definition.
    Definition {
        #[arg(long, value_enum, default_value = "yaml")]
        format: DefinitionFormat,
    },

    /// Validate a workflow definition file (YAML or JSON).
    Validate {
        /// Path to the definition file.
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}
