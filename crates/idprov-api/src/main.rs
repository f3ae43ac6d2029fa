//! Identity provisioning orchestrator CLI and REST API entry point.
//!
//! Binary name: `idprov`
//!
//! Parses CLI arguments, initializes tracing, the database and the engine,
//! then dispatches to the command handler or starts the API server together
//! with the execution worker.

mod cli;
mod http;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use idprov_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        verbosity: cli.verbose,
        quiet: cli.quiet,
        json: cli.log_json,
        otel: cli.otel,
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Commands that need no database.
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "idprov", &mut std::io::stdout());
        }

        Commands::Definition { format } => {
            cli::definition::export(format).await?;
        }

        Commands::Validate { file } => {
            cli::definition::validate(&file, cli.json)?;
        }

        Commands::Run {
            event,
            dry_run,
            base_configs,
        } => {
            let event = cli::run::read_event(&event)?;
            if dry_run {
                cli::run::run_dry(&event, base_configs.as_deref(), cli.json).await?;
            } else {
                cli::run::run_live(&event, cli.json).await?;
            }
        }

        Commands::Status { id } => {
            let state = AppState::init().await?;
            cli::execution::status(&state, id, cli.json).await?;
        }

        Commands::Steps { id } => {
            let state = AppState::init().await?;
            cli::execution::steps(&state, id, cli.json).await?;
        }

        Commands::List { limit } => {
            let state = AppState::init().await?;
            cli::execution::list(&state, limit, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            let state = AppState::init().await?;
            serve(state, &host, port).await?;
        }
    }

    Ok(())
}

/// Run the HTTP API and the execution worker until Ctrl+C or SIGTERM.
async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = CancellationToken::new();
    let worker = {
        let engine = state.engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run_worker(shutdown).await })
    };

    println!(
        "  {} idprov API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);
    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    worker.await.context("execution worker panicked")??;

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
