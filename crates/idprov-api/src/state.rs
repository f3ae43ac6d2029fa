//! Application state wiring the engine to its infrastructure.
//!
//! AppState holds the concrete engine used by both the CLI and the REST API.
//! The engine is generic over its repository; AppState pins it to SQLite.

use std::sync::Arc;

use anyhow::Context;
use idprov_core::identity::definition::provisioning_workflow;
use idprov_core::workflow::activity::ActivityRegistry;
use idprov_core::workflow::clock::{Clock, SystemClock};
use idprov_core::workflow::engine::{Engine, EngineBuilder};
use idprov_infra::config::{load_global_config, resolve_data_dir};
use idprov_infra::registry::build_registry;
use idprov_infra::sqlite::execution::SqliteExecutionRepository;
use idprov_infra::sqlite::ledger::SqliteCallbackLedger;
use idprov_infra::sqlite::pool::{database_url, DatabasePool};
use idprov_types::config::GlobalConfig;

pub type ConcreteEngine = Engine<SqliteExecutionRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: ConcreteEngine,
    pub config: Arc<GlobalConfig>,
}

impl AppState {
    /// Open the database, build the live activity registry and the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_global_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the execution database")?;

        let ledger = SqliteCallbackLedger::new(db_pool.clone());
        let registry = build_registry(&config, &data_dir, ledger)
            .context("failed to build the activity registry")?;

        Self::assemble(config, db_pool, registry, Arc::new(SystemClock))
    }

    /// Build the state from already-opened parts.
    pub fn assemble(
        config: GlobalConfig,
        db_pool: DatabasePool,
        registry: ActivityRegistry,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let workflow = provisioning_workflow(&config.engine)
            .context("provisioning workflow failed validation")?;
        let engine = EngineBuilder::new(
            workflow,
            SqliteExecutionRepository::new(db_pool),
            registry,
        )
        .config(config.engine.clone())
        .clock(clock)
        .build()?;

        Ok(Self {
            engine,
            config: Arc::new(config),
        })
    }
}
