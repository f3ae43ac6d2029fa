//! Execution store connections.
//!
//! Engine workers checkpoint after every step while the API and CLI read
//! execution history, so writes go through one serialized connection and
//! reads through a small read-only pool. The journal is WAL so readers never
//! block the checkpointing writer.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only connections for history queries.
    pub reader: SqlitePool,
    /// The single connection every checkpoint and ledger write uses.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open the store at `database_url` and apply pending migrations.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        // Readers open read-only, so the schema has to exist first.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// Database URL for `{data_dir}/idprov.db`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}/idprov.db", data_dir.display())
}
