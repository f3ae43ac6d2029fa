//! SQLite callback ledger.
//!
//! One row per callback token digest. A claim is a conflict-ignoring insert
//! followed by a read of the winning row, inside one transaction on the
//! writer pool, so two executions racing for the same token see a single
//! owner. `attempted_at` is stamped before the channel is called and
//! `sent_at` once delivery is confirmed.

use chrono::Utc;
use idprov_core::repository::ledger::{CallbackLedger, TokenClaim};
use idprov_types::error::RepositoryError;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

#[derive(Clone)]
pub struct SqliteCallbackLedger {
    pool: DatabasePool,
}

impl SqliteCallbackLedger {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn stamp(&self, digest: &str, sql: &'static str) -> Result<(), RepositoryError> {
        let result = sqlx::query(sql)
            .bind(Utc::now().to_rfc3339())
            .bind(digest)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

impl CallbackLedger for SqliteCallbackLedger {
    async fn claim(
        &self,
        digest: &str,
        execution_id: &Uuid,
        outcome: &str,
    ) -> Result<TokenClaim, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let inserted = sqlx::query(
            r#"INSERT INTO callback_tokens (digest, execution_id, outcome, claimed_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(digest) DO NOTHING"#,
        )
        .bind(digest)
        .bind(execution_id.to_string())
        .bind(outcome)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .rows_affected();

        let claim = if inserted == 1 {
            TokenClaim::Acquired
        } else {
            let row = sqlx::query(
                "SELECT execution_id, outcome, attempted_at, sent_at FROM callback_tokens WHERE digest = ?",
            )
            .bind(digest)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let owner: String = row
                .try_get("execution_id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let owner = Uuid::parse_str(&owner)
                .map_err(|e| RepositoryError::Query(format!("invalid execution id: {e}")))?;
            let stored_outcome: String = row
                .try_get("outcome")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let attempted_at: Option<String> = row
                .try_get("attempted_at")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let sent_at: Option<String> = row
                .try_get("sent_at")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

            TokenClaim::for_existing(
                &owner,
                &stored_outcome,
                attempted_at.is_some(),
                sent_at.is_some(),
                execution_id,
                outcome,
            )
        };

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(claim)
    }

    async fn mark_attempted(&self, digest: &str) -> Result<(), RepositoryError> {
        self.stamp(digest, "UPDATE callback_tokens SET attempted_at = ? WHERE digest = ?")
            .await
    }

    async fn mark_sent(&self, digest: &str) -> Result<(), RepositoryError> {
        self.stamp(digest, "UPDATE callback_tokens SET sent_at = ? WHERE digest = ?")
            .await
    }
}
