//! Transactional runner - executes one migration step atomically
//!
//! Each step runs the script's statements and the matching ledger mutation
//! (record on apply, erase on rollback) inside a single database
//! transaction. SQLite has transactional DDL, so a statement failing
//! halfway through a script leaves neither a partial schema change nor a
//! ledger row behind.

use std::fs;

use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, warn};

use crate::error::{MigrateError, MigrateResult};
use crate::ledger::MigrationLedger;
use crate::source::MigrationFile;

/// Executes single migration steps, each in its own transaction.
pub struct TransactionalRunner {
    pool: SqlitePool,
    ledger: MigrationLedger,
}

impl TransactionalRunner {
    pub fn new(pool: SqlitePool, ledger: MigrationLedger) -> Self {
        Self { pool, ledger }
    }

    /// Apply an up script and record it in the ledger, atomically.
    pub async fn apply(&self, migration: &MigrationFile) -> MigrateResult<()> {
        let content = fs::read_to_string(&migration.path)
            .map_err(|e| MigrateError::io(&migration.path, e))?;
        let checksum = checksum(&content);

        let mut tx = self.pool.begin().await?;
        self.execute_script(&mut tx, migration, &content, "apply").await?;
        self.ledger
            .record(&mut tx, migration.version, &migration.filename, &checksum)
            .await?;
        tx.commit().await.map_err(|e| MigrateError::Execution {
            version: migration.version,
            filename: migration.filename.clone(),
            phase: "commit",
            source: e,
        })?;

        Ok(())
    }

    /// Execute a down script and erase the ledger row, atomically.
    pub async fn rollback(&self, migration: &MigrationFile) -> MigrateResult<()> {
        let content = fs::read_to_string(&migration.path)
            .map_err(|e| MigrateError::io(&migration.path, e))?;

        let mut tx = self.pool.begin().await?;
        self.execute_script(&mut tx, migration, &content, "rollback").await?;
        self.ledger.erase(&mut tx, migration.version).await?;
        tx.commit().await.map_err(|e| MigrateError::Execution {
            version: migration.version,
            filename: migration.filename.clone(),
            phase: "commit",
            source: e,
        })?;

        Ok(())
    }

    async fn execute_script(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        migration: &MigrationFile,
        sql: &str,
        phase: &'static str,
    ) -> MigrateResult<()> {
        for statement in split_statements(sql) {
            debug!(version = migration.version, %statement, "executing");
            sqlx::query(&statement)
                .execute(&mut **tx)
                .await
                .map_err(|e| MigrateError::Execution {
                    version: migration.version,
                    filename: migration.filename.clone(),
                    phase,
                    source: e,
                })?;
        }
        Ok(())
    }
}

/// Content fingerprint stored in the ledger: SHA-256 hex digest.
pub fn checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Split a script into individual statements.
///
/// Uses proper SQL parsing; if the script does not parse, falls back to
/// naive semicolon splitting with a warning so nonstandard but valid
/// SQLite constructs still run.
pub fn split_statements(sql: &str) -> Vec<String> {
    let dialect = sqlparser::dialect::SQLiteDialect {};
    match sqlparser::parser::Parser::parse_sql(&dialect, sql) {
        Ok(parsed) => parsed.into_iter().map(|stmt| format!("{stmt};")).collect(),
        Err(err) => {
            warn!(error = %err, "SQL parsing failed, using naive semicolon splitting");
            sql.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| format!("{s};"))
                .collect()
        }
    }
}
