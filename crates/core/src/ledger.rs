//! Migration ledger - the persisted record of applied versions
//!
//! The `schema_migrations` table is the single source of truth for current
//! schema state: a version is present iff its up script has been applied
//! and not yet rolled back. Rows are inserted by a successful apply and
//! deleted by a successful rollback, never updated in place. Read in
//! primary-key order the rows give application order; gaps are allowed.
//!
//! The ledger also owns the single-row advisory lock that keeps two
//! migrator instances from interleaving against the same database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, Sqlite, Transaction};

use crate::error::{MigrateError, MigrateResult};

/// Name of the applied-version table.
pub const LEDGER_TABLE: &str = "schema_migrations";

const LEDGER_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    checksum TEXT NOT NULL
);";

const LOCK_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS schema_migrations_lock (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    acquired_at TEXT NOT NULL
);";

/// One row of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: i64,
    pub filename: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
}

/// Persistent record of which migration versions have been applied.
#[derive(Clone)]
pub struct MigrationLedger {
    pool: SqlitePool,
}

impl MigrationLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Idempotently create the ledger and lock tables. Safe to call on
    /// every engine invocation.
    pub async fn ensure_schema(&self) -> MigrateResult<()> {
        sqlx::query(LEDGER_SCHEMA).execute(&self.pool).await?;
        sqlx::query(LOCK_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// All recorded versions, ascending. The last element is the most
    /// recently applied version.
    pub async fn applied_versions(&self) -> MigrateResult<Vec<i64>> {
        let rows = sqlx::query("SELECT version FROM schema_migrations ORDER BY version ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            versions.push(row.try_get("version")?);
        }
        Ok(versions)
    }

    /// All ledger rows, ascending by version.
    pub async fn applied_entries(&self) -> MigrateResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            "SELECT version, filename, applied_at, checksum \
             FROM schema_migrations ORDER BY version ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(LedgerEntry {
                version: row.try_get("version")?,
                filename: row.try_get("filename")?,
                applied_at: row.try_get("applied_at")?,
                checksum: row.try_get("checksum")?,
            });
        }
        Ok(entries)
    }

    /// Insert one row inside the caller's transaction. A duplicate version
    /// means orchestration went wrong and surfaces as a constraint error.
    pub async fn record(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        version: i64,
        filename: &str,
        checksum: &str,
    ) -> MigrateResult<()> {
        let result = sqlx::query(
            "INSERT INTO schema_migrations (version, filename, applied_at, checksum) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(version)
        .bind(filename)
        .bind(Utc::now().to_rfc3339())
        .bind(checksum)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(MigrateError::Constraint(format!(
                "version {version} is already recorded as applied"
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete the row for `version` inside the caller's transaction. The
    /// row must exist.
    pub async fn erase(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        version: i64,
    ) -> MigrateResult<()> {
        let result = sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
            .bind(version)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::Constraint(format!(
                "version {version} is not recorded as applied"
            )));
        }
        Ok(())
    }

    /// Take the advisory lock for the duration of a mutating command.
    ///
    /// Fails fast with the holder's timestamp when another run is active.
    /// A lock left behind by a crashed process must be removed manually;
    /// an expiry would reintroduce the two-writer race.
    pub async fn acquire_lock(&self) -> MigrateResult<()> {
        let result = sqlx::query("INSERT INTO schema_migrations_lock (id, acquired_at) VALUES (1, ?)")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                let acquired_at = sqlx::query("SELECT acquired_at FROM schema_migrations_lock WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?
                    .and_then(|row| row.try_get("acquired_at").ok())
                    .unwrap_or_else(|| "unknown".to_string());
                Err(MigrateError::Locked { acquired_at })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn release_lock(&self) -> MigrateResult<()> {
        sqlx::query("DELETE FROM schema_migrations_lock WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}
