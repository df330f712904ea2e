//! Migration engine - command orchestration
//!
//! Composes source, ledger, and runner into the five commands: up, down,
//! down-all, status, version. The applied-set is read fresh at the start
//! of every command; the engine keeps no state across invocations.
//!
//! Mutating commands hold the advisory lock for their whole duration so a
//! second migrator instance fails fast instead of interleaving.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{LedgerEntry, MigrationLedger};
use crate::runner::{checksum, TransactionalRunner};
use crate::source::{Direction, MigrationFile, MigrationSource};

/// Result of an `up` run.
#[derive(Debug, Default)]
pub struct UpSummary {
    /// Versions newly applied this run (or that would be, under dry-run),
    /// in application order
    pub applied_versions: Vec<i64>,
    /// Versions that were already in the ledger before the run
    pub already_applied: usize,
    /// Pending versions left untouched (step limit or dry-run)
    pub pending_remaining: usize,
}

/// Result of a `down-all` run.
#[derive(Debug, Default)]
pub struct DownAllSummary {
    /// Versions rolled back, most recent first
    pub rolled_back_versions: Vec<i64>,
    /// Versions skipped because no down script exists for them
    pub skipped: usize,
}

/// One line of the status report.
#[derive(Debug)]
pub struct StatusRow {
    pub version: i64,
    pub filename: String,
    pub applied: bool,
}

/// Read-only report of every discovered up script and its ledger state.
#[derive(Debug)]
pub struct StatusReport {
    pub db_path: PathBuf,
    pub migrations_dir: PathBuf,
    pub applied_count: usize,
    pub total_count: usize,
    /// Ascending by version
    pub rows: Vec<StatusRow>,
}

/// Read-only report of the current schema version.
#[derive(Debug)]
pub struct VersionReport {
    /// Highest applied version, 0 when nothing is applied
    pub current: i64,
    pub applied_count: usize,
}

/// Orchestrates migration commands over one database.
pub struct MigrationEngine {
    config: EngineConfig,
    source: MigrationSource,
    ledger: MigrationLedger,
    runner: TransactionalRunner,
}

impl MigrationEngine {
    /// Open the database (creating file and parent directory if missing)
    /// and ensure the ledger schema exists. Both failures are fatal before
    /// any command logic runs.
    pub async fn connect(config: EngineConfig) -> MigrateResult<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| MigrateError::io(parent, e))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true);
        // Single connection: SQLite has one writer, and the engine is
        // strictly sequential anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::Connection {
                path: config.db_path.clone(),
                source: e,
            })?;

        let ledger = MigrationLedger::new(pool.clone());
        ledger.ensure_schema().await?;

        let source = MigrationSource::new(&config.migrations_dir);
        let runner = TransactionalRunner::new(pool, ledger.clone());

        Ok(Self {
            config,
            source,
            ledger,
            runner,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply pending up migrations in ascending version order.
    ///
    /// The first failure aborts the command; steps applied before it stay
    /// committed (each is its own transaction) and the remainder is left
    /// pending for the next invocation.
    pub async fn up(&self) -> MigrateResult<UpSummary> {
        self.ledger.acquire_lock().await?;
        let result = self.up_locked().await;
        self.unlock(result).await
    }

    async fn up_locked(&self) -> MigrateResult<UpSummary> {
        let applied = self.ledger.applied_entries().await?;
        let all = self.source.scan(Direction::Up)?;
        self.verify_checksums(&applied, &all);

        let applied_set: HashSet<i64> = applied.iter().map(|e| e.version).collect();
        let pending: Vec<&MigrationFile> = all
            .iter()
            .filter(|m| !applied_set.contains(&m.version))
            .collect();

        if pending.is_empty() {
            info!("no pending migrations");
            return Ok(UpSummary {
                already_applied: applied_set.len(),
                ..UpSummary::default()
            });
        }

        info!(count = pending.len(), "pending migration(s) found");

        let mut applied_versions = Vec::new();
        for &migration in &pending {
            if self.config.steps > 0 && applied_versions.len() >= self.config.steps {
                info!(limit = self.config.steps, "step limit reached, stopping");
                break;
            }

            if self.config.dry_run {
                info!(
                    version = migration.version,
                    file = %migration.filename,
                    "[dry run] would apply"
                );
                applied_versions.push(migration.version);
                continue;
            }

            info!(version = migration.version, file = %migration.filename, "applying");
            self.runner.apply(migration).await?;
            info!(version = migration.version, file = %migration.filename, "applied");
            applied_versions.push(migration.version);
        }

        Ok(UpSummary {
            pending_remaining: if self.config.dry_run {
                pending.len()
            } else {
                pending.len() - applied_versions.len()
            },
            applied_versions,
            already_applied: applied_set.len(),
        })
    }

    /// Roll back exactly the most recently applied version (LIFO).
    ///
    /// Returns the rolled-back version, or `None` when the applied-set is
    /// empty (a no-op, not an error).
    pub async fn down(&self) -> MigrateResult<Option<i64>> {
        self.ledger.acquire_lock().await?;
        let result = self.down_locked().await;
        self.unlock(result).await
    }

    async fn down_locked(&self) -> MigrateResult<Option<i64>> {
        let applied = self.ledger.applied_versions().await?;
        let Some(&last) = applied.last() else {
            info!("no migrations to roll back");
            return Ok(None);
        };

        let down_files = self.source.scan(Direction::Down)?;
        let target = down_files
            .iter()
            .find(|m| m.version == last)
            .ok_or(MigrateError::NotFound {
                version: last,
                direction: Direction::Down,
            })?;

        if self.config.dry_run {
            info!(version = last, file = %target.filename, "[dry run] would roll back");
            return Ok(Some(last));
        }

        info!(version = last, file = %target.filename, "rolling back");
        self.runner.rollback(target).await?;
        info!(version = last, file = %target.filename, "rolled back");
        Ok(Some(last))
    }

    /// Roll back every applied version in reverse application order.
    ///
    /// Requires `force`; without it the command warns and performs no
    /// mutation (success, not an error). A version with no down script is
    /// skipped with a warning and iteration continues.
    pub async fn down_all(&self) -> MigrateResult<DownAllSummary> {
        self.ledger.acquire_lock().await?;
        let result = self.down_all_locked().await;
        self.unlock(result).await
    }

    async fn down_all_locked(&self) -> MigrateResult<DownAllSummary> {
        let applied = self.ledger.applied_versions().await?;
        if applied.is_empty() {
            info!("no migrations to roll back");
            return Ok(DownAllSummary::default());
        }

        if !self.config.force {
            warn!(
                count = applied.len(),
                "this would roll back ALL applied migrations; re-run with --force to confirm"
            );
            return Ok(DownAllSummary::default());
        }

        info!(count = applied.len(), "rolling back all applied migration(s)");

        let down_files = self.source.scan(Direction::Down)?;
        let by_version: HashMap<i64, &MigrationFile> =
            down_files.iter().map(|m| (m.version, m)).collect();

        let mut summary = DownAllSummary::default();
        for &version in applied.iter().rev() {
            let Some(&migration) = by_version.get(&version) else {
                warn!(version, "no down migration found, skipping");
                summary.skipped += 1;
                continue;
            };

            if self.config.dry_run {
                info!(version, file = %migration.filename, "[dry run] would roll back");
                summary.rolled_back_versions.push(version);
                continue;
            }

            info!(version, file = %migration.filename, "rolling back");
            self.runner.rollback(migration).await?;
            info!(version, file = %migration.filename, "rolled back");
            summary.rolled_back_versions.push(version);
        }

        Ok(summary)
    }

    /// Read-only: report every discovered up script as Applied or Pending,
    /// ascending by version.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let applied: HashSet<i64> = self.ledger.applied_versions().await?.into_iter().collect();
        let all = self.source.scan(Direction::Up)?;

        let rows: Vec<StatusRow> = all
            .iter()
            .map(|m| StatusRow {
                version: m.version,
                filename: m.filename.clone(),
                applied: applied.contains(&m.version),
            })
            .collect();

        Ok(StatusReport {
            db_path: self.config.db_path.clone(),
            migrations_dir: self.config.migrations_dir.clone(),
            applied_count: applied.len(),
            total_count: rows.len(),
            rows,
        })
    }

    /// Read-only: the current schema version (highest applied), 0 if none.
    pub async fn version(&self) -> MigrateResult<VersionReport> {
        let applied = self.ledger.applied_versions().await?;
        Ok(VersionReport {
            current: applied.last().copied().unwrap_or(0),
            applied_count: applied.len(),
        })
    }

    /// Warn when an already-applied script's content no longer matches the
    /// checksum recorded at apply time. Drift is reported, not fatal: the
    /// schema already reflects the version that ran.
    fn verify_checksums(&self, applied: &[LedgerEntry], files: &[MigrationFile]) {
        for entry in applied {
            let Some(file) = files.iter().find(|m| m.version == entry.version) else {
                continue;
            };
            match fs::read_to_string(&file.path) {
                Ok(content) => {
                    if checksum(&content) != entry.checksum {
                        warn!(
                            version = entry.version,
                            file = %file.filename,
                            "applied migration has been modified since it was applied"
                        );
                    }
                }
                Err(err) => {
                    warn!(
                        version = entry.version,
                        file = %file.path.display(),
                        error = %err,
                        "could not re-read applied migration for checksum verification"
                    );
                }
            }
        }
    }

    /// Release the advisory lock, preferring the command's own error over
    /// a release failure.
    async fn unlock<T>(&self, result: MigrateResult<T>) -> MigrateResult<T> {
        match self.ledger.release_lock().await {
            Ok(()) => result,
            Err(unlock_err) => match result {
                Ok(_) => Err(unlock_err),
                Err(err) => {
                    warn!(error = %unlock_err, "failed to release migration lock");
                    Err(err)
                }
            },
        }
    }
}
