//! Error types for the migration engine
//!
//! Every internal failure is wrapped with enough operation context
//! (version, filename, phase) to diagnose a partially completed run from
//! the logs alone.

use std::path::PathBuf;

use thiserror::Error;

use crate::source::Direction;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Error taxonomy for migration operations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Bad command, flags, or migration directory contents
    #[error("configuration error: {0}")]
    Config(String),

    /// File read/write or directory scan failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cannot open or ping the database
    #[error("failed to open database {path}: {source}")]
    Connection {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    /// Ledger invariant violated; should not occur under correct
    /// sequential use
    #[error("ledger constraint violated: {0}")]
    Constraint(String),

    /// A migration script's SQL failed to execute
    #[error("migration {version} ({filename}) failed during {phase}: {source}")]
    Execution {
        version: i64,
        filename: String,
        phase: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// An expected paired script is missing
    #[error("no {direction} migration found for version {version}")]
    NotFound { version: i64, direction: Direction },

    /// Another migrator holds the advisory lock
    #[error("another migration run holds the lock (acquired at {acquired_at}); \
             if that run crashed, delete the schema_migrations_lock row manually")]
    Locked { acquired_at: String },

    /// Residual database error outside a migration step
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl MigrateError {
    /// Wrap a filesystem error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
