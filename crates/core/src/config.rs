//! Engine configuration
//!
//! Immutable per invocation; nothing in here is persisted.

use std::path::PathBuf;

/// Configuration for a single engine invocation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite database file (created if missing)
    pub db_path: PathBuf,
    /// Directory containing `.up.sql` / `.down.sql` script pairs
    pub migrations_dir: PathBuf,
    /// Cap on newly applied versions per `up` run (0 = unlimited)
    pub steps: usize,
    /// Verbose logging requested on the command line
    pub verbose: bool,
    /// Confirmation flag required by destructive commands (`down-all`)
    pub force: bool,
    /// Report intended actions without mutating schema or ledger
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/app.db"),
            migrations_dir: PathBuf::from("./migrations"),
            steps: 0,
            verbose: false,
            force: false,
            dry_run: false,
        }
    }
}
