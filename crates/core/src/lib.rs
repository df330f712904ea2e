//! # schemaflow: versioned SQL schema migrations for SQLite
//!
//! Evolves a relational schema forward and backward through an ordered
//! sequence of versioned `.up.sql` / `.down.sql` script pairs while keeping
//! a durable ledger of applied versions in the database itself.
//!
//! The crate is organized leaf-first:
//! - [`source`]: discovers and orders migration scripts on disk
//! - [`ledger`]: the persisted applied-version table and advisory lock
//! - [`runner`]: executes one script plus its ledger mutation atomically
//! - [`engine`]: orchestrates the up/down/down-all/status/version commands
//! - [`generator`]: scaffolds new migration script pairs

pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod runner;
pub mod source;

// Re-export core types
pub use config::EngineConfig;
pub use engine::{DownAllSummary, MigrationEngine, StatusReport, StatusRow, UpSummary, VersionReport};
pub use error::{MigrateError, MigrateResult};
pub use generator::{CreatedPair, MigrationFileGenerator};
pub use ledger::{LedgerEntry, MigrationLedger};
pub use runner::TransactionalRunner;
pub use source::{Direction, MigrationFile, MigrationSource};
