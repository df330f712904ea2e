//! Migration file generator - scaffolds new up/down script pairs
//!
//! Versions are unix timestamps at creation time, which keeps them
//! practically unique and chronologically ordered.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;

use crate::error::{MigrateError, MigrateResult};

/// Paths of a freshly created migration pair.
#[derive(Debug)]
pub struct CreatedPair {
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Creates paired `.up.sql` / `.down.sql` scaffold files.
pub struct MigrationFileGenerator {
    dir: PathBuf,
}

impl MigrationFileGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Scaffold a migration pair named after `name`, creating the
    /// migrations directory if it does not exist yet.
    pub fn create(&self, name: &str) -> MigrateResult<CreatedPair> {
        let name = name.trim().replace(' ', "_").to_lowercase();
        if name.is_empty() {
            return Err(MigrateError::Config("migration name must not be empty".into()));
        }

        fs::create_dir_all(&self.dir).map_err(|e| MigrateError::io(&self.dir, e))?;

        let version = Utc::now().timestamp();
        let up = self.dir.join(format!("{version}_{name}.up.sql"));
        let down = self.dir.join(format!("{version}_{name}.down.sql"));

        let created = Utc::now().to_rfc3339();
        fs::write(
            &up,
            format!("-- Migration: {name}\n-- Created: {created}\n\n-- Add your UP migration here\n\n"),
        )
        .map_err(|e| MigrateError::io(&up, e))?;
        fs::write(
            &down,
            format!("-- Migration: {name}\n-- Created: {created}\n\n-- Add your DOWN migration here\n\n"),
        )
        .map_err(|e| MigrateError::io(&down, e))?;

        Ok(CreatedPair { up, down })
    }
}
