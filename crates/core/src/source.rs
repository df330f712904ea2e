//! Migration source - discovers migration scripts on disk
//!
//! Recursively walks the migrations directory, parses version, name, and
//! direction out of filenames shaped `<version>_<name>.up.sql` /
//! `<version>_<name>.down.sql`, and returns the result sorted ascending by
//! version regardless of filesystem traversal order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MigrateError, MigrateResult};

/// Which side of a migration pair a script belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Filename suffix selecting scripts of this direction.
    pub fn suffix(self) -> &'static str {
        match self {
            Direction::Up => ".up.sql",
            Direction::Down => ".down.sql",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// One discovered migration script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Version parsed from the filename's leading integer token
    pub version: i64,
    /// Human-readable name (the token between version and suffix)
    pub name: String,
    /// Bare filename, as recorded in the ledger
    pub filename: String,
    /// Full path for reading the script content
    pub path: PathBuf,
    pub direction: Direction,
}

/// Scans a directory tree for migration scripts of one direction.
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Discover all scripts of `direction`, sorted ascending by version.
    ///
    /// Files carrying the direction suffix whose version token does not
    /// parse are skipped with a warning; files without the suffix are not
    /// migration scripts and are ignored without comment. Duplicate version
    /// numbers within a direction are a hard configuration error.
    pub fn scan(&self, direction: Direction) -> MigrateResult<Vec<MigrationFile>> {
        let mut files = Vec::new();
        self.walk(&self.dir, direction, &mut files)?;
        files.sort_by_key(|m| m.version);

        for pair in files.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrateError::Config(format!(
                    "duplicate migration version {} ({} and {})",
                    pair[0].version, pair[0].filename, pair[1].filename
                )));
            }
        }

        Ok(files)
    }

    fn walk(
        &self,
        dir: &Path,
        direction: Direction,
        out: &mut Vec<MigrationFile>,
    ) -> MigrateResult<()> {
        let entries = fs::read_dir(dir).map_err(|e| MigrateError::io(dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| MigrateError::io(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| MigrateError::io(&path, e))?;

            if file_type.is_dir() {
                self.walk(&path, direction, out)?;
                continue;
            }

            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = filename.strip_suffix(direction.suffix()) else {
                continue;
            };

            match parse_stem(stem) {
                Some((version, name)) => out.push(MigrationFile {
                    version,
                    name,
                    filename: filename.clone(),
                    path,
                    direction,
                }),
                None => {
                    warn!(
                        file = %path.display(),
                        "skipping migration file with unparseable version"
                    );
                }
            }
        }

        Ok(())
    }
}

/// Split `<version>_<name>` into its parts; `None` if the shape is wrong.
fn parse_stem(stem: &str) -> Option<(i64, String)> {
    let (version, name) = stem.split_once('_')?;
    let version: i64 = version.parse().ok()?;
    Some((version, name.to_string()))
}
