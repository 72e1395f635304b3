//! Initialize the local issue database.
//!
//! The database lives at `~/.hubsync/data/hubsync.db` unless `--db`,
//! `HUBSYNC_DB` or test mode (`HUBSYNC_TEST_DB=1`) point elsewhere.

use crate::config::{global_dir, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    reinitialized: bool,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns [`Error::AlreadyInitialized`] when the database exists and
/// `force` is not set, or an error if the database cannot be created.
pub fn execute(db_path: Option<&PathBuf>, force: bool, json: bool) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path)).ok_or_else(|| {
        Error::Config("Could not determine global hubsync directory".to_string())
    })?;

    let existed = db_path.exists();
    if existed && !force {
        return Err(Error::AlreadyInitialized { path: db_path });
    }

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    if existed {
        remove_database(&db_path)?;
    }

    // Opening applies the schema.
    SqliteStorage::open(&db_path)?;

    if let Some(base) = global_dir() {
        if db_path.starts_with(&base) {
            let gitignore = base.join(".gitignore");
            if !gitignore.exists() {
                fs::write(&gitignore, "# Everything in ~/.hubsync is local-only\n*\n")?;
            }
        }
    }

    if json {
        let output = InitOutput {
            database: db_path,
            reinitialized: existed,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Initialized hubsync database");
        println!("  Database: {}", db_path.display());
        println!();
        println!("Next: configure a target with `hubsync config set github.repo owner/repo`.");
    }

    Ok(())
}

/// Remove a database file with its WAL side files.
fn remove_database(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            fs::remove_file(side)?;
        }
    }
    Ok(())
}
