//! Initialize a gate-sync database.
//!
//! Creates the database file (schema is applied on open) and the device
//! identity: a fresh device id, the document prefix and zeroed counters.
//! Run once per device.

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    device_id: String,
    document_prefix: String,
}

/// Execute the init command.
///
/// # Errors
///
/// Returns `AlreadyInitialized` if the database exists and `force` is not
/// set, `InvalidArgument` for a bad prefix, or an IO/database error.
pub fn execute(
    db_path: Option<&PathBuf>,
    prefix: Option<&str>,
    force: bool,
    json: bool,
) -> Result<()> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the database path".to_string()))?;

    if db_path.exists() {
        if !force {
            return Err(Error::AlreadyInitialized { path: db_path });
        }
        remove_database(&db_path)?;
    }

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut storage = SqliteStorage::open(&db_path)?;
    let identity = storage.ensure_identity(prefix)?;

    if json {
        let output = InitOutput {
            database: db_path,
            device_id: identity.device_id,
            document_prefix: identity.document_prefix,
        };
        let payload = serde_json::to_string(&output)?;
        println!("{payload}");
    } else {
        println!("Initialized gate-sync database");
        println!("  Database: {}", db_path.display());
        println!("  Device:   {}", identity.device_id);
        println!("  Prefix:   {}", identity.document_prefix);
        println!();
        println!("Next: record changes with 'gsync record', then 'gsync sync export'.");
    }

    Ok(())
}

/// Remove a database file together with its WAL side files.
fn remove_database(path: &Path) -> Result<()> {
    fs::remove_file(path)?;
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_os_string();
        side.push(suffix);
        let side = PathBuf::from(side);
        if side.exists() {
            fs::remove_file(side)?;
        }
    }
    Ok(())
}
