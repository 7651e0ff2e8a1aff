//! Command implementations.

pub mod completions;
pub mod identity;
pub mod init;
pub mod record;
pub mod sync;
pub mod version;

use crate::config::{default_actor, resolve_db_path};
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use std::path::PathBuf;

/// Open the store for a command that needs an initialized database.
///
/// The actor is the `--actor` flag, or the default actor when absent.
pub(crate) fn open_storage(db_path: Option<&PathBuf>, actor: Option<&str>) -> Result<SqliteStorage> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Could not determine the database path".to_string()))?;

    if !db_path.exists() {
        return Err(Error::NotInitialized);
    }

    let mut storage = SqliteStorage::open(&db_path)?;
    storage.set_actor(Some(actor.map_or_else(default_actor, str::to_string)));
    Ok(storage)
}
