//! Configuration management.
//!
//! This module resolves the database path, the default actor and default
//! pack file names.
//!
//! # Architecture
//!
//! Each device keeps a single database at `~/.gatesync/data/gatesync.db`
//! holding the business records, the change log and the sync state. Packs
//! are plain files written wherever the user points `-o` (the current
//! directory by default).

use std::path::{Path, PathBuf};

/// Get the global gate-sync directory location (`~/.gatesync/`).
#[must_use]
pub fn global_gatesync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".gatesync"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `GATESYNC_TEST_DB=1` (or any non-empty
/// value other than `0`/`false`). It redirects the database to an isolated
/// test location.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("GATESYNC_TEST_DB")
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Get the test database path: `~/.gatesync/test/gatesync.db`.
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_gatesync_dir().map(|dir| dir.join("test").join("gatesync.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `GATESYNC_TEST_DB` environment variable → uses test database
/// 3. `GATESYNC_DB` environment variable
/// 4. Global location: `~/.gatesync/data/gatesync.db`
///
/// # Returns
///
/// Returns the path to the database file, or `None` if no home directory
/// can be determined.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("GATESYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_gatesync_dir().map(|dir| dir.join("data").join("gatesync.db"))
}

/// Get the default actor name recorded on local changes.
///
/// Priority:
/// 1. `GATESYNC_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var("GATESYNC_ACTOR") {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}

/// Default file name for a pack: `<prefix>-<from>-<to>.gspack.jsonl`.
#[must_use]
pub fn default_pack_name(prefix: &str, from_sequence: u64, to_sequence: u64) -> String {
    format!("{prefix}-{from_sequence}-{to_sequence}.gspack.jsonl")
}
