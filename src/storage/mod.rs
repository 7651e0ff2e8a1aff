//! SQLite storage layer for gate-sync.
//!
//! This module provides the persistence layer using SQLite with:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - Change capture for every tracked-table mutation
//! - Per-peer sync state
//!
//! # Submodules
//!
//! - [`capture`] - The write path for tracked tables
//! - [`changelog`] - Change record storage
//! - [`identity`] - Device identity and the sequence clock
//! - [`notify`] - "Store changed" notification
//! - [`peers`] - Watermarks and acknowledgements
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation
//! - [`value`] - JSON <-> SQLite value conversion
//! - [`versions`] - Field version stamps and tombstones

pub mod capture;
pub mod changelog;
pub mod identity;
pub mod notify;
pub mod peers;
pub mod schema;
pub mod sqlite;
pub mod value;
pub mod versions;

pub use capture::RowData;
pub use notify::{ChangeNotifier, StoreChanged};
pub use sqlite::{MutationContext, PruneStats, SqliteStorage};
