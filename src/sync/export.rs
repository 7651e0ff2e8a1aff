//! Pack export.
//!
//! Export is read-only: it slices the local change log after a given
//! sequence and wraps it with a header. Exporting the same range twice
//! yields the same records, so a lost pack can simply be exported again.
//!
//! # Choosing `since`
//!
//! `since` is normally the peer's acknowledged sequence (from the last pack
//! received from that peer), see `since_for_peer`. Exporting from 0 is always
//! safe as long as nothing was pruned; the importer skips what it already has.

use std::path::Path;

use crate::error::Error;
use crate::storage::sqlite::SqliteStorage;
use crate::sync::file::write_pack;
use crate::sync::pack::Pack;
use crate::sync::types::{ExportStats, SyncError, SyncResult};

/// Exporter for pack files.
pub struct Exporter<'a> {
    storage: &'a SqliteStorage,
}

impl<'a> Exporter<'a> {
    /// Create a new exporter.
    #[must_use]
    pub fn new(storage: &'a SqliteStorage) -> Self {
        Self { storage }
    }

    /// Build a pack of every local change record with `sequence > since`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The store is not initialized
    /// - `since` is ahead of the local sequence
    /// - Records after `since` were pruned (`HistoryPruned`)
    pub fn export(&self, since: u64) -> SyncResult<Pack> {
        let identity = self.storage.require_identity()?;
        let local_sequence = self.storage.local_sequence();

        if since > local_sequence {
            return Err(Error::InvalidArgument(format!(
                "--since {since} is ahead of the local sequence {local_sequence}"
            ))
            .into());
        }
        if since < identity.pruned_through {
            return Err(SyncError::HistoryPruned {
                since,
                pruned_through: identity.pruned_through,
            });
        }

        let records = self.storage.changes_since(since, None)?;
        let acknowledged = self.storage.watermarks()?;
        let pack = Pack::new(
            &identity.device_id,
            Some(identity.document_prefix),
            since,
            records,
            acknowledged,
        )?;

        tracing::info!(
            from = pack.header.from_sequence,
            to = pack.header.to_sequence,
            records = pack.header.record_count,
            "Exported pack"
        );
        Ok(pack)
    }

    /// The `since` to use for a peer: what it has acknowledged so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn since_for_peer(&self, peer: &str) -> SyncResult<u64> {
        Ok(self.storage.acknowledged(peer)?)
    }

    /// Export and write the pack to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the export or the write fails.
    pub fn export_to_file(&self, since: u64, path: &Path) -> SyncResult<ExportStats> {
        let pack = self.export(since)?;
        write_pack(path, &pack)?;

        Ok(ExportStats {
            path: path.display().to_string(),
            device_id: pack.header.device_id,
            from_sequence: pack.header.from_sequence,
            to_sequence: pack.header.to_sequence,
            record_count: pack.header.record_count,
            checksum: pack.header.checksum,
        })
    }
}
