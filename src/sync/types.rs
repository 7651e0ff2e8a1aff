//! Sync types for pack export/import.
//!
//! This module defines the reports produced by the merge engine, the status
//! summary, and the sync error type.

use serde::Serialize;

use crate::error::Error;
use crate::model::TrackedTable;

/// Why an incoming record was not (fully) applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Local values carry a newer stamp for some or all fields.
    LocalNewer,
    /// The row was deleted; inserts and updates never bring it back.
    Tombstoned,
    /// An update for a row this device never had.
    RowMissing,
    /// A referenced parent row is missing.
    ForeignKey,
    /// The invoice number already exists here.
    DuplicateDocumentNumber,
    /// Any other constraint the store refused.
    Constraint,
}

impl IssueKind {
    /// Failures are records the store refused; everything else is a
    /// conflict. A duplicate document number is a configuration problem
    /// (two devices sharing a prefix), so it is reported as a conflict.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::ForeignKey | Self::Constraint)
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LocalNewer => "local newer",
            Self::Tombstoned => "deleted",
            Self::RowMissing => "row missing",
            Self::ForeignKey => "foreign key",
            Self::DuplicateDocumentNumber => "duplicate document number",
            Self::Constraint => "constraint",
        };
        f.write_str(s)
    }
}

/// A conflict or failure for one incoming record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordIssue {
    /// Sequence of the record in the source pack.
    pub sequence: u64,
    pub table: TrackedTable,
    pub row_key: String,
    pub kind: IssueKind,
    pub detail: String,
}

/// Outcome of importing one pack.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MergeReport {
    /// Device that exported the pack.
    pub source_device: String,
    /// Records in the pack.
    pub received: usize,
    /// Records that changed local state (fully or for some fields).
    pub applied: usize,
    /// Records already seen or already in effect.
    pub duplicates: usize,
    /// Inserts/updates skipped because the same pack deletes the row later.
    pub superseded: usize,
    pub conflicts: Vec<RecordIssue>,
    pub failures: Vec<RecordIssue>,
    pub previous_watermark: u64,
    pub new_watermark: u64,
    /// Change records written locally by this import.
    pub captured: usize,
    /// Set when the source device uses the same document prefix.
    pub prefix_collision: Option<String>,
}

impl MergeReport {
    /// Returns true if nothing in the pack changed local state.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied == 0
    }
}

/// Summary of a written pack.
#[derive(Debug, Clone, Serialize)]
pub struct ExportStats {
    pub path: String,
    pub device_id: String,
    pub from_sequence: u64,
    pub to_sequence: u64,
    pub record_count: usize,
    pub checksum: Option<String>,
}

/// Sync state of one peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerStatus {
    pub device_id: String,
    /// Highest sequence of the peer's log applied here.
    pub watermark: u64,
    /// Highest local sequence the peer reported applying.
    pub acknowledged: u64,
    /// Local change records the peer has not acknowledged.
    pub pending: usize,
}

/// Sync status information.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub device_id: String,
    pub document_prefix: String,
    pub local_sequence: u64,
    pub document_counter: u64,
    /// Change records currently held.
    pub change_count: usize,
    pub pruned_through: u64,
    pub tombstones: usize,
    pub peers: Vec<PeerStatus>,
}

/// Sync-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Error from the store while applying or reading records.
    #[error(transparent)]
    Store(Box<Error>),

    /// The pack failed structural validation; nothing was applied.
    #[error("Malformed pack at line {line}: {message}")]
    MalformedPack {
        /// Line number (1-indexed; 0 when not tied to a line).
        line: usize,
        /// Error message.
        message: String,
    },

    /// The pack was exported by this device.
    #[error("Pack was exported by this device ({device_id})")]
    SelfImport { device_id: String },

    /// Applying the pack would skip records of the peer's log.
    #[error(
        "missing history from {peer}: pack starts at {from_sequence} but only {watermark} was applied"
    )]
    MissingHistory {
        peer: String,
        from_sequence: u64,
        watermark: u64,
    },

    /// Records after `since` were already pruned.
    #[error("history pruned: records through {pruned_through} are gone, cannot export since {since}")]
    HistoryPruned { since: u64, pruned_through: u64 },

    /// Pack file not found.
    #[error("Pack file not found: {0}")]
    FileNotFound(String),
}

impl SyncError {
    pub(crate) fn malformed(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedPack {
            line,
            message: message.into(),
        }
    }
}

impl From<Error> for SyncError {
    fn from(err: Error) -> Self {
        Self::Store(Box::new(err))
    }
}

impl From<SyncError> for Error {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Io(e) => Self::Io(e),
            SyncError::Json(e) => Self::Json(e),
            SyncError::Database(e) => Self::Database(e),
            SyncError::Store(e) => *e,
            SyncError::MalformedPack { line, message } => {
                Self::MalformedPack(format!("line {line}: {message}"))
            }
            SyncError::SelfImport { .. }
            | SyncError::MissingHistory { .. }
            | SyncError::HistoryPruned { .. }
            | SyncError::FileNotFound(_) => Self::Sync(err.to_string()),
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
