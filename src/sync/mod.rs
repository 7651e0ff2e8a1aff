//! Pack-based sync between devices.
//!
//! Devices exchange packs: slices of a device's change log written as
//! newline-delimited JSON and carried by any means (USB stick, shared
//! folder, mail attachment). There is no server and no network code here.
//!
//! - **Export**: local change log after `since` → pack
//! - **Import**: pack → validation, deduplication, per-record merge
//! - **Merge**: field-level last-writer-wins, terminal deletes
//! - **Status**: watermarks, acknowledgements and pending records per peer
//!
//! # Architecture
//!
//! Every device keeps, per peer, a watermark (the highest sequence of that
//! peer's log applied here). Records at or below the watermark are skipped,
//! so importing the same pack twice is a no-op. Whatever an import changes
//! is captured into the local log with its origin preserved, so a device
//! can relay changes between peers that never exchange packs directly.
//!
//! # Example
//!
//! ```ignore
//! use gate_sync::sync::{Exporter, Importer};
//!
//! let pack = Exporter::new(&laptop).export(0)?;
//! let report = Importer::new(&mut desktop).import(&pack)?;
//! println!("applied {}", report.applied);
//! ```

mod export;
mod file;
mod hash;
mod import;
mod merge;
mod pack;
mod status;
mod types;

// Re-export main types and functions
pub use export::Exporter;
pub use file::{atomic_write, file_size, read_pack, write_pack};
pub use hash::{lines_checksum, records_checksum};
pub use import::Importer;
pub use merge::{apply_record, Doomed, Resolution};
pub use pack::{decode_pack, encode_pack, Pack, PackHeader, PACK_FORMAT_VERSION};
pub use status::{format_size, get_sync_status, print_merge_report, print_status};
pub use types::{
    ExportStats, IssueKind, MergeReport, PeerStatus, RecordIssue, SyncError, SyncResult,
    SyncStatus,
};
