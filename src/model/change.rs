//! Change records: the unit of synchronization.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use super::table::TrackedTable;

/// Column name -> value. Ordered so serialized records are deterministic.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Kind of row mutation a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parse the stored string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one row mutation.
///
/// `(device_id, sequence)` identifies the record globally. For a change made
/// on this device the origin fields repeat `device_id`/`sequence`; for a
/// change applied from a peer they name the device that originally wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub device_id: String,
    pub sequence: u64,
    pub table: TrackedTable,
    pub row_key: String,
    pub operation: Operation,
    #[serde(default)]
    pub changed_fields: FieldMap,
    /// Unix milliseconds on the origin device.
    pub timestamp: i64,
    pub origin_device_id: String,
    pub origin_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl ChangeRecord {
    /// Whether this record was relayed from another device.
    #[must_use]
    pub fn is_relayed(&self) -> bool {
        self.origin_device_id != self.device_id
    }

    /// The last-writer-wins stamp of this record.
    #[must_use]
    pub fn stamp(&self) -> VersionStamp {
        VersionStamp::new(self.timestamp, &self.origin_device_id)
    }
}

/// Where a captured write came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Made on this device now.
    Local,
    /// Applied from a peer's pack. The stamp and origin are preserved.
    Relayed {
        origin_device_id: String,
        origin_sequence: u64,
        timestamp: i64,
        actor: Option<String>,
    },
}

impl Provenance {
    /// Provenance for applying `record` locally.
    #[must_use]
    pub fn from_record(record: &ChangeRecord) -> Self {
        Self::Relayed {
            origin_device_id: record.origin_device_id.clone(),
            origin_sequence: record.origin_sequence,
            timestamp: record.timestamp,
            actor: record.actor.clone(),
        }
    }
}

/// Comparison key for last-writer-wins: timestamp first, then device id.
///
/// The device id tie-break is arbitrary but identical on every device, so
/// two peers resolving the same pair of writes always pick the same winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStamp {
    pub timestamp: i64,
    pub device_id: String,
}

impl VersionStamp {
    #[must_use]
    pub fn new(timestamp: i64, device_id: &str) -> Self {
        Self {
            timestamp,
            device_id: device_id.to_string(),
        }
    }
}

impl Ord for VersionStamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.device_id.cmp(&other.device_id))
    }
}

impl PartialOrd for VersionStamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
