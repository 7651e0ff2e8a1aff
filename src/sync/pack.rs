//! The pack file format.
//!
//! A pack is newline-delimited JSON: one header line followed by one change
//! record per line in ascending sequence order. Blank lines are ignored.
//!
//! ```json
//! {"format_version":1,"device_id":"…","from_sequence":1,"to_sequence":2,"record_count":2,...}
//! {"device_id":"…","sequence":1,"table":"contacts","row_key":"…","operation":"insert",...}
//! {"device_id":"…","sequence":2,"table":"contacts","row_key":"…","operation":"update",...}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, ErrorKind, Write};

use crate::model::ChangeRecord;
use crate::sync::hash::records_checksum;
use crate::sync::types::{SyncError, SyncResult};

/// Current pack format version.
pub const PACK_FORMAT_VERSION: u32 = 1;

/// Sequences are stored as SQLite INTEGER.
const MAX_SEQUENCE: u64 = i64::MAX.unsigned_abs();

fn default_format_version() -> u32 {
    PACK_FORMAT_VERSION
}

/// First line of a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackHeader {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Device whose log the records come from.
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_prefix: Option<String>,
    pub from_sequence: u64,
    /// `from_sequence - 1` for an empty pack.
    pub to_sequence: u64,
    pub record_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
    /// The exporter's watermarks: for each device, the highest sequence of
    /// that device's log the exporter has applied.
    #[serde(default)]
    pub acknowledged: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A header plus its records.
#[derive(Debug, Clone, PartialEq)]
pub struct Pack {
    pub header: PackHeader,
    pub records: Vec<ChangeRecord>,
}

impl Pack {
    /// Build a pack covering the records after `since`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checksum cannot be computed.
    pub fn new(
        device_id: &str,
        document_prefix: Option<String>,
        since: u64,
        records: Vec<ChangeRecord>,
        acknowledged: BTreeMap<String, u64>,
    ) -> SyncResult<Self> {
        let record_count = records.len();
        let header = PackHeader {
            format_version: PACK_FORMAT_VERSION,
            device_id: device_id.to_string(),
            document_prefix,
            from_sequence: since + 1,
            to_sequence: since + record_count as u64,
            record_count,
            exported_at: Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            acknowledged,
            checksum: Some(records_checksum(&records)?),
        };
        Ok(Self { header, records })
    }

    /// Whether the pack carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check the pack is structurally sound.
    ///
    /// The declared range must be covered completely, every record must
    /// belong to the exporting device, and every column must exist.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPack` naming the first problem found.
    pub fn validate(&self) -> SyncResult<()> {
        let header = &self.header;

        if header.format_version != PACK_FORMAT_VERSION {
            return Err(SyncError::malformed(
                1,
                format!("unsupported format_version {}", header.format_version),
            ));
        }
        if header.device_id.trim().is_empty() {
            return Err(SyncError::malformed(1, "header device_id is empty"));
        }
        if header.from_sequence == 0 {
            return Err(SyncError::malformed(1, "from_sequence must be at least 1"));
        }
        if header.record_count != self.records.len() {
            return Err(SyncError::malformed(
                1,
                format!(
                    "record_count is {} but the pack holds {} records",
                    header.record_count,
                    self.records.len()
                ),
            ));
        }
        let expected_to = header
            .from_sequence
            .checked_add(header.record_count as u64)
            .map(|end| end - 1)
            .filter(|&to| to <= MAX_SEQUENCE)
            .ok_or_else(|| SyncError::malformed(1, "sequence range overflows"))?;
        if header.to_sequence != expected_to {
            return Err(SyncError::malformed(
                1,
                format!(
                    "range {}..={} does not match {} records",
                    header.from_sequence, header.to_sequence, header.record_count
                ),
            ));
        }

        for (i, (expected, record)) in (header.from_sequence..).zip(&self.records).enumerate() {
            let line = i + 2;
            if record.device_id != header.device_id {
                return Err(SyncError::malformed(
                    line,
                    format!("record from {} in a pack from {}", record.device_id, header.device_id),
                ));
            }
            if record.sequence != expected {
                return Err(SyncError::malformed(
                    line,
                    format!("expected sequence {expected}, found {}", record.sequence),
                ));
            }
            if record.origin_sequence > MAX_SEQUENCE {
                return Err(SyncError::malformed(line, "origin_sequence out of range"));
            }
            if record.origin_device_id.trim().is_empty() {
                return Err(SyncError::malformed(line, "origin_device_id is empty"));
            }
            if !record.is_relayed() && record.origin_sequence != record.sequence {
                return Err(SyncError::malformed(
                    line,
                    "origin_sequence of a local record must equal its sequence",
                ));
            }
            record
                .table
                .check_columns(record.changed_fields.keys())
                .map_err(|e| SyncError::malformed(line, e.to_string()))?;
        }

        if let Some(expected) = &header.checksum {
            let actual = records_checksum(&self.records)?;
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(SyncError::malformed(1, "checksum does not match the records"));
            }
        }

        Ok(())
    }
}

/// Write a pack to any byte stream.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn encode_pack<W: Write>(mut writer: W, pack: &Pack) -> SyncResult<()> {
    serde_json::to_writer(&mut writer, &pack.header)?;
    writer.write_all(b"\n")?;
    for record in &pack.records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a pack from any byte stream.
///
/// Only parses; call `Pack::validate` before trusting the contents.
///
/// # Errors
///
/// Returns `MalformedPack` with the offending line for unparseable input.
pub fn decode_pack<R: BufRead>(reader: R) -> SyncResult<Pack> {
    let mut header: Option<PackHeader> = None;
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line_no = line_num + 1;
        let line = line_result.map_err(|e| {
            if e.kind() == ErrorKind::InvalidData {
                SyncError::malformed(line_no, "not valid UTF-8")
            } else {
                SyncError::Io(e)
            }
        })?;
        if line.trim().is_empty() {
            continue;
        }

        if header.is_none() {
            let parsed = serde_json::from_str(&line)
                .map_err(|e| SyncError::malformed(line_no, format!("invalid header: {e}")))?;
            header = Some(parsed);
        } else {
            let record = serde_json::from_str(&line)
                .map_err(|e| SyncError::malformed(line_no, format!("invalid record: {e}")))?;
            records.push(record);
        }
    }

    let header = header.ok_or_else(|| SyncError::malformed(0, "pack has no header"))?;
    Ok(Pack { header, records })
}
