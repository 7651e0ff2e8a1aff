//! Pack checksums.
//!
//! A pack's checksum is the SHA256 of its record lines, each terminated by
//! `\n`, as lower-case hex. The header line is not covered.

use sha2::{Digest, Sha256};

use crate::model::ChangeRecord;
use crate::sync::types::SyncResult;

/// SHA256 over the given lines, each followed by a newline.
#[must_use]
pub fn lines_checksum<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Checksum of records as they are written to a pack.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn records_checksum(records: &[ChangeRecord]) -> SyncResult<String> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines_checksum(lines.iter().map(String::as_str)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldMap, Operation, TrackedTable};

    fn record(sequence: u64, phone: &str) -> ChangeRecord {
        ChangeRecord {
            device_id: "dev-a".into(),
            sequence,
            table: TrackedTable::Contacts,
            row_key: "c1".into(),
            operation: Operation::Update,
            changed_fields: FieldMap::from([("phone".to_string(), phone.into())]),
            timestamp: 1_000,
            origin_device_id: "dev-a".into(),
            origin_sequence: sequence,
            actor: None,
        }
    }

    #[test]
    fn test_checksum_known_value() {
        // sha256("") is the well-known empty digest
        assert_eq!(
            lines_checksum(std::iter::empty()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(lines_checksum(["a"]).len(), 64);
        assert_ne!(lines_checksum(["a", "b"]), lines_checksum(["ab"]));
    }

    #[test]
    fn test_records_checksum_changes_with_content() {
        let one = records_checksum(&[record(1, "555-1000")]).unwrap();
        let same = records_checksum(&[record(1, "555-1000")]).unwrap();
        let other = records_checksum(&[record(1, "555-2000")]).unwrap();
        assert_eq!(one, same);
        assert_ne!(one, other);
    }
}
