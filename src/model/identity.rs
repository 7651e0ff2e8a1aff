//! Device identity model.
//!
//! Each installation has exactly one identity. The device id names the origin
//! of every change record; the document prefix namespaces business document
//! numbers (e.g., "A" -> A-0001, A-0002) so two devices never mint the same
//! number as long as their prefixes differ.

use serde::{Deserialize, Serialize};

/// Minimum width of the numeric part of a document number.
pub const DOCUMENT_NUMBER_WIDTH: usize = 4;

/// The persisted identity of this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Globally unique, random, set once.
    pub device_id: String,

    /// Namespace for document numbers; user-editable.
    pub document_prefix: String,

    /// Last sequence handed to a captured change (0 = none yet).
    pub local_sequence: u64,

    /// Last document number counter issued (0 = none yet).
    pub document_counter: u64,

    /// Highest local sequence removed by pruning.
    pub pruned_through: u64,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl DeviceIdentity {
    /// Create a fresh identity with a random device id.
    ///
    /// Without an explicit prefix, the first four hex digits of the device id
    /// are used.
    #[must_use]
    pub fn generate(prefix: Option<&str>) -> Self {
        let device_id = uuid::Uuid::new_v4().to_string();
        let document_prefix = prefix.map_or_else(|| default_prefix(&device_id), str::to_string);

        Self {
            device_id,
            document_prefix,
            local_sequence: 0,
            document_counter: 0,
            pruned_through: 0,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Format a document number for the given counter value.
    #[must_use]
    pub fn document_number(&self, counter: u64) -> String {
        format_document_number(&self.document_prefix, counter)
    }
}

/// Derive a prefix from a device id.
#[must_use]
pub fn default_prefix(device_id: &str) -> String {
    device_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .collect::<String>()
        .to_uppercase()
}

/// `PREFIX-NNNN`, zero padded to four digits and wider when needed.
#[must_use]
pub fn format_document_number(prefix: &str, counter: u64) -> String {
    format!("{prefix}-{counter:0width$}", width = DOCUMENT_NUMBER_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_identity() {
        let identity = DeviceIdentity::generate(Some("A"));
        assert_eq!(identity.document_prefix, "A");
        assert_eq!(identity.local_sequence, 0);
        assert!(uuid::Uuid::parse_str(&identity.device_id).is_ok());

        let other = DeviceIdentity::generate(Some("A"));
        assert_ne!(identity.device_id, other.device_id);
    }

    #[test]
    fn test_default_prefix_from_device_id() {
        assert_eq!(default_prefix("3fa85f64-5717-4562"), "3FA8");

        let identity = DeviceIdentity::generate(None);
        assert_eq!(identity.document_prefix.len(), 4);
    }

    #[test]
    fn test_document_number_format() {
        assert_eq!(format_document_number("A", 1), "A-0001");
        assert_eq!(format_document_number("LAP", 42), "LAP-0042");
        assert_eq!(format_document_number("B", 12345), "B-12345");
    }
}
