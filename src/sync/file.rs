//! Atomic pack file operations.
//!
//! Packs are written to a temporary file, synced to disk, then renamed over
//! the target, so a reader never sees a half-written pack.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::sync::pack::{decode_pack, encode_pack, Pack};
use crate::sync::types::{SyncError, SyncResult};

/// Write content to a file atomically.
///
/// This function:
/// 1. Writes content to a temporary file (same path with `.tmp` appended)
/// 2. Calls `fsync` to ensure data is on disk
/// 3. Atomically renames the temp file to the target path
///
/// If any step fails, the original file (if any) remains untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &[u8]) -> SyncResult<()> {
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // Write to temp file
    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        // Sync to disk before rename
        writer.get_ref().sync_all()?;
    }

    // Atomic rename
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Write a pack file atomically.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub fn write_pack(path: &Path, pack: &Pack) -> SyncResult<()> {
    let mut content = Vec::new();
    encode_pack(&mut content, pack)?;
    atomic_write(path, &content)
}

/// Read a pack file. The pack is parsed but not validated.
///
/// # Errors
///
/// Returns `FileNotFound`, or `MalformedPack` for unparseable content.
pub fn read_pack(path: &Path) -> SyncResult<Pack> {
    if !path.exists() {
        return Err(SyncError::FileNotFound(path.display().to_string()));
    }

    let file = File::open(path)?;
    decode_pack(BufReader::new(file))
}

/// Get the size of a file in bytes.
///
/// Returns 0 if the file doesn't exist.
#[must_use]
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test.gspack.jsonl");

        atomic_write(&path, b"line 1\nline 2\n").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "line 1\nline 2\n");
        assert!(!temp_dir.path().join("nested").join("test.gspack.jsonl.tmp").exists());
    }

    #[test]
    fn test_write_and_read_pack() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("A-1-0.gspack.jsonl");
        let pack = Pack::new("dev-a", Some("A".into()), 0, Vec::new(), BTreeMap::new()).unwrap();

        write_pack(&path, &pack).unwrap();
        assert!(file_size(&path) > 0);

        let read = read_pack(&path).unwrap();
        assert_eq!(read, pack);
    }

    #[test]
    fn test_file_not_found() {
        let result = read_pack(Path::new("/nonexistent/file.gspack.jsonl"));
        assert!(matches!(result, Err(SyncError::FileNotFound(_))));
    }
}
