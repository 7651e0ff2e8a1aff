//! Sync status display.
//!
//! This module reports the device identity, the local log and, for every
//! known peer, how far each side has got.

use colored::Colorize;

use crate::storage::changelog::count_changes_since;
use crate::storage::sqlite::SqliteStorage;
use crate::sync::types::{MergeReport, PeerStatus, SyncResult, SyncStatus};

/// Get the current sync status.
///
/// Peers are the devices this store imported from or received an
/// acknowledgement from. `pending` counts local records a peer has not
/// acknowledged yet.
///
/// # Errors
///
/// Returns an error if the store is not initialized or a query fails.
pub fn get_sync_status(storage: &SqliteStorage) -> SyncResult<SyncStatus> {
    let identity = storage.require_identity()?;
    let watermarks = storage.watermarks()?;
    let acks = storage.acknowledgements()?;

    let mut peer_ids: Vec<&String> = watermarks.keys().chain(acks.keys()).collect();
    peer_ids.sort();
    peer_ids.dedup();

    let mut peers = Vec::with_capacity(peer_ids.len());
    for peer in peer_ids {
        let acknowledged = acks.get(peer).copied().unwrap_or(0);
        peers.push(PeerStatus {
            device_id: peer.clone(),
            watermark: watermarks.get(peer).copied().unwrap_or(0),
            acknowledged,
            pending: count_changes_since(storage.conn(), acknowledged)?,
        });
    }

    Ok(SyncStatus {
        device_id: identity.device_id,
        document_prefix: identity.document_prefix,
        local_sequence: storage.local_sequence(),
        document_counter: identity.document_counter,
        change_count: storage.change_count()?,
        pruned_through: identity.pruned_through,
        tombstones: storage.tombstone_count()?,
        peers,
    })
}

/// Print sync status to stdout in a human-readable format.
pub fn print_status(status: &SyncStatus) {
    println!("{}", "Sync Status".bold().underline());
    println!();

    println!("{}", "This Device:".blue().bold());
    println!("  Device:          {}", status.device_id);
    println!("  Prefix:          {}", status.document_prefix);
    println!("  Local sequence:  {}", status.local_sequence);
    println!("  Documents:       {}", status.document_counter);
    println!();

    println!("{}", "Change Log:".blue().bold());
    println!("  Records:         {}", status.change_count);
    if status.pruned_through > 0 {
        println!("  Pruned through:  {}", status.pruned_through);
    }
    println!("  Tombstones:      {}", status.tombstones);
    println!();

    if status.peers.is_empty() {
        println!("{}", "No peers yet.".dimmed());
        println!(
            "{}",
            "Run 'gsync sync export' and import the pack on another device.".dimmed()
        );
        return;
    }

    println!("{}", "Peers:".blue().bold());
    for peer in &status.peers {
        let pending = if peer.pending == 0 {
            "up to date".green().to_string()
        } else {
            format!("{} pending", peer.pending).yellow().to_string()
        };
        println!(
            "  {}  applied through {}, acknowledged {}, {}",
            short_id(&peer.device_id).cyan(),
            peer.watermark,
            peer.acknowledged,
            pending
        );
    }
}

/// Print the outcome of an import.
pub fn print_merge_report(report: &MergeReport) {
    println!(
        "{} {} from {}",
        "Imported".green().bold(),
        report.received,
        short_id(&report.source_device).cyan()
    );
    println!("  Applied:     {}", report.applied);
    println!("  Duplicates:  {}", report.duplicates);
    if report.superseded > 0 {
        println!("  Superseded:  {}", report.superseded);
    }
    println!(
        "  Watermark:   {} -> {}",
        report.previous_watermark, report.new_watermark
    );

    if !report.conflicts.is_empty() {
        println!();
        println!("{}", "Conflicts:".yellow().bold());
        for issue in &report.conflicts {
            println!(
                "  #{} {}/{}: {} ({})",
                issue.sequence, issue.table, issue.row_key, issue.kind, issue.detail
            );
        }
    }
    if !report.failures.is_empty() {
        println!();
        println!("{}", "Failures:".red().bold());
        for issue in &report.failures {
            println!(
                "  #{} {}/{}: {}",
                issue.sequence, issue.table, issue.row_key, issue.detail
            );
        }
    }
    if let Some(prefix) = &report.prefix_collision {
        println!();
        println!(
            "{} the exporting device also uses prefix '{}'. Run 'gsync identity set-prefix' on one of them.",
            "Warning:".yellow().bold(),
            prefix
        );
    }
}

/// Format a byte size as a human-readable string.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// First block of a UUID device id.
fn short_id(device_id: &str) -> &str {
    device_id.split('-').next().unwrap_or(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldMap, TrackedTable};
    use crate::sync::{Exporter, Importer};
    use serde_json::json;

    fn device(prefix: &str) -> SqliteStorage {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.ensure_identity(Some(prefix)).unwrap();
        storage
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("3f2a9c1e-0000-4000-8000-000000000000"), "3f2a9c1e");
        assert_eq!(short_id("plain"), "plain");
    }

    #[test]
    fn test_status_fresh_store() {
        let storage = device("A");
        let status = get_sync_status(&storage).unwrap();
        assert_eq!(status.document_prefix, "A");
        assert_eq!(status.local_sequence, 0);
        assert_eq!(status.change_count, 0);
        assert!(status.peers.is_empty());
    }

    #[test]
    fn test_status_requires_identity() {
        let storage = SqliteStorage::open_memory().unwrap();
        assert!(get_sync_status(&storage).is_err());
    }

    #[test]
    fn test_status_tracks_peers() {
        let mut a = device("A");
        let mut b = device("B");
        let name = FieldMap::from([("name".to_string(), json!("Acme"))]);
        a.insert_row(TrackedTable::Companies, Some("co1"), &name).unwrap();
        a.insert_row(TrackedTable::Companies, Some("co2"), &name).unwrap();

        let pack = Exporter::new(&a).export(0).unwrap();
        Importer::new(&mut b).import(&pack).unwrap();

        let status = get_sync_status(&b).unwrap();
        assert_eq!(status.peers.len(), 1);
        assert_eq!(status.peers[0].watermark, 2);
        assert_eq!(status.peers[0].acknowledged, 0);
        // b relayed both records and a has acknowledged none of them
        assert_eq!(status.peers[0].pending, 2);

        let back = Exporter::new(&b).export(0).unwrap();
        Importer::new(&mut a).import(&back).unwrap();
        let status = get_sync_status(&a).unwrap();
        assert_eq!(status.peers[0].acknowledged, 2);
        assert_eq!(status.peers[0].pending, 0);
    }
}
