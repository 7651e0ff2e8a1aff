//! Sync command implementations (pack export/import).
//!
//! Packs are written to the current directory unless `-o` says otherwise and
//! can be carried to the other device by any means.

use crate::cli::commands::open_storage;
use crate::cli::commands::record::print_change;
use crate::cli::SyncCommands;
use crate::config::default_pack_name;
use crate::error::Result;
use crate::sync::{
    file_size, format_size, get_sync_status, print_merge_report, print_status, write_pack,
    ExportStats, Exporter, Importer,
};
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Execute sync commands.
///
/// # Errors
///
/// Returns an error if the store is not initialized or the sync operation
/// fails.
pub fn execute(
    command: &SyncCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    match command {
        SyncCommands::Export {
            since,
            peer,
            output,
        } => export(*since, peer.as_deref(), output.as_deref(), db_path, actor, json),
        SyncCommands::Import { file } => import(file, db_path, actor, json),
        SyncCommands::Status => status(db_path, actor, json),
        SyncCommands::Log { since, limit } => log(*since, *limit, db_path, actor, json),
        SyncCommands::Prune => prune(db_path, actor, json),
    }
}

fn export(
    since: Option<u64>,
    peer: Option<&str>,
    output: Option<&Path>,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path, actor)?;
    let exporter = Exporter::new(&storage);

    let since = match (since, peer) {
        (Some(since), _) => since,
        (None, Some(peer)) => exporter.since_for_peer(peer)?,
        (None, None) => 0,
    };

    let pack = exporter.export(since)?;
    let path = output.map_or_else(
        || {
            let prefix = pack.header.document_prefix.as_deref().unwrap_or("pack");
            PathBuf::from(default_pack_name(
                prefix,
                pack.header.from_sequence,
                pack.header.to_sequence,
            ))
        },
        Path::to_path_buf,
    );
    write_pack(&path, &pack)?;

    let stats = ExportStats {
        path: path.display().to_string(),
        device_id: pack.header.device_id,
        from_sequence: pack.header.from_sequence,
        to_sequence: pack.header.to_sequence,
        record_count: pack.header.record_count,
        checksum: pack.header.checksum,
    };

    if json {
        let output = serde_json::json!({
            "success": true,
            "stats": stats,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else if stats.record_count == 0 {
        println!("No changes after sequence {since}; wrote an empty pack.");
        println!("  Location: {}", stats.path);
    } else {
        println!(
            "{} {} records ({}..={})",
            "Exported".green().bold(),
            stats.record_count,
            stats.from_sequence,
            stats.to_sequence
        );
        println!("  Location: {} ({})", stats.path, format_size(file_size(&path)));
    }
    Ok(())
}

fn import(file: &Path, db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path, actor)?;
    let mut importer = Importer::new(&mut storage);

    let report = if file.as_os_str() == "-" {
        importer.import_reader(std::io::stdin().lock())?
    } else {
        importer.import_file(file)?
    };

    if json {
        let output = serde_json::json!({
            "success": true,
            "report": report,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        print_merge_report(&report);
    }
    Ok(())
}

fn status(db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let storage = open_storage(db_path, actor)?;
    let sync_status = get_sync_status(&storage)?;

    if json {
        println!("{}", serde_json::to_string(&sync_status)?);
    } else {
        print_status(&sync_status);
    }
    Ok(())
}

fn log(
    since: u64,
    limit: Option<u32>,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let storage = open_storage(db_path, actor)?;
    let changes = storage.changes_since(since, limit)?;

    if json {
        println!("{}", serde_json::to_string(&changes)?);
    } else if changes.is_empty() {
        println!("{}", format!("No change records after {since}.").dimmed());
    } else {
        for change in &changes {
            print_change(change);
        }
    }
    Ok(())
}

fn prune(db_path: Option<&PathBuf>, actor: Option<&str>, json: bool) -> Result<()> {
    let mut storage = open_storage(db_path, actor)?;
    let stats = storage.prune_acknowledged()?;

    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else if stats.peers == 0 {
        println!("No known peers; nothing pruned.");
    } else {
        println!(
            "Pruned {} change records (now through {}, {} peers).",
            stats.removed, stats.pruned_through, stats.peers
        );
    }
    Ok(())
}
