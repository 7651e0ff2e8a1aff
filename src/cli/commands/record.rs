//! Record command implementations.
//!
//! Every mutation here goes through the store's capture layer, so each row
//! change lands in the change log and will be part of the next export.

use crate::cli::commands::open_storage;
use crate::cli::RecordCommands;
use crate::error::{Error, Result};
use crate::model::{ChangeRecord, TrackedTable};
use crate::storage::SqliteStorage;
use crate::validate::{find_similar_keys, parse_assignments, parse_table};
use colored::Colorize;
use std::path::PathBuf;

/// Execute record commands.
///
/// # Errors
///
/// Returns an error for unknown tables or columns, missing rows, foreign key
/// violations, or if the store is not initialized.
pub fn execute(
    command: &RecordCommands,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut storage = open_storage(db_path, actor)?;

    match command {
        RecordCommands::Insert { table, key, values } => {
            let table = parse_table(table)?;
            let fields = parse_assignments(table, values)?;
            let change = storage.insert_row(table, key.as_deref(), &fields)?;
            print_changes(&[change], json)
        }
        RecordCommands::Update { table, key, values } => {
            let table = parse_table(table)?;
            let fields = parse_assignments(table, values)?;
            let updated = storage
                .update_row(table, key, &fields)
                .map_err(|e| with_suggestions(&storage, e))?;
            match updated {
                Some(change) => print_changes(&[change], json),
                None => {
                    if json {
                        println!("{}", serde_json::json!({ "changes": [] }));
                    } else {
                        println!("No change: values already match.");
                    }
                    Ok(())
                }
            }
        }
        RecordCommands::Delete { table, key } => {
            let table = parse_table(table)?;
            let changes = storage
                .delete_row(table, key)
                .map_err(|e| with_suggestions(&storage, e))?;
            print_changes(&changes, json)
        }
        RecordCommands::Get { table, key } => {
            let table = parse_table(table)?;
            let row = storage
                .get_row(table, key)?
                .ok_or_else(|| {
                    with_suggestions(
                        &storage,
                        Error::RowNotFound {
                            table: table.to_string(),
                            row_key: key.clone(),
                        },
                    )
                })?;
            if json {
                println!("{}", serde_json::json!({ "row_key": key, "fields": row }));
            } else {
                println!("{}", format!("{table}/{key}").bold());
                for (column, value) in &row {
                    println!("  {column:<12} {value}");
                }
            }
            Ok(())
        }
        RecordCommands::List { table, limit } => {
            let table = parse_table(table)?;
            let rows = storage.list_rows(table, *limit)?;
            if json {
                println!("{}", serde_json::to_string(&rows)?);
            } else if rows.is_empty() {
                println!("{}", format!("No rows in {table}.").dimmed());
            } else {
                for row in &rows {
                    println!("{}  {}", row.row_key.cyan(), summary(table, &row.fields));
                }
            }
            Ok(())
        }
        RecordCommands::History { table, key } => {
            let table = parse_table(table)?;
            let history = storage.row_history(table, key)?;
            if json {
                println!("{}", serde_json::to_string(&history)?);
            } else if history.is_empty() {
                println!("{}", format!("No history for {table}/{key}.").dimmed());
            } else {
                for change in &history {
                    print_change(change);
                }
            }
            Ok(())
        }
        RecordCommands::Invoice { deal_id, values } => {
            let fields = parse_assignments(TrackedTable::Invoices, values)?;
            let change = storage.create_invoice(deal_id, &fields)?;
            if json {
                println!("{}", serde_json::to_string(&change)?);
            } else {
                let number = change
                    .changed_fields
                    .get("number")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                println!("Created invoice {} ({})", number.bold(), change.row_key);
            }
            Ok(())
        }
    }
}

/// Attach "did you mean" keys to a missing-row error.
fn with_suggestions(storage: &SqliteStorage, err: Error) -> Error {
    let Error::RowNotFound { table, row_key } = err else {
        return err;
    };
    let similar = parse_table(&table)
        .and_then(|t| storage.row_keys(t))
        .map(|keys| find_similar_keys(&row_key, &keys, 3))
        .unwrap_or_default();
    if similar.is_empty() {
        Error::RowNotFound { table, row_key }
    } else {
        Error::RowNotFoundSimilar {
            table,
            row_key,
            similar,
        }
    }
}

fn print_changes(changes: &[ChangeRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "changes": changes }));
    } else {
        for change in changes {
            print_change(change);
        }
    }
    Ok(())
}

/// One line per change record.
pub(crate) fn print_change(change: &ChangeRecord) {
    let fields = change
        .changed_fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    let origin = if change.is_relayed() {
        format!(" (from {}#{})", &change.origin_device_id, change.origin_sequence)
    } else {
        String::new()
    };
    println!(
        "#{:<5} {:<6} {}/{} {}{}",
        change.sequence,
        change.operation.to_string().yellow(),
        change.table,
        change.row_key,
        fields,
        origin.dimmed()
    );
}

/// The first few non-empty columns of a row.
fn summary(table: TrackedTable, fields: &crate::model::FieldMap) -> String {
    table
        .columns()
        .iter()
        .filter_map(|column| {
            fields
                .get(*column)
                .filter(|v| !v.is_null())
                .map(|v| format!("{column}={v}"))
        })
        .take(3)
        .collect::<Vec<_>>()
        .join("  ")
}
