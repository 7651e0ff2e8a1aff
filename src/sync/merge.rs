//! Conflict resolution for incoming change records.
//!
//! Resolution is per field. Every stored value carries the stamp
//! `(timestamp, origin device)` of the write that produced it; an incoming
//! value replaces it only if its own stamp is strictly greater. Deletes always
//! win and are terminal: once a row key is tombstoned no insert or update
//! touches it again.

use rusqlite::Connection;
use std::collections::HashSet;

use crate::error::Result;
use crate::model::{ChangeRecord, FieldMap, OnDelete, Operation, Provenance, TrackedTable};
use crate::storage::capture;
use crate::storage::sqlite::MutationContext;
use crate::storage::versions::{field_stamps, is_tombstoned};
use crate::sync::types::IssueKind;

/// Row keys deleted by a later record of the pack being imported.
pub type Doomed = HashSet<(TrackedTable, String)>;

/// What applying one record did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Everything in the record took effect.
    Applied,
    /// Some fields took effect; the listed ones kept their newer local value.
    Partial { kept: Vec<String> },
    /// Nothing took effect.
    Rejected { kind: IssueKind, detail: String },
    /// The record's effect is already present.
    Duplicate,
}

/// Apply one incoming record, capturing whatever it changes.
///
/// # Errors
///
/// Returns store errors (foreign key, constraint, capture, database). The
/// caller runs this inside a savepoint and decides which are per-record.
pub fn apply_record(
    conn: &Connection,
    ctx: &mut MutationContext,
    record: &ChangeRecord,
    doomed: &Doomed,
) -> Result<Resolution> {
    let provenance = Provenance::from_record(record);
    let table = record.table;
    let key = record.row_key.as_str();

    if record.operation == Operation::Delete {
        if is_tombstoned(conn, table, key)? {
            return Ok(Resolution::Duplicate);
        }
        if capture::read_row(conn, table, key)?.is_some() {
            capture::delete(conn, ctx, &provenance, table, key)?;
        } else {
            capture::tombstone(conn, ctx, &provenance, table, key)?;
        }
        return Ok(Resolution::Applied);
    }

    if is_tombstoned(conn, table, key)? {
        return Ok(Resolution::Rejected {
            kind: IssueKind::Tombstoned,
            detail: format!("{} for a deleted row", record.operation),
        });
    }

    let fields = detach_deleted_parents(conn, table, &record.changed_fields, doomed)?;

    if capture::read_row(conn, table, key)?.is_none() {
        if record.operation == Operation::Update {
            return Ok(Resolution::Rejected {
                kind: IssueKind::RowMissing,
                detail: "update for a row not present on this device".to_string(),
            });
        }
        capture::insert(conn, ctx, &provenance, table, key, &fields)?;
        return Ok(Resolution::Applied);
    }

    resolve_fields(conn, ctx, &provenance, record, &fields)
}

/// Field-by-field last-writer-wins against an existing row.
fn resolve_fields(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    record: &ChangeRecord,
    fields: &FieldMap,
) -> Result<Resolution> {
    let incoming = record.stamp();
    let stamps = field_stamps(conn, record.table, &record.row_key)?;

    let mut winners = FieldMap::new();
    let mut kept = Vec::new();
    for (column, value) in fields {
        match stamps.get(column) {
            Some(local) if *local > incoming => kept.push(column.clone()),
            Some(local) if *local == incoming => {}
            _ => {
                winners.insert(column.clone(), value.clone());
            }
        }
    }

    if winners.is_empty() {
        if kept.is_empty() {
            return Ok(Resolution::Duplicate);
        }
        return Ok(Resolution::Rejected {
            kind: IssueKind::LocalNewer,
            detail: format!("local values are newer for {}", kept.join(", ")),
        });
    }

    capture::write_fields(conn, ctx, provenance, record.table, &record.row_key, &winners)?;
    if kept.is_empty() {
        Ok(Resolution::Applied)
    } else {
        Ok(Resolution::Partial { kept })
    }
}

/// Clear set-null references to parents that are deleted here or later in
/// the same pack.
///
/// On the origin device such a parent's delete already cleared the
/// reference; the clearing update arrives later in the pack, but the insert
/// would fail its foreign key before then.
fn detach_deleted_parents(
    conn: &Connection,
    table: TrackedTable,
    fields: &FieldMap,
    doomed: &Doomed,
) -> Result<FieldMap> {
    let mut fields = fields.clone();
    for fk in table.foreign_keys() {
        if fk.on_delete != OnDelete::SetNull {
            continue;
        }
        let Some(parent_key) = fields.get(fk.column).and_then(|v| v.as_str()).map(str::to_string)
        else {
            continue;
        };
        let gone = doomed.contains(&(fk.parent, parent_key.clone()))
            || is_tombstoned(conn, fk.parent, &parent_key)?;
        if gone {
            tracing::debug!(
                table = %table,
                column = fk.column,
                parent = %parent_key,
                "Cleared reference to deleted parent"
            );
            fields.insert(fk.column.to_string(), serde_json::Value::Null);
        }
    }
    Ok(fields)
}
