//! Change capture: the write path for every tracked table.
//!
//! Each function performs one row mutation and appends its change record on
//! the same connection, inside the caller's transaction. If the record cannot
//! be written the function fails and the transaction is rolled back with it,
//! so a committed mutation always has exactly one record.
//!
//! Table and column names are interpolated into SQL only after being checked
//! against `TrackedTable::columns()`.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{ChangeRecord, FieldMap, OnDelete, Operation, Provenance, TrackedTable};
use crate::storage::changelog::insert_change;
use crate::storage::sqlite::MutationContext;
use crate::storage::value::{json_to_sql, sql_to_json};
use crate::storage::versions::{clear_fields, insert_tombstone, is_tombstoned, stamp_fields};

/// One stored row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowData {
    pub row_key: String,
    pub fields: FieldMap,
}

/// Read a row's data columns.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn read_row(conn: &Connection, table: TrackedTable, row_key: &str) -> Result<Option<FieldMap>> {
    let columns = table.columns();
    let sql = format!("SELECT {} FROM {table} WHERE id = ?1", columns.join(", "));
    let row = conn
        .query_row(&sql, [row_key], |row| {
            let mut fields = FieldMap::new();
            for (i, column) in columns.iter().enumerate() {
                fields.insert((*column).to_string(), sql_to_json(row.get_ref(i)?));
            }
            Ok(fields)
        })
        .optional()?;
    Ok(row)
}

/// List rows in insertion order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn list_rows(conn: &Connection, table: TrackedTable, limit: Option<u32>) -> Result<Vec<RowData>> {
    let columns = table.columns();
    let sql = format!(
        "SELECT id, {} FROM {table} ORDER BY rowid LIMIT ?1",
        columns.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([limit.map_or(-1, i64::from)], |row| {
        let mut fields = FieldMap::new();
        for (i, column) in columns.iter().enumerate() {
            fields.insert((*column).to_string(), sql_to_json(row.get_ref(i + 1)?));
        }
        Ok(RowData {
            row_key: row.get(0)?,
            fields,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every row key of a table.
pub fn row_keys(conn: &Connection, table: TrackedTable) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT id FROM {table}"))?;
    let keys = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(keys.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Insert a row and capture an insert record carrying the full stored row.
///
/// # Errors
///
/// Returns `InvalidArgument` for a tombstoned key, `UnknownColumn`,
/// `ForeignKeyViolation`, `Constraint`, or `Capture` if the record fails.
pub fn insert(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    table: TrackedTable,
    row_key: &str,
    fields: &FieldMap,
) -> Result<ChangeRecord> {
    table.check_columns(fields.keys())?;
    if is_tombstoned(conn, table, row_key)? {
        return Err(Error::InvalidArgument(format!(
            "{table}/{row_key} was deleted and cannot be re-created"
        )));
    }

    let mut columns = vec!["id"];
    columns.extend(fields.keys().map(String::as_str));
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    let params = std::iter::once(SqlValue::Text(row_key.to_string()))
        .chain(fields.values().map(json_to_sql));
    conn.execute(&sql, rusqlite::params_from_iter(params))
        .map_err(|e| classify(e, table, row_key))?;

    // Record what was stored, column defaults included
    let stored = read_row(conn, table, row_key)?.ok_or_else(|| Error::Capture {
        table: table.to_string(),
        row_key: row_key.to_string(),
        message: "inserted row not readable".to_string(),
    })?;
    let change = record(conn, ctx, provenance, table, row_key, Operation::Insert, stored)?;
    stamp_fields(conn, table, row_key, change.changed_fields.keys(), &change.stamp())?;
    Ok(change)
}

/// Update a row, capturing only the columns whose value actually changes.
///
/// Returns `None` when nothing changed; no record is written then.
///
/// # Errors
///
/// Returns `RowNotFound` if the row does not exist, otherwise as `write_fields`.
pub fn update(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    table: TrackedTable,
    row_key: &str,
    fields: &FieldMap,
) -> Result<Option<ChangeRecord>> {
    table.check_columns(fields.keys())?;
    let current = read_row(conn, table, row_key)?.ok_or_else(|| Error::RowNotFound {
        table: table.to_string(),
        row_key: row_key.to_string(),
    })?;

    let changed: FieldMap = fields
        .iter()
        .filter(|(column, value)| !current.get(*column).is_some_and(|old| same_value(old, value)))
        .map(|(column, value)| (column.clone(), value.clone()))
        .collect();

    if changed.is_empty() {
        tracing::debug!(table = %table, row_key, "Update changed nothing");
        return Ok(None);
    }
    write_fields(conn, ctx, provenance, table, row_key, &changed).map(Some)
}

/// Write the given columns unconditionally and capture them as an update.
///
/// # Errors
///
/// Returns `RowNotFound` if no row was updated, `ForeignKeyViolation` or
/// `Constraint` if the store refuses a value, or `Capture`.
pub fn write_fields(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    table: TrackedTable,
    row_key: &str,
    fields: &FieldMap,
) -> Result<ChangeRecord> {
    table.check_columns(fields.keys())?;
    if fields.is_empty() {
        return Err(Error::InvalidArgument(format!("no fields to update on {table}/{row_key}")));
    }

    let assignments: Vec<String> = fields
        .keys()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 2))
        .collect();
    let sql = format!("UPDATE {table} SET {} WHERE id = ?1", assignments.join(", "));
    let params = std::iter::once(SqlValue::Text(row_key.to_string()))
        .chain(fields.values().map(json_to_sql));
    let updated = conn
        .execute(&sql, rusqlite::params_from_iter(params))
        .map_err(|e| classify(e, table, row_key))?;
    if updated == 0 {
        return Err(Error::RowNotFound {
            table: table.to_string(),
            row_key: row_key.to_string(),
        });
    }

    let change = record(conn, ctx, provenance, table, row_key, Operation::Update, fields.clone())?;
    stamp_fields(conn, table, row_key, fields.keys(), &change.stamp())?;
    Ok(change)
}

/// Delete a row.
///
/// Dependent rows are handled first, each with its own captured change:
/// cascade children are deleted, set-null children have the reference
/// cleared. The row then gets a delete record and a tombstone.
///
/// # Errors
///
/// Returns `RowNotFound` if the row does not exist, or any capture error of
/// the row or its dependents.
pub fn delete(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    table: TrackedTable,
    row_key: &str,
) -> Result<ChangeRecord> {
    if read_row(conn, table, row_key)?.is_none() {
        return Err(Error::RowNotFound {
            table: table.to_string(),
            row_key: row_key.to_string(),
        });
    }

    for link in table.children() {
        for child_key in child_keys(conn, link.child, link.column, row_key)? {
            // An earlier cascade may already have removed it
            if read_row(conn, link.child, &child_key)?.is_none() {
                continue;
            }
            match link.on_delete {
                OnDelete::Cascade => {
                    delete(conn, ctx, &Provenance::Local, link.child, &child_key)?;
                }
                OnDelete::SetNull => {
                    let cleared = FieldMap::from([(link.column.to_string(), Value::Null)]);
                    write_fields(conn, ctx, &Provenance::Local, link.child, &child_key, &cleared)?;
                }
            }
        }
    }

    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [row_key])
        .map_err(|e| classify(e, table, row_key))?;

    tombstone(conn, ctx, provenance, table, row_key)
}

/// Capture a delete for a row that is not stored locally.
///
/// Used when a peer deleted a row this device never had, so the delete is
/// still relayed onward.
///
/// # Errors
///
/// Returns `Capture` if the record fails.
pub fn tombstone(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    table: TrackedTable,
    row_key: &str,
) -> Result<ChangeRecord> {
    let change = record(conn, ctx, provenance, table, row_key, Operation::Delete, FieldMap::new())?;
    insert_tombstone(conn, table, row_key, &change.stamp())?;
    clear_fields(conn, table, row_key)?;
    Ok(change)
}

/// Append the change record for a mutation just performed.
fn record(
    conn: &Connection,
    ctx: &mut MutationContext,
    provenance: &Provenance,
    table: TrackedTable,
    row_key: &str,
    operation: Operation,
    changed_fields: FieldMap,
) -> Result<ChangeRecord> {
    let sequence = ctx.next_sequence();
    let (timestamp, origin_device_id, origin_sequence, actor) = match provenance {
        Provenance::Local => (ctx.now, ctx.device_id.clone(), sequence, ctx.actor.clone()),
        Provenance::Relayed {
            origin_device_id,
            origin_sequence,
            timestamp,
            actor,
        } => (*timestamp, origin_device_id.clone(), *origin_sequence, actor.clone()),
    };

    let change = ChangeRecord {
        device_id: ctx.device_id.clone(),
        sequence,
        table,
        row_key: row_key.to_string(),
        operation,
        changed_fields,
        timestamp,
        origin_device_id,
        origin_sequence,
        actor,
    };

    insert_change(conn, &change).map_err(|e| Error::Capture {
        table: table.to_string(),
        row_key: row_key.to_string(),
        message: e.to_string(),
    })?;

    tracing::debug!(
        sequence,
        table = %table,
        row_key,
        operation = %operation,
        relayed = change.is_relayed(),
        "Captured change"
    );
    ctx.changes.push(change.clone());
    Ok(change)
}

fn child_keys(
    conn: &Connection,
    child: TrackedTable,
    column: &str,
    parent_key: &str,
) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {child} WHERE {column} = ?1 ORDER BY rowid"
    ))?;
    let keys = stmt
        .query_map([parent_key], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(keys)
}

/// Whether a stored value equals an incoming one, treating `1` and `1.0`
/// (REAL affinity) as equal.
#[allow(clippy::cast_precision_loss)]
fn same_value(stored: &Value, incoming: &Value) -> bool {
    match (json_to_sql(stored), json_to_sql(incoming)) {
        (SqlValue::Integer(i), SqlValue::Real(f)) | (SqlValue::Real(f), SqlValue::Integer(i)) => {
            (i as f64 - f).abs() < f64::EPSILON
        }
        (a, b) => a == b,
    }
}

/// Map a store error for one row into the error taxonomy.
///
/// A unique violation on `invoices.number` means two devices issued the same
/// document number, which is a prefix configuration problem.
pub(crate) fn classify(err: rusqlite::Error, table: TrackedTable, row_key: &str) -> Error {
    let constraint = match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Some((e.extended_code, msg.clone().unwrap_or_else(|| e.to_string())))
        }
        _ => None,
    };
    let Some((extended_code, message)) = constraint else {
        return Error::Database(err);
    };

    if extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
        Error::ForeignKeyViolation {
            table: table.to_string(),
            row_key: row_key.to_string(),
            message,
        }
    } else if table == TrackedTable::Invoices && message.contains("invoices.number") {
        Error::Config(format!(
            "duplicate document number on {table}/{row_key}: two devices share a document prefix ({message})"
        ))
    } else {
        Error::Constraint {
            table: table.to_string(),
            row_key: row_key.to_string(),
            message,
        }
    }
}
