//! Change log storage and retrieval.
//!
//! The change log is append-only: rows are inserted by the capture layer and
//! only ever removed by pruning records every known peer has acknowledged.

use rusqlite::{Connection, OptionalExtension, Result, Row};

use crate::model::{ChangeRecord, FieldMap, Operation, TrackedTable};

const SELECT_COLUMNS: &str = "sequence, device_id, table_name, row_key, operation, changed_fields,
     timestamp, origin_device_id, origin_sequence, actor";

/// Insert a change record.
///
/// # Errors
///
/// Returns an error if the insert fails, including a duplicate sequence.
pub fn insert_change(conn: &Connection, change: &ChangeRecord) -> Result<()> {
    let fields = serde_json::to_string(&change.changed_fields)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO change_log (sequence, device_id, table_name, row_key, operation, changed_fields,
                                 timestamp, origin_device_id, origin_sequence, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            to_sql_seq(change.sequence),
            change.device_id,
            change.table.as_str(),
            change.row_key,
            change.operation.as_str(),
            fields,
            change.timestamp,
            change.origin_device_id,
            to_sql_seq(change.origin_sequence),
            change.actor,
        ],
    )?;
    Ok(())
}

/// Get change records with `sequence > since`, ascending.
///
/// # Errors
///
/// Returns an error if the query fails or a stored row is corrupt.
pub fn get_changes_since(
    conn: &Connection,
    since: u64,
    limit: Option<u32>,
) -> Result<Vec<ChangeRecord>> {
    let limit = limit.map_or(-1, i64::from);
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM change_log
         WHERE sequence > ?1
         ORDER BY sequence ASC
         LIMIT ?2"
    ))?;

    let rows = stmt.query_map(rusqlite::params![to_sql_seq(since), limit], map_change)?;
    rows.collect()
}

/// Get all change records for one row, ascending.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_row_history(
    conn: &Connection,
    table: TrackedTable,
    row_key: &str,
) -> Result<Vec<ChangeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM change_log
         WHERE table_name = ?1 AND row_key = ?2
         ORDER BY sequence ASC"
    ))?;

    let rows = stmt.query_map(rusqlite::params![table.as_str(), row_key], map_change)?;
    rows.collect()
}

/// Highest sequence present in the log (0 when empty).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn max_sequence(conn: &Connection) -> Result<u64> {
    let max: Option<i64> =
        conn.query_row("SELECT MAX(sequence) FROM change_log", [], |row| row.get(0))?;
    Ok(max.map_or(0, from_sql_seq))
}

/// Number of records in the log.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_changes(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Number of records with `sequence > since`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_changes_since(conn: &Connection, since: u64) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM change_log WHERE sequence > ?1",
        [to_sql_seq(since)],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Whether a change from `origin_device_id`/`origin_sequence` was already
/// captured here.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn has_origin(conn: &Connection, origin_device_id: &str, origin_sequence: u64) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM change_log WHERE origin_device_id = ?1 AND origin_sequence = ?2 LIMIT 1",
            rusqlite::params![origin_device_id, to_sql_seq(origin_sequence)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Delete records with `sequence <= through`. Returns the number removed.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn prune_through(conn: &Connection, through: u64) -> Result<usize> {
    conn.execute(
        "DELETE FROM change_log WHERE sequence <= ?1",
        [to_sql_seq(through)],
    )
}

fn map_change(row: &Row<'_>) -> Result<ChangeRecord> {
    let table_name: String = row.get(2)?;
    let table = table_name
        .parse::<TrackedTable>()
        .map_err(|e| corrupt(2, e.to_string()))?;
    let operation_name: String = row.get(4)?;
    let operation = Operation::parse(&operation_name)
        .ok_or_else(|| corrupt(4, format!("unknown operation {operation_name}")))?;
    let fields_json: String = row.get(5)?;
    let changed_fields: FieldMap =
        serde_json::from_str(&fields_json).map_err(|e| corrupt(5, e.to_string()))?;

    Ok(ChangeRecord {
        sequence: from_sql_seq(row.get(0)?),
        device_id: row.get(1)?,
        table,
        row_key: row.get(3)?,
        operation,
        changed_fields,
        timestamp: row.get(6)?,
        origin_device_id: row.get(7)?,
        origin_sequence: from_sql_seq(row.get(8)?),
        actor: row.get(9)?,
    })
}

fn corrupt(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

/// Sequences are `u64` in the model and INTEGER in SQLite.
pub(crate) fn to_sql_seq(seq: u64) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_seq(seq: i64) -> u64 {
    u64::try_from(seq).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;

    fn change(sequence: u64, op: Operation) -> ChangeRecord {
        ChangeRecord {
            device_id: "dev-a".to_string(),
            sequence,
            table: TrackedTable::Companies,
            row_key: "co1".to_string(),
            operation: op,
            changed_fields: FieldMap::from([("name".to_string(), "Acme".into())]),
            timestamp: 1_700_000_000_000,
            origin_device_id: "dev-a".to_string(),
            origin_sequence: sequence,
            actor: Some("tester".to_string()),
        }
    }

    #[test]
    fn test_change_insert_and_get() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        insert_change(&conn, &change(1, Operation::Insert)).unwrap();
        insert_change(&conn, &change(2, Operation::Delete)).unwrap();

        let all = get_changes_since(&conn, 0, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], change(1, Operation::Insert));
        assert_eq!(all[1].operation, Operation::Delete);

        let tail = get_changes_since(&conn, 1, Some(10)).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);

        assert_eq!(max_sequence(&conn).unwrap(), 2);
        assert_eq!(count_changes_since(&conn, 1).unwrap(), 1);
        assert_eq!(get_row_history(&conn, TrackedTable::Companies, "co1").unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_sequence_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        insert_change(&conn, &change(1, Operation::Insert)).unwrap();
        assert!(insert_change(&conn, &change(1, Operation::Update)).is_err());
    }

    #[test]
    fn test_prune_and_origin_lookup() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        for seq in 1..=3 {
            insert_change(&conn, &change(seq, Operation::Update)).unwrap();
        }
        assert!(has_origin(&conn, "dev-a", 2).unwrap());
        assert!(!has_origin(&conn, "dev-b", 2).unwrap());

        assert_eq!(prune_through(&conn, 2).unwrap(), 2);
        assert_eq!(count_changes(&conn).unwrap(), 1);
        assert_eq!(max_sequence(&conn).unwrap(), 3);
    }
}
