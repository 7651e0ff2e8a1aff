//! Field version stamps and tombstones.

use rusqlite::{Connection, OptionalExtension, Result};
use std::collections::HashMap;

use crate::model::{TrackedTable, VersionStamp};

/// Stamps of every versioned field of one row.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn field_stamps(
    conn: &Connection,
    table: TrackedTable,
    row_key: &str,
) -> Result<HashMap<String, VersionStamp>> {
    let mut stmt = conn.prepare(
        "SELECT column_name, timestamp, device_id FROM field_versions
         WHERE table_name = ?1 AND row_key = ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![table.as_str(), row_key], |row| {
        Ok((
            row.get::<_, String>(0)?,
            VersionStamp {
                timestamp: row.get(1)?,
                device_id: row.get(2)?,
            },
        ))
    })?;
    rows.collect()
}

/// Record `stamp` as the version of each listed column.
///
/// # Errors
///
/// Returns an error if an upsert fails.
pub fn stamp_fields<'a>(
    conn: &Connection,
    table: TrackedTable,
    row_key: &str,
    columns: impl IntoIterator<Item = &'a String>,
    stamp: &VersionStamp,
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO field_versions (table_name, row_key, column_name, timestamp, device_id)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(table_name, row_key, column_name)
         DO UPDATE SET timestamp = excluded.timestamp, device_id = excluded.device_id",
    )?;
    for column in columns {
        stmt.execute(rusqlite::params![
            table.as_str(),
            row_key,
            column,
            stamp.timestamp,
            stamp.device_id,
        ])?;
    }
    Ok(())
}

/// Drop all field versions of a deleted row.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn clear_fields(conn: &Connection, table: TrackedTable, row_key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM field_versions WHERE table_name = ?1 AND row_key = ?2",
        rusqlite::params![table.as_str(), row_key],
    )?;
    Ok(())
}

/// Whether the row key was ever deleted.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn is_tombstoned(conn: &Connection, table: TrackedTable, row_key: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM tombstones WHERE table_name = ?1 AND row_key = ?2",
            rusqlite::params![table.as_str(), row_key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Record a tombstone. The first delete of a key is kept.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_tombstone(
    conn: &Connection,
    table: TrackedTable,
    row_key: &str,
    stamp: &VersionStamp,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO tombstones (table_name, row_key, deleted_at, device_id)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![table.as_str(), row_key, stamp.timestamp, stamp.device_id],
    )?;
    Ok(())
}

/// Number of tombstones held.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_tombstones(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM tombstones", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;

    #[test]
    fn test_stamps_overwrite() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let phone = vec!["phone".to_string()];

        stamp_fields(&conn, TrackedTable::Contacts, "c1", &phone, &VersionStamp::new(1, "a")).unwrap();
        stamp_fields(&conn, TrackedTable::Contacts, "c1", &phone, &VersionStamp::new(2, "b")).unwrap();

        let stamps = field_stamps(&conn, TrackedTable::Contacts, "c1").unwrap();
        assert_eq!(stamps["phone"], VersionStamp::new(2, "b"));

        clear_fields(&conn, TrackedTable::Contacts, "c1").unwrap();
        assert!(field_stamps(&conn, TrackedTable::Contacts, "c1").unwrap().is_empty());
    }

    #[test]
    fn test_tombstone_first_delete_kept() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        assert!(!is_tombstoned(&conn, TrackedTable::Deals, "d1").unwrap());
        insert_tombstone(&conn, TrackedTable::Deals, "d1", &VersionStamp::new(5, "a")).unwrap();
        insert_tombstone(&conn, TrackedTable::Deals, "d1", &VersionStamp::new(9, "b")).unwrap();

        assert!(is_tombstoned(&conn, TrackedTable::Deals, "d1").unwrap());
        assert_eq!(count_tombstones(&conn).unwrap(), 1);
        let deleted_at: i64 = conn
            .query_row("SELECT deleted_at FROM tombstones", [], |row| row.get(0))
            .unwrap();
        assert_eq!(deleted_at, 5);
    }
}
