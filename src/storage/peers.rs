//! Per-peer sync state: watermarks and acknowledgements.
//!
//! A watermark is the highest sequence of a peer's log applied here. An
//! acknowledgement is the highest local sequence a peer reported applying.
//! Both only move forward; the upserts keep the larger value.

use rusqlite::{Connection, OptionalExtension, Result};
use std::collections::BTreeMap;

use crate::storage::changelog::{from_sql_seq, to_sql_seq};

/// Watermark for one peer (0 if never imported).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_watermark(conn: &Connection, peer: &str) -> Result<u64> {
    get_sequence(conn, "peer_watermarks", peer)
}

/// All watermarks, keyed by peer device id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn all_watermarks(conn: &Connection) -> Result<BTreeMap<String, u64>> {
    all_sequences(conn, "peer_watermarks")
}

/// Raise a peer's watermark. A lower value leaves it unchanged.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn advance_watermark(conn: &Connection, peer: &str, sequence: u64, now: i64) -> Result<()> {
    upsert_max(conn, "peer_watermarks", peer, sequence, now)
}

/// Acknowledged local sequence for one peer (0 if unknown).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_ack(conn: &Connection, peer: &str) -> Result<u64> {
    get_sequence(conn, "peer_acks", peer)
}

/// All acknowledgements, keyed by peer device id.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn all_acks(conn: &Connection) -> Result<BTreeMap<String, u64>> {
    all_sequences(conn, "peer_acks")
}

/// Store a peer's acknowledgement of the local log.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn record_ack(conn: &Connection, peer: &str, sequence: u64, now: i64) -> Result<()> {
    upsert_max(conn, "peer_acks", peer, sequence, now)
}

fn get_sequence(conn: &Connection, table: &str, peer: &str) -> Result<u64> {
    let seq: Option<i64> = conn
        .query_row(
            &format!("SELECT sequence FROM {table} WHERE device_id = ?1"),
            [peer],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq.map_or(0, from_sql_seq))
}

fn all_sequences(conn: &Connection, table: &str) -> Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT device_id, sequence FROM {table} ORDER BY device_id"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, from_sql_seq(row.get(1)?)))
    })?;
    rows.collect()
}

fn upsert_max(conn: &Connection, table: &str, peer: &str, sequence: u64, now: i64) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {table} (device_id, sequence, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(device_id) DO UPDATE SET
               sequence = MAX(sequence, excluded.sequence),
               updated_at = excluded.updated_at"
        ),
        rusqlite::params![peer, to_sql_seq(sequence), now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::apply_schema;

    #[test]
    fn test_watermark_never_regresses() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        assert_eq!(get_watermark(&conn, "dev-b").unwrap(), 0);
        advance_watermark(&conn, "dev-b", 7, 1).unwrap();
        advance_watermark(&conn, "dev-b", 3, 2).unwrap();
        assert_eq!(get_watermark(&conn, "dev-b").unwrap(), 7);

        advance_watermark(&conn, "dev-c", 1, 3).unwrap();
        let all = all_watermarks(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["dev-c"], 1);
    }

    #[test]
    fn test_acks_keep_maximum() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        record_ack(&conn, "dev-b", 12, 1).unwrap();
        record_ack(&conn, "dev-b", 4, 2).unwrap();
        assert_eq!(get_ack(&conn, "dev-b").unwrap(), 12);
        assert_eq!(get_ack(&conn, "dev-x").unwrap(), 0);
        assert_eq!(all_acks(&conn).unwrap().len(), 1);
    }
}
