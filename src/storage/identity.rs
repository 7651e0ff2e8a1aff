//! Device identity persistence and the local sequence clock.
//!
//! The identity row is created once by `ensure_identity` and only its counters
//! change afterwards. `SequenceClock` is the single owner of `local_sequence`
//! in memory: it is loaded at open, locked for the whole of every capture
//! transaction, and only advanced after that transaction commits.

use rusqlite::{Connection, OptionalExtension, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::DeviceIdentity;
use crate::storage::changelog::{from_sql_seq, max_sequence, to_sql_seq};

/// Load the identity row, if one exists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn load_identity(conn: &Connection) -> Result<Option<DeviceIdentity>> {
    conn.query_row(
        "SELECT device_id, document_prefix, local_sequence, document_counter, pruned_through, created_at
         FROM device_identity WHERE id = 1",
        [],
        |row| {
            Ok(DeviceIdentity {
                device_id: row.get(0)?,
                document_prefix: row.get(1)?,
                local_sequence: from_sql_seq(row.get(2)?),
                document_counter: from_sql_seq(row.get(3)?),
                pruned_through: from_sql_seq(row.get(4)?),
                created_at: row.get(5)?,
            })
        },
    )
    .optional()
}

/// Insert the identity row. Fails if one already exists.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_identity(conn: &Connection, identity: &DeviceIdentity) -> Result<()> {
    conn.execute(
        "INSERT INTO device_identity (id, device_id, document_prefix, local_sequence,
                                      document_counter, pruned_through, created_at)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            identity.device_id,
            identity.document_prefix,
            to_sql_seq(identity.local_sequence),
            to_sql_seq(identity.document_counter),
            to_sql_seq(identity.pruned_through),
            identity.created_at,
        ],
    )?;
    Ok(())
}

/// Persist the local sequence.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn persist_sequence(conn: &Connection, sequence: u64) -> Result<()> {
    conn.execute(
        "UPDATE device_identity SET local_sequence = ?1 WHERE id = 1",
        [to_sql_seq(sequence)],
    )?;
    Ok(())
}

/// Increment and return the document counter.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn bump_document_counter(conn: &Connection) -> Result<u64> {
    conn.execute(
        "UPDATE device_identity SET document_counter = document_counter + 1 WHERE id = 1",
        [],
    )?;
    let counter: i64 = conn.query_row(
        "SELECT document_counter FROM device_identity WHERE id = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(from_sql_seq(counter))
}

/// Update the document prefix.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_prefix(conn: &Connection, prefix: &str) -> Result<()> {
    conn.execute(
        "UPDATE device_identity SET document_prefix = ?1 WHERE id = 1",
        [prefix],
    )?;
    Ok(())
}

/// Record the pruned floor.
///
/// # Errors
///
/// Returns an error if the update fails.
pub fn set_pruned_through(conn: &Connection, through: u64) -> Result<()> {
    conn.execute(
        "UPDATE device_identity SET pruned_through = MAX(pruned_through, ?1) WHERE id = 1",
        [to_sql_seq(through)],
    )?;
    Ok(())
}

/// The in-memory owner of `local_sequence`.
#[derive(Debug, Default)]
pub struct SequenceClock {
    current: Mutex<u64>,
}

impl SequenceClock {
    /// Load the clock from the store.
    ///
    /// Uses the larger of the persisted counter and the highest logged
    /// sequence, so a counter that fell behind the log can never reissue a
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the queries fail.
    pub fn load(conn: &Connection) -> Result<Self> {
        let persisted = load_identity(conn)?.map_or(0, |i| i.local_sequence);
        let logged = max_sequence(conn)?;
        Ok(Self {
            current: Mutex::new(persisted.max(logged)),
        })
    }

    /// Last issued sequence.
    #[must_use]
    pub fn current(&self) -> u64 {
        *self.lock()
    }

    /// Take the clock for the duration of one capture transaction.
    pub fn lock(&self) -> MutexGuard<'_, u64> {
        // The guarded value is only written after commit, so a poisoned lock
        // still holds a committed sequence.
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sequence allocator for one transaction.
///
/// Hands out `start + 1, start + 2, ...`; `mark`/`reset` let a savepoint that
/// rolls back give its sequences back so the log stays gapless.
#[derive(Debug, Clone, Copy)]
pub struct SequenceAllocator {
    next: u64,
}

impl SequenceAllocator {
    #[must_use]
    pub fn starting_after(last: u64) -> Self {
        Self { next: last + 1 }
    }

    /// Hand out the next sequence.
    pub fn allocate(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Last sequence handed out (or the starting point if none).
    #[must_use]
    pub fn last(&self) -> u64 {
        self.next - 1
    }

    #[must_use]
    pub fn mark(&self) -> u64 {
        self.next
    }

    pub fn reset(&mut self, mark: u64) {
        self.next = mark;
    }
}
