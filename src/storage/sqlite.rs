//! SQLite storage implementation.
//!
//! This module provides the main storage backend for gate-sync. Every write
//! to a tracked table goes through `mutate`, which owns the transaction and
//! the sequence clock, and through the capture layer, which appends one
//! change record per row mutation.

use crate::error::{Error, Result};
use crate::model::{ChangeRecord, DeviceIdentity, FieldMap, Provenance, TrackedTable};
use crate::storage::capture::{self, RowData};
use crate::storage::changelog;
use crate::storage::identity::{
    bump_document_counter, insert_identity, load_identity, persist_sequence, set_prefix,
    set_pruned_through, SequenceAllocator, SequenceClock,
};
use crate::storage::notify::ChangeNotifier;
use crate::storage::peers;
use crate::storage::schema::apply_schema;
use crate::storage::versions::count_tombstones;
use crate::validate::validate_prefix;
use rusqlite::{Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const RECORD_SAVEPOINT: &str = "apply_record";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    clock: SequenceClock,
    notifier: ChangeNotifier,
    actor: Option<String>,
    fixed_time: Option<i64>,
}

/// Context for a mutation operation.
///
/// Passed to mutation closures to allocate sequences and collect the change
/// records captured by this transaction.
#[derive(Debug)]
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Who is making the change, if known.
    pub actor: Option<String>,
    /// The local device id.
    pub device_id: String,
    /// Wall clock for local changes (Unix milliseconds).
    pub now: i64,
    /// Change records captured so far, in sequence order.
    pub changes: Vec<ChangeRecord>,
    sequences: SequenceAllocator,
}

impl MutationContext {
    /// Create a new mutation context continuing after `last_sequence`.
    #[must_use]
    pub fn new(
        op_name: &str,
        actor: Option<String>,
        device_id: String,
        now: i64,
        last_sequence: u64,
    ) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor,
            device_id,
            now,
            changes: Vec::new(),
            sequences: SequenceAllocator::starting_after(last_sequence),
        }
    }

    /// Allocate the next local sequence.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequences.allocate()
    }

    /// Highest sequence allocated so far.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequences.last()
    }

    /// Run `f` inside a savepoint.
    ///
    /// On error the savepoint is rolled back, and the sequences and change
    /// records it produced are discarded, so the next allocation reuses them.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or an error if the savepoint itself fails.
    pub fn savepoint<R, F>(&mut self, conn: &Connection, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        let mark = self.sequences.mark();
        let captured = self.changes.len();
        conn.execute_batch(&format!("SAVEPOINT {RECORD_SAVEPOINT}"))?;

        match f(self) {
            Ok(value) => {
                conn.execute_batch(&format!("RELEASE {RECORD_SAVEPOINT}"))?;
                Ok(value)
            }
            Err(e) => {
                conn.execute_batch(&format!(
                    "ROLLBACK TO {RECORD_SAVEPOINT}; RELEASE {RECORD_SAVEPOINT}"
                ))?;
                self.sequences.reset(mark);
                self.changes.truncate(captured);
                Err(e)
            }
        }
    }
}

/// Result of `prune_acknowledged`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneStats {
    /// Change records removed.
    pub removed: usize,
    /// New pruned floor.
    pub pruned_through: u64,
    /// Peers whose acknowledgements bounded the prune.
    pub peers: usize,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;

        if let Some(timeout) = timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        } else {
            // Default 5 second timeout
            conn.busy_timeout(Duration::from_secs(5))?;
        }

        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        let clock = SequenceClock::load(&conn)?;
        Ok(Self {
            conn,
            clock,
            notifier: ChangeNotifier::new(),
            actor: None,
            fixed_time: None,
        })
    }

    /// Get a reference to the underlying connection (for read operations).
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Set the actor attributed to local changes.
    pub fn set_actor(&mut self, actor: Option<String>) {
        self.actor = actor;
    }

    /// Pin the wall clock used for local changes. `None` restores the system
    /// clock.
    pub fn set_fixed_time(&mut self, millis: Option<i64>) {
        self.fixed_time = millis;
    }

    /// Current time in Unix milliseconds.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.fixed_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis())
    }

    /// The "store changed" notifier.
    #[must_use]
    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Last local sequence handed out.
    #[must_use]
    pub fn local_sequence(&self) -> u64 {
        self.clock.current()
    }

    /// Execute a mutation with the capture protocol.
    ///
    /// This method:
    /// 1. Takes the sequence clock
    /// 2. Begins an IMMEDIATE transaction (for write locking)
    /// 3. Executes the mutation closure, which captures its changes
    /// 4. Persists the last allocated sequence
    /// 5. Commits, then advances the in-memory clock
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` without an identity, or any error of the
    /// closure. The transaction is rolled back on error and the clock is
    /// left untouched.
    pub fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let now = self.now();
        let mut clock = self.clock.lock();
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let identity = load_identity(&tx)?.ok_or(Error::NotInitialized)?;
        let mut ctx = MutationContext::new(op, self.actor.clone(), identity.device_id, now, *clock);

        // Execute the mutation
        let result = f(&tx, &mut ctx)?;

        let issued = ctx.last_sequence();
        if issued > *clock {
            persist_sequence(&tx, issued)?;
        }

        // Commit
        tx.commit()?;
        if !ctx.changes.is_empty() {
            tracing::info!(
                op,
                captured = ctx.changes.len(),
                through = issued,
                "Committed changes"
            );
        }
        *clock = issued;

        Ok(result)
    }

    // ==================
    // Identity Operations
    // ==================

    /// Create the device identity if it does not exist yet.
    ///
    /// The prefix is only used on creation; an existing identity is returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad prefix, or a database error.
    pub fn ensure_identity(&mut self, prefix: Option<&str>) -> Result<DeviceIdentity> {
        let prefix = prefix.map(validate_prefix).transpose()?;
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        if let Some(existing) = load_identity(&tx)? {
            return Ok(existing);
        }

        let mut identity = DeviceIdentity::generate(prefix.as_deref());
        identity.created_at = self.fixed_time.unwrap_or(identity.created_at);
        insert_identity(&tx, &identity)?;
        tx.commit()?;

        tracing::info!(
            device_id = %identity.device_id,
            prefix = %identity.document_prefix,
            "Created device identity"
        );
        Ok(identity)
    }

    /// Get the device identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn identity(&self) -> Result<Option<DeviceIdentity>> {
        Ok(load_identity(&self.conn)?)
    }

    /// Get the device identity, failing if the store is not initialized.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if there is no identity.
    pub fn require_identity(&self) -> Result<DeviceIdentity> {
        self.identity()?.ok_or(Error::NotInitialized)
    }

    /// Change the document prefix.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad prefix or `NotInitialized`.
    pub fn set_document_prefix(&mut self, prefix: &str) -> Result<String> {
        let prefix = validate_prefix(prefix)?;
        let previous = self.require_identity()?.document_prefix;
        set_prefix(&self.conn, &prefix)?;
        tracing::info!(from = %previous, to = %prefix, "Document prefix changed");
        Ok(prefix)
    }

    /// Issue the next document number (`PREFIX-NNNN`).
    ///
    /// # Errors
    ///
    /// Returns `Config` if the number already exists locally, which means
    /// another device uses the same prefix.
    pub fn next_document_number(&mut self) -> Result<String> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let number = issue_document_number(&tx)?;
        tx.commit()?;
        Ok(number)
    }

    // ==================
    // Row Operations
    // ==================

    /// Insert a row. A random row key is generated when none is given.
    ///
    /// # Errors
    ///
    /// Returns capture errors (see `capture::insert`).
    pub fn insert_row(
        &mut self,
        table: TrackedTable,
        row_key: Option<&str>,
        fields: &FieldMap,
    ) -> Result<ChangeRecord> {
        let row_key = row_key.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        self.mutate("insert_row", |tx, ctx| {
            capture::insert(tx, ctx, &Provenance::Local, table, &row_key, fields)
        })
    }

    /// Update a row. Returns `None` if no value changed.
    ///
    /// # Errors
    ///
    /// Returns capture errors (see `capture::update`).
    pub fn update_row(
        &mut self,
        table: TrackedTable,
        row_key: &str,
        fields: &FieldMap,
    ) -> Result<Option<ChangeRecord>> {
        self.mutate("update_row", |tx, ctx| {
            capture::update(tx, ctx, &Provenance::Local, table, row_key, fields)
        })
    }

    /// Delete a row and its dependents. Returns every captured change,
    /// dependents first.
    ///
    /// # Errors
    ///
    /// Returns capture errors (see `capture::delete`).
    pub fn delete_row(&mut self, table: TrackedTable, row_key: &str) -> Result<Vec<ChangeRecord>> {
        self.mutate("delete_row", |tx, ctx| {
            capture::delete(tx, ctx, &Provenance::Local, table, row_key)?;
            Ok(ctx.changes.clone())
        })
    }

    /// Get a row's data columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_row(&self, table: TrackedTable, row_key: &str) -> Result<Option<FieldMap>> {
        capture::read_row(&self.conn, table, row_key)
    }

    /// List rows of a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_rows(&self, table: TrackedTable, limit: Option<u32>) -> Result<Vec<RowData>> {
        capture::list_rows(&self.conn, table, limit)
    }

    /// Get all row keys of a table (for "did you mean" suggestions).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn row_keys(&self, table: TrackedTable) -> Result<Vec<String>> {
        capture::row_keys(&self.conn, table)
    }

    /// Issue a document number and insert the invoice in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Config` on a document number collision, or capture errors.
    pub fn create_invoice(&mut self, deal_id: &str, fields: &FieldMap) -> Result<ChangeRecord> {
        let row_key = uuid::Uuid::new_v4().to_string();
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();

        self.mutate("create_invoice", |tx, ctx| {
            let number = issue_document_number(tx)?;
            let mut fields = fields.clone();
            fields.insert("number".to_string(), number.into());
            fields.insert("deal_id".to_string(), deal_id.into());
            fields
                .entry("issue_date".to_string())
                .or_insert_with(|| today.into());
            capture::insert(tx, ctx, &Provenance::Local, TrackedTable::Invoices, &row_key, &fields)
        })
    }

    /// Every change record for one row, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn row_history(&self, table: TrackedTable, row_key: &str) -> Result<Vec<ChangeRecord>> {
        Ok(changelog::get_row_history(&self.conn, table, row_key)?)
    }

    // ==================
    // Change Log
    // ==================

    /// Change records with `sequence > since`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn changes_since(&self, since: u64, limit: Option<u32>) -> Result<Vec<ChangeRecord>> {
        Ok(changelog::get_changes_since(&self.conn, since, limit)?)
    }

    /// Number of change records held.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn change_count(&self) -> Result<usize> {
        Ok(changelog::count_changes(&self.conn)?)
    }

    /// Number of tombstones held.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn tombstone_count(&self) -> Result<usize> {
        Ok(count_tombstones(&self.conn)?)
    }

    // ==================
    // Peer State
    // ==================

    /// Watermark of a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn watermark(&self, peer: &str) -> Result<u64> {
        Ok(peers::get_watermark(&self.conn, peer)?)
    }

    /// All peer watermarks.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn watermarks(&self) -> Result<BTreeMap<String, u64>> {
        Ok(peers::all_watermarks(&self.conn)?)
    }

    /// Local sequence acknowledged by a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn acknowledged(&self, peer: &str) -> Result<u64> {
        Ok(peers::get_ack(&self.conn, peer)?)
    }

    /// All peer acknowledgements.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn acknowledgements(&self) -> Result<BTreeMap<String, u64>> {
        Ok(peers::all_acks(&self.conn)?)
    }

    /// Delete local change records every known peer has acknowledged.
    ///
    /// Peers are the devices this store imported from or received an
    /// acknowledgement from. With no known peers nothing is pruned.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` or a database error.
    pub fn prune_acknowledged(&mut self) -> Result<PruneStats> {
        let identity = self.require_identity()?;
        let acks = self.acknowledgements()?;
        let mut known: Vec<String> = self.watermarks()?.into_keys().collect();
        known.extend(acks.keys().cloned());
        known.sort();
        known.dedup();

        let Some(floor) = known
            .iter()
            .map(|peer| acks.get(peer).copied().unwrap_or(0))
            .min()
        else {
            return Ok(PruneStats {
                pruned_through: identity.pruned_through,
                ..PruneStats::default()
            });
        };
        let floor = floor.min(self.local_sequence());

        if floor <= identity.pruned_through {
            tracing::debug!(floor, pruned_through = identity.pruned_through, "Nothing to prune");
            return Ok(PruneStats {
                removed: 0,
                pruned_through: identity.pruned_through,
                peers: known.len(),
            });
        }

        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let removed = changelog::prune_through(&tx, floor)?;
        set_pruned_through(&tx, floor)?;
        tx.commit()?;

        tracing::info!(removed, through = floor, peers = known.len(), "Pruned change log");
        Ok(PruneStats {
            removed,
            pruned_through: floor,
            peers: known.len(),
        })
    }
}

/// Bump the document counter and format the number, refusing one that is
/// already in use.
fn issue_document_number(conn: &Connection) -> Result<String> {
    let identity = load_identity(conn)?.ok_or(Error::NotInitialized)?;
    let counter = bump_document_counter(conn)?;
    let number = identity.document_number(counter);

    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM invoices WHERE number = ?1",
            [&number],
            |row| row.get(0),
        )
        .optional()?;
    if taken.is_some() {
        return Err(Error::Config(format!(
            "document number {number} already exists: another device uses prefix '{}'",
            identity.document_prefix
        )));
    }

    tracing::debug!(number = %number, "Issued document number");
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn storage(prefix: &str) -> SqliteStorage {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.ensure_identity(Some(prefix)).unwrap();
        storage
    }

    #[test]
    fn test_open_memory() {
        let storage = SqliteStorage::open_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_mutate_requires_identity() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let err = storage
            .insert_row(TrackedTable::Companies, None, &fields(&[("name", json!("Acme"))]))
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[test]
    fn test_ensure_identity_is_idempotent() {
        let mut storage = SqliteStorage::open_memory().unwrap();
        let first = storage.ensure_identity(Some("a")).unwrap();
        assert_eq!(first.document_prefix, "A");

        let second = storage.ensure_identity(Some("B")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sequences_strictly_increasing_and_gapless() {
        let mut storage = storage("A");
        storage
            .insert_row(TrackedTable::Companies, Some("co1"), &fields(&[("name", json!("Acme"))]))
            .unwrap();
        // A failing mutation must not consume a sequence
        assert!(storage
            .insert_row(TrackedTable::Deals, Some("d1"),
                        &fields(&[("company_id", json!("nope")), ("title", json!("X"))]))
            .is_err());
        storage
            .update_row(TrackedTable::Companies, "co1", &fields(&[("phone", json!("555-1000"))]))
            .unwrap();
        storage.delete_row(TrackedTable::Companies, "co1").unwrap();

        let sequences: Vec<u64> = storage
            .changes_since(0, None)
            .unwrap()
            .iter()
            .map(|c| c.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(storage.local_sequence(), 3);
        assert_eq!(storage.require_identity().unwrap().local_sequence, 3);
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gatesync.db");
        {
            let mut storage = SqliteStorage::open(&path).unwrap();
            storage.ensure_identity(Some("A")).unwrap();
            storage
                .insert_row(TrackedTable::Companies, None, &fields(&[("name", json!("Acme"))]))
                .unwrap();
        }
        let mut storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.local_sequence(), 1);
        let change = storage
            .insert_row(TrackedTable::Companies, None, &fields(&[("name", json!("Beta"))]))
            .unwrap();
        assert_eq!(change.sequence, 2);
    }

    #[test]
    fn test_mutation_without_change_record_rolls_back() {
        let mut storage = storage("A");
        let device_id = storage.require_identity().unwrap().device_id;
        storage
            .conn()
            .execute(
                "INSERT INTO change_log (sequence, device_id, table_name, row_key, operation,
                                         timestamp, origin_device_id, origin_sequence)
                 VALUES (1, ?1, 'companies', 'other', 'insert', 0, ?1, 1)",
                [&device_id],
            )
            .unwrap();

        let err = storage
            .insert_row(TrackedTable::Companies, Some("co1"), &fields(&[("name", json!("Acme"))]))
            .unwrap_err();

        assert!(matches!(err, Error::Capture { ref row_key, .. } if row_key == "co1"), "{err}");
        assert_eq!(err.exit_code(), 2);
        assert!(storage.get_row(TrackedTable::Companies, "co1").unwrap().is_none());
        assert_eq!(storage.local_sequence(), 0);
        assert_eq!(storage.require_identity().unwrap().local_sequence, 0);
    }

    #[test]
    fn test_savepoint_rollback_releases_sequences() {
        let mut storage = storage("A");
        let sequences = storage
            .mutate("batch", |tx, ctx| {
                capture::insert(tx, ctx, &Provenance::Local, TrackedTable::Companies, "co1",
                                &fields(&[("name", json!("Acme"))]))?;
                let failed = ctx.savepoint(tx, |ctx| {
                    capture::insert(tx, ctx, &Provenance::Local, TrackedTable::Companies, "co2",
                                    &fields(&[("name", json!("Beta"))]))?;
                    Err::<(), _>(Error::Other("abort".into()))
                });
                assert!(failed.is_err());
                capture::insert(tx, ctx, &Provenance::Local, TrackedTable::Companies, "co3",
                                &fields(&[("name", json!("Gamma"))]))?;
                Ok(ctx.changes.iter().map(|c| c.sequence).collect::<Vec<_>>())
            })
            .unwrap();

        assert_eq!(sequences, vec![1, 2]);
        assert!(storage.get_row(TrackedTable::Companies, "co2").unwrap().is_none());
        assert_eq!(storage.change_count().unwrap(), 2);
    }

    #[test]
    fn test_document_numbers() {
        let mut storage = storage("A");
        assert_eq!(storage.next_document_number().unwrap(), "A-0001");
        assert_eq!(storage.next_document_number().unwrap(), "A-0002");

        storage.set_document_prefix("lap").unwrap();
        assert_eq!(storage.next_document_number().unwrap(), "LAP-0003");
    }

    #[test]
    fn test_document_number_collision_is_config_error() {
        let mut storage = storage("A");
        storage
            .insert_row(TrackedTable::Companies, Some("co1"), &fields(&[("name", json!("Acme"))]))
            .unwrap();
        storage
            .insert_row(TrackedTable::Deals, Some("d1"),
                        &fields(&[("company_id", json!("co1")), ("title", json!("Fit-out"))]))
            .unwrap();
        // Another device with the same prefix already issued A-0001
        storage
            .insert_row(TrackedTable::Invoices, Some("inv-other"),
                        &fields(&[("number", json!("A-0001")), ("deal_id", json!("d1")),
                                  ("issue_date", json!("2026-10-01"))]))
            .unwrap();

        let err = storage.next_document_number().unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("prefix")));
    }

    #[test]
    fn test_create_invoice() {
        let mut storage = storage("B");
        storage
            .insert_row(TrackedTable::Companies, Some("co1"), &fields(&[("name", json!("Acme"))]))
            .unwrap();
        storage
            .insert_row(TrackedTable::Deals, Some("d1"),
                        &fields(&[("company_id", json!("co1")), ("title", json!("Fit-out"))]))
            .unwrap();

        let change = storage.create_invoice("d1", &fields(&[("notes", json!("net 30"))])).unwrap();
        assert_eq!(change.changed_fields["number"], json!("B-0001"));
        assert_eq!(change.changed_fields["status"], json!("Draft"));
    }

    #[test]
    fn test_prune_needs_every_peer_ack() {
        let mut storage = storage("A");
        for name in ["One", "Two", "Three"] {
            storage
                .insert_row(TrackedTable::Companies, None, &fields(&[("name", json!(name))]))
                .unwrap();
        }

        // No known peers: nothing pruned
        assert_eq!(storage.prune_acknowledged().unwrap().removed, 0);

        peers::record_ack(storage.conn(), "dev-b", 2, 0).unwrap();
        peers::advance_watermark(storage.conn(), "dev-c", 5, 0).unwrap();
        // dev-c never acknowledged anything
        assert_eq!(storage.prune_acknowledged().unwrap().removed, 0);

        peers::record_ack(storage.conn(), "dev-c", 3, 0).unwrap();
        let stats = storage.prune_acknowledged().unwrap();
        assert_eq!(stats.removed, 2);
        assert_eq!(stats.pruned_through, 2);
        assert_eq!(storage.change_count().unwrap(), 1);
        assert_eq!(storage.require_identity().unwrap().pruned_through, 2);
    }
}
