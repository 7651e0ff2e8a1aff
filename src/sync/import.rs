//! Pack import.
//!
//! Importing merges a peer's change records into the local store. The whole
//! pack is applied in one transaction; each record gets its own savepoint so
//! a record the store refuses (a missing parent, a duplicate invoice number)
//! is reported without disturbing the others.
//!
//! Everything an import changes is captured into the local log with the
//! origin fields preserved, so exporting afterwards relays the merged
//! changes to devices that never talked to the source directly.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::model::{ChangeRecord, Operation, TrackedTable};
use crate::storage::changelog::has_origin;
use crate::storage::peers::{advance_watermark, get_watermark, record_ack};
use crate::storage::sqlite::{MutationContext, SqliteStorage};
use crate::sync::file::read_pack;
use crate::sync::merge::{apply_record, Doomed, Resolution};
use crate::sync::pack::{decode_pack, Pack};
use crate::sync::types::{IssueKind, MergeReport, RecordIssue, SyncError, SyncResult};

/// Importer for pack files.
pub struct Importer<'a> {
    storage: &'a mut SqliteStorage,
}

impl<'a> Importer<'a> {
    /// Create a new importer.
    #[must_use]
    pub fn new(storage: &'a mut SqliteStorage) -> Self {
        Self { storage }
    }

    /// Read, validate and import a pack file.
    ///
    /// # Errors
    ///
    /// See [`Importer::import`]; additionally `FileNotFound`.
    pub fn import_file(&mut self, path: &Path) -> SyncResult<MergeReport> {
        let pack = read_pack(path)?;
        self.import(&pack)
    }

    /// Decode a pack from a byte stream and import it.
    ///
    /// # Errors
    ///
    /// See [`Importer::import`].
    pub fn import_reader<R: BufRead>(&mut self, reader: R) -> SyncResult<MergeReport> {
        let pack = decode_pack(reader)?;
        self.import(&pack)
    }

    /// Merge a pack into the local store.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing applied, if:
    /// - The pack is malformed (`MalformedPack`)
    /// - The store is not initialized
    /// - The pack came from this device (`SelfImport`)
    /// - The pack starts past the peer's watermark (`MissingHistory`)
    /// - A database error other than a constraint violation occurs
    pub fn import(&mut self, pack: &Pack) -> SyncResult<MergeReport> {
        pack.validate()?;

        let identity = self.storage.require_identity()?;
        let header = &pack.header;
        if header.device_id == identity.device_id {
            return Err(SyncError::SelfImport {
                device_id: identity.device_id,
            });
        }

        let previous = self.storage.watermark(&header.device_id)?;
        if header.from_sequence > previous + 1 {
            return Err(SyncError::MissingHistory {
                peer: header.device_id.clone(),
                from_sequence: header.from_sequence,
                watermark: previous,
            });
        }

        let local_sequence = self.storage.local_sequence();
        let prefix_collision = header
            .document_prefix
            .as_deref()
            .filter(|p| p.eq_ignore_ascii_case(&identity.document_prefix))
            .map(str::to_string);
        if let Some(prefix) = &prefix_collision {
            tracing::warn!(
                peer = %header.device_id,
                prefix = %prefix,
                "Peer uses the same document prefix; invoice numbers will collide"
            );
        }

        let mut report = self.storage.mutate("import_pack", |tx, ctx| {
            let mut report = MergeReport {
                source_device: header.device_id.clone(),
                received: pack.records.len(),
                previous_watermark: previous,
                prefix_collision: prefix_collision.clone(),
                ..MergeReport::default()
            };

            let fresh = deduplicate(tx, &identity.device_id, previous, &pack.records, &mut report)?;
            let deletes = first_deletes(&fresh);
            let doomed: Doomed = deletes.keys().cloned().collect();

            for (index, record) in fresh.iter().enumerate() {
                let key = (record.table, record.row_key.clone());
                if record.operation != Operation::Delete
                    && deletes.get(&key).is_some_and(|&at| at > index)
                {
                    report.superseded += 1;
                    continue;
                }
                apply_one(tx, ctx, record, &doomed, &mut report)?;
            }

            let now = ctx.now;
            advance_watermark(tx, &header.device_id, header.to_sequence, now)?;
            if let Some(&ack) = header.acknowledged.get(&identity.device_id) {
                record_ack(tx, &header.device_id, ack.min(local_sequence), now)?;
            }
            report.new_watermark = previous.max(header.to_sequence);
            report.captured = ctx.changes.len();
            Ok(report)
        })?;

        if report.applied > 0 {
            self.storage.notifier().notify(&report.source_device, report.applied);
        }
        report.conflicts.sort_by_key(|issue| issue.sequence);

        tracing::info!(
            peer = %report.source_device,
            received = report.received,
            applied = report.applied,
            duplicates = report.duplicates,
            superseded = report.superseded,
            conflicts = report.conflicts.len(),
            failures = report.failures.len(),
            watermark = report.new_watermark,
            "Imported pack"
        );
        Ok(report)
    }
}

/// Drop records whose effect is already here.
///
/// A record is already here when its sequence is covered by the watermark,
/// when it originated on this device, when its origin's watermark covers it,
/// or when a record with the same origin is already in the local log.
fn deduplicate<'p>(
    conn: &Connection,
    local_device: &str,
    watermark: u64,
    records: &'p [ChangeRecord],
    report: &mut MergeReport,
) -> Result<Vec<&'p ChangeRecord>> {
    let mut origin_marks: HashMap<&str, u64> = HashMap::new();
    let mut fresh = Vec::with_capacity(records.len());

    for record in records {
        let origin = record.origin_device_id.as_str();
        let seen = if record.sequence <= watermark || origin == local_device {
            true
        } else if record.is_relayed() {
            let mark = match origin_marks.get(origin) {
                Some(&mark) => mark,
                None => {
                    let mark = get_watermark(conn, origin)?;
                    origin_marks.insert(origin, mark);
                    mark
                }
            };
            record.origin_sequence <= mark || has_origin(conn, origin, record.origin_sequence)?
        } else {
            has_origin(conn, origin, record.origin_sequence)?
        };

        if seen {
            report.duplicates += 1;
        } else {
            fresh.push(record);
        }
    }
    Ok(fresh)
}

/// Index of the first delete of each row.
fn first_deletes(records: &[&ChangeRecord]) -> HashMap<(TrackedTable, String), usize> {
    let mut deletes = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        if record.operation == Operation::Delete {
            deletes
                .entry((record.table, record.row_key.clone()))
                .or_insert(index);
        }
    }
    deletes
}

fn apply_one(
    conn: &Connection,
    ctx: &mut MutationContext,
    record: &ChangeRecord,
    doomed: &Doomed,
    report: &mut MergeReport,
) -> Result<()> {
    let issue = |kind: IssueKind, detail: String| RecordIssue {
        sequence: record.sequence,
        table: record.table,
        row_key: record.row_key.clone(),
        kind,
        detail,
    };

    match ctx.savepoint(conn, |ctx| apply_record(conn, ctx, record, doomed)) {
        Ok(Resolution::Applied) => report.applied += 1,
        Ok(Resolution::Partial { kept }) => {
            report.applied += 1;
            report.conflicts.push(issue(
                IssueKind::LocalNewer,
                format!("local values are newer for {}", kept.join(", ")),
            ));
        }
        Ok(Resolution::Rejected { kind, detail }) => report.conflicts.push(issue(kind, detail)),
        Ok(Resolution::Duplicate) => report.duplicates += 1,
        Err(err) => {
            let kind = match err {
                Error::ForeignKeyViolation { .. } => IssueKind::ForeignKey,
                Error::Config(_) => IssueKind::DuplicateDocumentNumber,
                Error::Constraint { .. } => IssueKind::Constraint,
                other => return Err(other),
            };
            tracing::warn!(
                sequence = record.sequence,
                table = %record.table,
                row_key = %record.row_key,
                error = %err,
                "Record refused"
            );
            if kind.is_failure() {
                report.failures.push(issue(kind, err.to_string()));
            } else {
                report.conflicts.push(issue(kind, err.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldMap;
    use crate::sync::export::Exporter;
    use crate::sync::pack::encode_pack;
    use serde_json::json;
    use std::io::Cursor;

    fn device(prefix: &str) -> SqliteStorage {
        let mut storage = SqliteStorage::open_memory().unwrap();
        storage.ensure_identity(Some(prefix)).unwrap();
        storage
    }

    fn fields(pairs: &[(&str, serde_json::Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn export(storage: &SqliteStorage, since: u64) -> Pack {
        Exporter::new(storage).export(since).unwrap()
    }

    fn import(storage: &mut SqliteStorage, pack: &Pack) -> MergeReport {
        Importer::new(storage).import(pack).unwrap()
    }

    /// Every business row on a device, for comparing stores.
    fn snapshot(storage: &SqliteStorage) -> Vec<(TrackedTable, String, FieldMap)> {
        let mut rows: Vec<_> = TrackedTable::ALL
            .iter()
            .flat_map(|table| {
                storage
                    .list_rows(*table, None)
                    .unwrap()
                    .into_iter()
                    .map(|row| (*table, row.row_key, row.fields))
            })
            .collect();
        rows.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        rows
    }

    fn seed_company(storage: &mut SqliteStorage, key: &str) {
        storage
            .insert_row(TrackedTable::Companies, Some(key), &fields(&[("name", json!("Acme"))]))
            .unwrap();
    }

    #[test]
    fn test_import_applies_and_relays() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");

        let report = import(&mut b, &export(&a, 0));
        assert_eq!(report.applied, 1);
        assert_eq!(report.new_watermark, 1);
        assert_eq!(report.captured, 1);

        let relayed = b.changes_since(0, None).unwrap();
        assert_eq!(relayed.len(), 1);
        assert!(relayed[0].is_relayed());
        assert_eq!(relayed[0].origin_sequence, 1);
        assert_eq!(snapshot(&a), snapshot(&b));
    }

    #[test]
    fn test_import_is_idempotent() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");
        let pack = export(&a, 0);

        import(&mut b, &pack);
        let before = snapshot(&b);
        let again = import(&mut b, &pack);

        assert_eq!(again.applied, 0);
        assert_eq!(again.duplicates, 1);
        assert!(again.is_noop());
        assert_eq!(snapshot(&b), before);
        assert_eq!(b.change_count().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let mut a = device("A");
        let mut b = device("B");
        a.set_fixed_time(Some(1_000));
        a.insert_row(
            TrackedTable::Contacts,
            Some("c1"),
            &fields(&[("name", json!("Jo")), ("phone", json!("555-0000"))]),
        )
        .unwrap();
        import(&mut b, &export(&a, 0));

        a.set_fixed_time(Some(2_000));
        a.update_row(TrackedTable::Contacts, "c1", &fields(&[("phone", json!("555-1000"))]))
            .unwrap();
        b.set_fixed_time(Some(3_000));
        b.update_row(TrackedTable::Contacts, "c1", &fields(&[("phone", json!("555-2000"))]))
            .unwrap();

        let from_a = export(&a, 1);
        let from_b = export(&b, 0);
        let report_b = import(&mut b, &from_a);
        let report_a = import(&mut a, &from_b);

        assert_eq!(report_b.conflicts.len(), 1);
        assert_eq!(report_b.conflicts[0].kind, IssueKind::LocalNewer);
        assert_eq!(report_a.applied, 1);
        let phone = |s: &SqliteStorage| {
            s.get_row(TrackedTable::Contacts, "c1").unwrap().unwrap()["phone"].clone()
        };
        assert_eq!(phone(&a), json!("555-2000"));
        assert_eq!(phone(&b), json!("555-2000"));
    }

    #[test]
    fn test_import_order_does_not_matter() {
        let mut a = device("A");
        let mut b = device("B");
        a.set_fixed_time(Some(1_000));
        seed_company(&mut a, "co1");
        b.set_fixed_time(Some(1_500));
        b.insert_row(TrackedTable::Companies, Some("co2"), &fields(&[("name", json!("Beta"))]))
            .unwrap();
        a.set_fixed_time(Some(2_000));
        a.update_row(TrackedTable::Companies, "co1", &fields(&[("phone", json!("1"))]))
            .unwrap();

        let pack_a = export(&a, 0);
        let pack_b = export(&b, 0);

        let mut c = device("C");
        import(&mut c, &pack_a);
        import(&mut c, &pack_b);
        let mut d = device("D");
        import(&mut d, &pack_b);
        import(&mut d, &pack_a);

        assert_eq!(snapshot(&c), snapshot(&d));
        assert_eq!(snapshot(&c).len(), 2);
    }

    #[test]
    fn test_insert_then_delete_is_not_resurrected() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");
        a.insert_row(
            TrackedTable::Contacts,
            Some("c1"),
            &fields(&[("name", json!("Jo")), ("company_id", json!("co1"))]),
        )
        .unwrap();
        a.delete_row(TrackedTable::Companies, "co1").unwrap();

        let report = import(&mut b, &export(&a, 0));
        assert_eq!(report.superseded, 1);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert!(b.get_row(TrackedTable::Companies, "co1").unwrap().is_none());

        // The contact survives with its reference cleared, as on the origin
        let contact = b.get_row(TrackedTable::Contacts, "c1").unwrap().unwrap();
        assert_eq!(contact["company_id"], serde_json::Value::Null);
        assert_eq!(snapshot(&a), snapshot(&b));
        assert_eq!(b.tombstone_count().unwrap(), 1);
    }

    #[test]
    fn test_delete_dominates_concurrent_update() {
        let mut a = device("A");
        let mut b = device("B");
        a.set_fixed_time(Some(1_000));
        seed_company(&mut a, "co1");
        import(&mut b, &export(&a, 0));

        a.set_fixed_time(Some(2_000));
        a.delete_row(TrackedTable::Companies, "co1").unwrap();
        b.set_fixed_time(Some(9_000));
        b.update_row(TrackedTable::Companies, "co1", &fields(&[("phone", json!("555"))]))
            .unwrap();

        let from_a = export(&a, 1);
        let from_b = export(&b, 0);
        import(&mut b, &from_a);
        let report = import(&mut a, &from_b);

        assert!(a.get_row(TrackedTable::Companies, "co1").unwrap().is_none());
        assert!(b.get_row(TrackedTable::Companies, "co1").unwrap().is_none());
        assert_eq!(report.conflicts[0].kind, IssueKind::Tombstoned);
    }

    #[test]
    fn test_document_numbers_do_not_collide() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");
        a.insert_row(
            TrackedTable::Deals,
            Some("d1"),
            &fields(&[("company_id", json!("co1")), ("title", json!("Fence"))]),
        )
        .unwrap();
        import(&mut b, &export(&a, 0));

        a.create_invoice("d1", &FieldMap::new()).unwrap();
        b.create_invoice("d1", &FieldMap::new()).unwrap();

        import(&mut b, &export(&a, 2));
        let report = import(&mut a, &export(&b, 0));
        assert!(report.failures.is_empty());

        let numbers = |s: &SqliteStorage| {
            let mut n: Vec<String> = s
                .list_rows(TrackedTable::Invoices, None)
                .unwrap()
                .into_iter()
                .map(|row| row.fields["number"].as_str().unwrap().to_string())
                .collect();
            n.sort();
            n
        };
        assert_eq!(numbers(&a), vec!["A-0001", "B-0001"]);
        assert_eq!(numbers(&b), vec!["A-0001", "B-0001"]);
    }

    #[test]
    fn test_shared_prefix_reports_collision_as_conflict() {
        let mut a = device("A");
        let mut b = device("A");
        seed_company(&mut a, "co1");
        a.insert_row(
            TrackedTable::Deals,
            Some("d1"),
            &fields(&[("company_id", json!("co1")), ("title", json!("Fence"))]),
        )
        .unwrap();
        import(&mut b, &export(&a, 0));
        a.create_invoice("d1", &FieldMap::new()).unwrap();
        b.create_invoice("d1", &FieldMap::new()).unwrap();

        let report = import(&mut b, &export(&a, 2));
        assert_eq!(report.prefix_collision.as_deref(), Some("A"));
        assert!(report.failures.is_empty());
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].kind, IssueKind::DuplicateDocumentNumber);
        assert_eq!(report.applied, 0);
        assert_eq!(report.new_watermark, 3);
    }

    #[test]
    fn test_foreign_key_failure_is_reported() {
        let mut a = device("A");
        let mut b = device("B");
        let mut pack = {
            seed_company(&mut a, "co1");
            a.insert_row(
                TrackedTable::Deals,
                Some("d1"),
                &fields(&[("company_id", json!("co1")), ("title", json!("Fence"))]),
            )
            .unwrap();
            export(&a, 0)
        };
        // Point the deal at a company that exists nowhere
        pack.records[1]
            .changed_fields
            .insert("company_id".into(), json!("ghost"));
        pack.header.checksum = None;

        let report = import(&mut b, &pack);
        assert_eq!(report.applied, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, IssueKind::ForeignKey);
        assert_eq!(report.new_watermark, 2);
        // The refused record left no trace and no sequence gap
        assert_eq!(b.change_count().unwrap(), 1);
        assert_eq!(b.local_sequence(), 1);
    }

    #[test]
    fn test_rejects_self_import() {
        let mut a = device("A");
        seed_company(&mut a, "co1");
        let pack = export(&a, 0);
        assert!(matches!(
            Importer::new(&mut a).import(&pack),
            Err(SyncError::SelfImport { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_history() {
        let mut a = device("A");
        let mut b = device("B");
        for key in ["co1", "co2", "co3"] {
            seed_company(&mut a, key);
        }
        let result = Importer::new(&mut b).import(&export(&a, 2));
        assert!(matches!(
            result,
            Err(SyncError::MissingHistory { from_sequence: 3, watermark: 0, .. })
        ));
        assert!(b.get_row(TrackedTable::Companies, "co3").unwrap().is_none());
    }

    #[test]
    fn test_malformed_pack_applies_nothing() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");
        seed_company(&mut a, "co2");

        let mut pack = export(&a, 0);
        pack.records[1].changed_fields.insert("fax".into(), json!("1"));
        let mut buf = Vec::new();
        encode_pack(&mut buf, &pack).unwrap();

        let result = Importer::new(&mut b).import_reader(Cursor::new(buf));
        assert!(matches!(result, Err(SyncError::MalformedPack { .. })));
        assert_eq!(b.change_count().unwrap(), 0);
        assert_eq!(b.watermark(&a.require_identity().unwrap().device_id).unwrap(), 0);
    }

    #[test]
    fn test_relay_through_third_device() {
        let mut a = device("A");
        let mut b = device("B");
        let mut c = device("C");
        seed_company(&mut a, "co1");

        import(&mut b, &export(&a, 0));
        import(&mut c, &export(&b, 0));
        assert_eq!(snapshot(&c), snapshot(&a));

        // The direct pack from A is now a duplicate on C
        let direct = import(&mut c, &export(&a, 0));
        assert_eq!(direct.applied, 0);
        assert_eq!(direct.duplicates, 1);

        // And C's relay back to A is recognised as A's own change
        let back = import(&mut a, &export(&c, 0));
        assert_eq!(back.applied, 0);
        assert_eq!(a.change_count().unwrap(), 1);
    }

    #[test]
    fn test_acknowledgement_is_recorded() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");
        seed_company(&mut a, "co2");
        let a_id = a.require_identity().unwrap().device_id;
        let b_id = b.require_identity().unwrap().device_id;

        import(&mut b, &export(&a, 0));
        assert_eq!(b.watermark(&a_id).unwrap(), 2);

        import(&mut a, &export(&b, 0));
        assert_eq!(a.acknowledged(&b_id).unwrap(), 2);
        assert_eq!(Exporter::new(&a).since_for_peer(&b_id).unwrap(), 2);
    }

    #[test]
    fn test_notifies_only_when_applied() {
        let mut a = device("A");
        let mut b = device("B");
        seed_company(&mut a, "co1");
        let pack = export(&a, 0);
        let events = b.notifier().subscribe();

        import(&mut b, &pack);
        import(&mut b, &pack);

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].applied, 1);
        assert_eq!(b.notifier().generation(), 1);
    }
}
