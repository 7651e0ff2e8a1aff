//! End-to-end tests of the `gsync` binary against temporary databases.

use assert_cmd::Command;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn gsync(db: &Path) -> Command {
    let mut cmd = Command::cargo_bin("gsync").unwrap();
    cmd.env_remove("GATESYNC_DB")
        .env_remove("GATESYNC_TEST_DB")
        .env_remove("RUST_LOG")
        .env("GATESYNC_ACTOR", "tester")
        .arg("--db")
        .arg(db)
        .arg("--json");
    cmd
}

fn run_json(db: &Path, args: &[&str]) -> Value {
    let output = gsync(db).args(args).assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn init(dir: &TempDir, name: &str, prefix: &str) -> std::path::PathBuf {
    let db = dir.path().join(format!("{name}.db"));
    let out = run_json(&db, &["init", "--prefix", prefix]);
    assert_eq!(out["document_prefix"], prefix);
    db
}

#[test]
fn test_round_trip_between_two_devices() {
    let dir = TempDir::new().unwrap();
    let a = init(&dir, "a", "A");
    let b = init(&dir, "b", "B");

    run_json(&a, &["record", "insert", "company", "--key", "co1", "name=Acme", "phone=555-1000"]);
    let pack = dir.path().join("a.gspack.jsonl");
    let export = run_json(&a, &["sync", "export", "-o", pack.to_str().unwrap()]);
    assert_eq!(export["stats"]["record_count"], 1);

    let import = run_json(&b, &["sync", "import", pack.to_str().unwrap()]);
    assert_eq!(import["report"]["applied"], 1);

    let row = run_json(&b, &["record", "get", "companies", "co1"]);
    assert_eq!(row["fields"]["name"], "Acme");
    assert_eq!(row["fields"]["phone"], "555-1000");

    // Importing the same pack again changes nothing
    let again = run_json(&b, &["sync", "import", pack.to_str().unwrap()]);
    assert_eq!(again["report"]["applied"], 0);
    assert_eq!(again["report"]["duplicates"], 1);

    let status = run_json(&b, &["sync", "status"]);
    assert_eq!(status["peers"][0]["watermark"], 1);
}

#[test]
fn test_invoice_numbers_from_two_devices() {
    let dir = TempDir::new().unwrap();
    let a = init(&dir, "a", "A");
    let b = init(&dir, "b", "B");

    run_json(&a, &["record", "insert", "company", "--key", "co1", "name=Acme"]);
    run_json(&a, &["record", "insert", "deal", "--key", "d1", "company_id=co1", "title=Fence"]);
    let seed = dir.path().join("seed.gspack.jsonl");
    run_json(&a, &["sync", "export", "-o", seed.to_str().unwrap()]);
    run_json(&b, &["sync", "import", seed.to_str().unwrap()]);

    let inv_a = run_json(&a, &["record", "invoice", "d1"]);
    let inv_b = run_json(&b, &["record", "invoice", "d1"]);
    assert_eq!(inv_a["changed_fields"]["number"], "A-0001");
    assert_eq!(inv_b["changed_fields"]["number"], "B-0001");

    let from_a = dir.path().join("from-a.gspack.jsonl");
    run_json(&a, &["sync", "export", "--since", "2", "-o", from_a.to_str().unwrap()]);
    let report = run_json(&b, &["sync", "import", from_a.to_str().unwrap()]);
    assert_eq!(report["report"]["failures"].as_array().unwrap().len(), 0);

    let invoices = run_json(&b, &["record", "list", "invoices"]);
    assert_eq!(invoices.as_array().unwrap().len(), 2);
}

#[test]
fn test_uninitialized_database_exit_code() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("missing.db");
    gsync(&db).args(["record", "list", "companies"]).assert().code(2);
}

#[test]
fn test_init_twice_requires_force() {
    let dir = TempDir::new().unwrap();
    let db = init(&dir, "a", "A");
    gsync(&db).args(["init"]).assert().code(2);
    gsync(&db).args(["init", "--force", "--prefix", "Z"]).assert().success();
}

#[test]
fn test_unknown_table_exit_code() {
    let dir = TempDir::new().unwrap();
    let db = init(&dir, "a", "A");
    gsync(&db)
        .args(["record", "insert", "widgets", "name=x"])
        .assert()
        .code(4);
}

#[test]
fn test_missing_parent_exit_code() {
    let dir = TempDir::new().unwrap();
    let db = init(&dir, "a", "A");
    gsync(&db)
        .args(["record", "insert", "deal", "company_id=ghost", "title=Fence"])
        .assert()
        .code(5);
}

#[test]
fn test_malformed_pack_exit_code() {
    let dir = TempDir::new().unwrap();
    let db = init(&dir, "a", "A");
    let pack = dir.path().join("broken.gspack.jsonl");
    std::fs::write(&pack, "{\"device_id\":\"x\",\"from_sequence\":1}\n").unwrap();

    gsync(&db)
        .args(["sync", "import", pack.to_str().unwrap()])
        .assert()
        .code(6);
}

#[test]
fn test_self_import_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = init(&dir, "a", "A");
    run_json(&db, &["record", "insert", "company", "name=Acme"]);
    let pack = dir.path().join("self.gspack.jsonl");
    run_json(&db, &["sync", "export", "-o", pack.to_str().unwrap()]);

    gsync(&db)
        .args(["sync", "import", pack.to_str().unwrap()])
        .assert()
        .code(6);
}

#[test]
fn test_missing_row_suggests_similar_keys() {
    let dir = TempDir::new().unwrap();
    let db = init(&dir, "a", "A");
    run_json(&db, &["record", "insert", "company", "--key", "co1", "name=Acme"]);

    let output = gsync(&db)
        .args(["record", "get", "companies", "co2"])
        .assert()
        .code(3)
        .get_output()
        .stderr
        .clone();
    let err: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(err["error"]["code"], "ROW_NOT_FOUND");
    assert!(err["error"]["hint"].as_str().unwrap().contains("co1"));
}
