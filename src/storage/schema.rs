//! Database schema definitions.
//!
//! Business tables use device-independent TEXT row keys. Foreign keys carry no
//! `ON DELETE` actions: delete propagation is done by the capture layer so
//! that every cascaded row change gets its own change record.

use rusqlite::{Connection, Result};

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the gate-sync database.
///
/// Note: sync timestamps are stored as INTEGER (Unix milliseconds); business
/// dates keep the TEXT `YYYY-MM-DD` form the records were entered with.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Business Tables
-- ====================

CREATE TABLE IF NOT EXISTS companies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    website TEXT,
    address TEXT,
    created_at TEXT NOT NULL DEFAULT (DATE('now'))
);

CREATE TABLE IF NOT EXISTS contacts (
    id TEXT PRIMARY KEY,
    company_id TEXT REFERENCES companies(id),
    name TEXT NOT NULL,
    title TEXT,
    email TEXT,
    phone TEXT
);

CREATE TABLE IF NOT EXISTS deals (
    id TEXT PRIMARY KEY,
    company_id TEXT NOT NULL REFERENCES companies(id),
    contact_id TEXT REFERENCES contacts(id),
    title TEXT NOT NULL,
    value REAL NOT NULL DEFAULT 0,
    stage TEXT NOT NULL DEFAULT 'Lead',
    created_at TEXT NOT NULL DEFAULT (DATE('now')),
    close_date TEXT,
    notes TEXT
);

CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    deal_id TEXT REFERENCES deals(id),
    company_id TEXT REFERENCES companies(id),
    kind TEXT NOT NULL,
    note TEXT,
    due_date TEXT,
    done INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (DATETIME('now'))
);

-- Billable time entries
CREATE TABLE IF NOT EXISTS time_entries (
    id TEXT PRIMARY KEY,
    deal_id TEXT NOT NULL REFERENCES deals(id),
    work_date TEXT NOT NULL,
    hours REAL NOT NULL,
    rate REAL NOT NULL,
    notes TEXT
);

-- Invoices: number is a business document number, unique across devices
CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    number TEXT NOT NULL UNIQUE,
    deal_id TEXT NOT NULL REFERENCES deals(id),
    issue_date TEXT NOT NULL,
    due_date TEXT,
    status TEXT NOT NULL DEFAULT 'Draft',
    notes TEXT
);

CREATE TABLE IF NOT EXISTS invoice_items (
    id TEXT PRIMARY KEY,
    invoice_id TEXT NOT NULL REFERENCES invoices(id),
    description TEXT NOT NULL,
    qty REAL NOT NULL DEFAULT 1,
    unit_price REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_contacts_company ON contacts(company_id);
CREATE INDEX IF NOT EXISTS idx_deals_company ON deals(company_id);
CREATE INDEX IF NOT EXISTS idx_deals_contact ON deals(contact_id);
CREATE INDEX IF NOT EXISTS idx_activities_deal ON activities(deal_id);
CREATE INDEX IF NOT EXISTS idx_activities_company ON activities(company_id);
CREATE INDEX IF NOT EXISTS idx_activities_due ON activities(due_date, done);
CREATE INDEX IF NOT EXISTS idx_time_deal ON time_entries(deal_id);
CREATE INDEX IF NOT EXISTS idx_invoices_deal ON invoices(deal_id);
CREATE INDEX IF NOT EXISTS idx_items_invoice ON invoice_items(invoice_id);

-- ====================
-- Identity
-- ====================

-- Exactly one row per installation
CREATE TABLE IF NOT EXISTS device_identity (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    device_id TEXT NOT NULL,
    document_prefix TEXT NOT NULL,
    local_sequence INTEGER NOT NULL DEFAULT 0,
    document_counter INTEGER NOT NULL DEFAULT 0,
    pruned_through INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

-- ====================
-- Change Tracking
-- ====================

-- Append-only log of captured changes made or applied on this device
CREATE TABLE IF NOT EXISTS change_log (
    sequence INTEGER PRIMARY KEY,
    device_id TEXT NOT NULL,
    table_name TEXT NOT NULL,
    row_key TEXT NOT NULL,
    operation TEXT NOT NULL CHECK (operation IN ('insert', 'update', 'delete')),
    changed_fields TEXT NOT NULL DEFAULT '{}',
    timestamp INTEGER NOT NULL,
    origin_device_id TEXT NOT NULL,
    origin_sequence INTEGER NOT NULL,
    actor TEXT
);

CREATE INDEX IF NOT EXISTS idx_change_log_row ON change_log(table_name, row_key);
CREATE INDEX IF NOT EXISTS idx_change_log_origin ON change_log(origin_device_id, origin_sequence);

-- Last-writer-wins stamp of each stored field value
CREATE TABLE IF NOT EXISTS field_versions (
    table_name TEXT NOT NULL,
    row_key TEXT NOT NULL,
    column_name TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    device_id TEXT NOT NULL,
    PRIMARY KEY (table_name, row_key, column_name)
);

-- Deleted row keys; delete is terminal
CREATE TABLE IF NOT EXISTS tombstones (
    table_name TEXT NOT NULL,
    row_key TEXT NOT NULL,
    deleted_at INTEGER NOT NULL,
    device_id TEXT NOT NULL,
    PRIMARY KEY (table_name, row_key)
);

-- ====================
-- Sync State
-- ====================

-- Highest sequence of each peer's log applied locally
CREATE TABLE IF NOT EXISTS peer_watermarks (
    device_id TEXT PRIMARY KEY,
    sequence INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Highest local sequence each peer reported as applied
CREATE TABLE IF NOT EXISTS peer_acks (
    device_id TEXT PRIMARY KEY,
    sequence INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Apply the schema to a database connection.
///
/// Enables WAL mode and foreign keys, creates all tables, and records the
/// schema version. Safe to call on every open.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Set pragmas before schema creation
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    Ok(())
}
