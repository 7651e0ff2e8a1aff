//! Error types for gate-sync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gate-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,
    CaptureError,

    // Not Found (exit 3)
    RowNotFound,

    // Validation (exit 4)
    InvalidArgument,
    UnknownTable,
    UnknownColumn,

    // Integrity (exit 5)
    ForeignKeyViolation,
    ConstraintViolation,

    // Sync (exit 6)
    MalformedPack,
    SyncError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::CaptureError => "CAPTURE_ERROR",
            Self::RowNotFound => "ROW_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::UnknownTable => "UNKNOWN_TABLE",
            Self::UnknownColumn => "UNKNOWN_COLUMN",
            Self::ForeignKeyViolation => "FOREIGN_KEY_VIOLATION",
            Self::ConstraintViolation => "CONSTRAINT_VIOLATION",
            Self::MalformedPack => "MALFORMED_PACK",
            Self::SyncError => "SYNC_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DatabaseError
            | Self::CaptureError => 2,
            Self::RowNotFound => 3,
            Self::InvalidArgument | Self::UnknownTable | Self::UnknownColumn => 4,
            Self::ForeignKeyViolation | Self::ConstraintViolation => 5,
            Self::MalformedPack | Self::SyncError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether retrying with corrected input can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::UnknownTable
                | Self::UnknownColumn
                | Self::ForeignKeyViolation
                | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in gate-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `gsync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Row not found: {table}/{row_key}")]
    RowNotFound { table: String, row_key: String },

    #[error("Row not found: {table}/{row_key} (did you mean: {}?)", similar.join(", "))]
    RowNotFoundSimilar {
        table: String,
        row_key: String,
        similar: Vec<String>,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Foreign key violation on {table}/{row_key}: {message}")]
    ForeignKeyViolation {
        table: String,
        row_key: String,
        message: String,
    },

    #[error("Constraint violation on {table}/{row_key}: {message}")]
    Constraint {
        table: String,
        row_key: String,
        message: String,
    },

    /// A mutation could not be paired with its change record.
    #[error("Change capture failed for {table}/{row_key}: {message}")]
    Capture {
        table: String,
        row_key: String,
        message: String,
    },

    #[error("Malformed pack: {0}")]
    MalformedPack(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Capture { .. } => ErrorCode::CaptureError,
            Self::RowNotFound { .. } | Self::RowNotFoundSimilar { .. } => ErrorCode::RowNotFound,
            Self::UnknownTable(_) => ErrorCode::UnknownTable,
            Self::UnknownColumn { .. } => ErrorCode::UnknownColumn,
            Self::ForeignKeyViolation { .. } => ErrorCode::ForeignKeyViolation,
            Self::Constraint { .. } => ErrorCode::ConstraintViolation,
            Self::MalformedPack(_) => ErrorCode::MalformedPack,
            Self::Sync(_) => ErrorCode::SyncError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `gsync init --prefix <PREFIX>` to create the device identity".to_string())
            }

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::RowNotFound { table, .. } => Some(format!(
                "Use `gsync record list {table}` to see existing rows."
            )),

            Self::RowNotFoundSimilar { similar, .. } => {
                Some(format!("Did you mean: {}?", similar.join(", ")))
            }

            Self::UnknownTable(_) => Some(
                "Tracked tables: companies, contacts, deals, activities, time_entries, \
                 invoices, invoice_items"
                    .to_string(),
            ),

            Self::ForeignKeyViolation { .. } => Some(
                "The referenced parent row does not exist locally. Import the pack that \
                 created it first."
                    .to_string(),
            ),

            Self::MalformedPack(_) => Some(
                "The pack was rejected as a whole and nothing was applied. \
                 Re-export it on the source device."
                    .to_string(),
            ),

            Self::Sync(msg) if msg.contains("missing history") => Some(
                "Ask the peer for a pack starting at or before the sequence shown, \
                 e.g. `gsync sync export --since 0`."
                    .to_string(),
            ),

            Self::Config(msg) if msg.contains("prefix") => Some(
                "Every device needs its own document prefix. \
                 Use `gsync identity set-prefix <PREFIX>` on one of them."
                    .to_string(),
            ),

            Self::Capture { .. }
            | Self::Constraint { .. }
            | Self::Sync(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::UnknownColumn { .. }
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
