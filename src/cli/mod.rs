//! CLI definitions using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// gate-sync - offline change tracking and pack sync for business records
#[derive(Parser, Debug)]
#[command(name = "gsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.gatesync/data/gatesync.db)
    #[arg(long, global = true, env = "GATESYNC_DB")]
    pub db: Option<PathBuf>,

    /// Actor name recorded on local changes
    #[arg(long, global = true, env = "GATESYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and this device's identity
    Init {
        /// Document prefix for invoice numbers (1-8 letters/digits)
        #[arg(long)]
        prefix: Option<String>,

        /// Overwrite an existing database
        #[arg(long)]
        force: bool,
    },

    /// Device identity and document numbering
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },

    /// Read and change business records
    Record {
        #[command(subcommand)]
        command: RecordCommands,
    },

    /// Exchange packs with other devices
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

// ============================================================================
// Identity Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum IdentityCommands {
    /// Show device id, prefix and counters
    Show,

    /// Change the document prefix used for new invoice numbers
    SetPrefix {
        /// New prefix (1-8 letters/digits)
        prefix: String,
    },

    /// Reserve and print the next document number
    NextNumber,
}

// ============================================================================
// Record Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum RecordCommands {
    /// Insert a row
    Insert {
        /// Table (companies, contacts, deals, ...)
        table: String,

        /// Row key (default: a new UUID)
        #[arg(long)]
        key: Option<String>,

        /// Column values as col=value
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Update columns of a row
    Update {
        table: String,
        key: String,

        /// Column values as col=value
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Delete a row (dependent rows follow their foreign key rules)
    Delete { table: String, key: String },

    /// Show one row
    Get { table: String, key: String },

    /// List rows of a table
    List {
        table: String,

        /// Maximum rows to return
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Show the change history of one row
    History { table: String, key: String },

    /// Create an invoice for a deal with the next document number
    Invoice {
        /// Deal row key
        deal_id: String,

        /// Additional column values as col=value
        values: Vec<String>,
    },
}

// ============================================================================
// Sync Commands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum SyncCommands {
    /// Write local changes to a pack file
    Export {
        /// Export records after this sequence
        #[arg(long, conflicts_with = "peer")]
        since: Option<u64>,

        /// Export what this peer has not acknowledged yet
        #[arg(long = "for", value_name = "PEER")]
        peer: Option<String>,

        /// Output file (default: <prefix>-<from>-<to>.gspack.jsonl)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Merge a pack file from another device ("-" reads stdin)
    Import {
        /// Pack file
        file: PathBuf,
    },

    /// Show sync status per peer
    Status,

    /// List local change records
    Log {
        /// Show records after this sequence
        #[arg(long, default_value_t = 0)]
        since: u64,

        /// Maximum records to show
        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Drop change records every known peer has acknowledged
    Prune,
}
