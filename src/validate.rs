//! Input validation for the command line.
//!
//! Table names resolve in three tiers: exact match → synonym lookup → error
//! with suggestion. Document prefixes and `col=value` assignments are checked
//! here before they reach the store.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::model::{FieldMap, TrackedTable};
use crate::storage::value::parse_cli_value;

/// Longest accepted document prefix.
pub const MAX_PREFIX_LEN: usize = 8;

// ── Valid value sets (O(1) lookups) ──────────────────────────

pub static VALID_TABLES: LazyLock<HashSet<&str>> =
    LazyLock::new(|| TrackedTable::ALL.iter().map(TrackedTable::as_str).collect());

// ── Synonym maps ─────────────────────────────────────────────

pub static TABLE_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("company", "companies"),
        ("client", "companies"),
        ("clients", "companies"),
        ("contact", "contacts"),
        ("person", "contacts"),
        ("people", "contacts"),
        ("deal", "deals"),
        ("job", "deals"),
        ("jobs", "deals"),
        ("activity", "activities"),
        ("task", "activities"),
        ("tasks", "activities"),
        ("time", "time_entries"),
        ("time_entry", "time_entries"),
        ("timesheet", "time_entries"),
        ("invoice", "invoices"),
        ("item", "invoice_items"),
        ("items", "invoice_items"),
        ("invoice_item", "invoice_items"),
        ("line", "invoice_items"),
    ]
    .into_iter()
    .collect()
});

/// Resolve a table name via exact match or synonym lookup.
///
/// Returns the table, or an error with the original input and an optional
/// suggestion.
pub fn normalize_table(input: &str) -> std::result::Result<TrackedTable, (String, Option<String>)> {
    let lower = input.to_lowercase().replace('-', "_");

    // Tier 1: exact match
    let canonical = if VALID_TABLES.contains(lower.as_str()) {
        Some(lower.as_str())
    } else {
        // Tier 2: synonym lookup
        TABLE_SYNONYMS.get(lower.as_str()).copied()
    };
    if let Some(name) = canonical {
        if let Ok(table) = name.parse() {
            return Ok(table);
        }
    }

    // Tier 3: find closest suggestion
    let suggestion = find_closest_match(&lower, &VALID_TABLES, &TABLE_SYNONYMS);
    Err((input.to_string(), suggestion))
}

/// Resolve a table name, mapping failure to `Error::UnknownTable`.
///
/// # Errors
///
/// Returns `UnknownTable` (mentioning the suggestion, if any).
pub fn parse_table(input: &str) -> Result<TrackedTable> {
    normalize_table(input).map_err(|(raw, suggestion)| match suggestion {
        Some(s) => Error::UnknownTable(format!("{raw} (did you mean '{s}'?)")),
        None => Error::UnknownTable(raw),
    })
}

/// Validate and normalize a document prefix: 1-8 ASCII letters or digits,
/// stored upper-case.
///
/// # Errors
///
/// Returns `InvalidArgument` describing the problem.
pub fn validate_prefix(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("document prefix cannot be empty".to_string()));
    }
    if trimmed.len() > MAX_PREFIX_LEN {
        return Err(Error::InvalidArgument(format!(
            "document prefix '{trimmed}' is longer than {MAX_PREFIX_LEN} characters"
        )));
    }
    if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidArgument(format!(
            "document prefix '{trimmed}' may only contain letters and digits"
        )));
    }
    Ok(trimmed.to_ascii_uppercase())
}

/// Parse `col=value` arguments into a field map, checking columns against
/// the table.
///
/// # Errors
///
/// Returns `InvalidArgument` for an argument without `=`, or
/// `UnknownColumn`.
pub fn parse_assignments(table: TrackedTable, args: &[String]) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    for arg in args {
        let Some((column, raw)) = arg.split_once('=') else {
            return Err(Error::InvalidArgument(format!(
                "expected col=value, got '{arg}'"
            )));
        };
        let column = column.trim();
        if column == "id" {
            return Err(Error::InvalidArgument(
                "the row key is set with --key, not id=".to_string(),
            ));
        }
        fields.insert(column.to_string(), parse_cli_value(raw));
    }
    table.check_columns(fields.keys())?;
    Ok(fields)
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // For synonyms, show what it maps to
            best = Some((synonyms.get(v).copied().unwrap_or(v), dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1) // deletion
                .min(curr[j - 1] + 1) // insertion
                .min(prev[j - 1] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Find existing row keys similar to the searched key.
///
/// Returns up to `max` suggestions with edit distance ≤ 3,
/// sorted by distance then alphabetically.
#[must_use]
pub fn find_similar_keys(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = existing
        .iter()
        .map(|key| (levenshtein_distance(searched, key), key.as_str()))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    candidates
        .into_iter()
        .take(max)
        .map(|(_, key)| key.to_string())
        .collect()
}
