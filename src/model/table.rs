//! Tracked business tables.
//!
//! Every table listed here is routed through the capture layer. The column
//! lists double as the allow-list for identifiers interpolated into SQL, so a
//! table or column name never reaches a statement unless it appears below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// What happens to a child row when its parent is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// The child row is deleted too.
    Cascade,
    /// The referencing column is set to NULL.
    SetNull,
}

/// A foreign key from a child column to a parent table's `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub parent: TrackedTable,
    pub on_delete: OnDelete,
}

/// A reference from a child table pointing at some parent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildLink {
    pub child: TrackedTable,
    pub column: &'static str,
    pub on_delete: OnDelete,
}

/// Business entity types whose mutations are captured and synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedTable {
    Companies,
    Contacts,
    Deals,
    Activities,
    TimeEntries,
    Invoices,
    InvoiceItems,
}

impl TrackedTable {
    /// All tracked tables, parents before children.
    pub const ALL: [Self; 7] = [
        Self::Companies,
        Self::Contacts,
        Self::Deals,
        Self::Activities,
        Self::TimeEntries,
        Self::Invoices,
        Self::InvoiceItems,
    ];

    /// SQL table name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Contacts => "contacts",
            Self::Deals => "deals",
            Self::Activities => "activities",
            Self::TimeEntries => "time_entries",
            Self::Invoices => "invoices",
            Self::InvoiceItems => "invoice_items",
        }
    }

    /// Data columns, excluding the `id` row key.
    #[must_use]
    pub const fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Companies => &["name", "phone", "email", "website", "address", "created_at"],
            Self::Contacts => &["company_id", "name", "title", "email", "phone"],
            Self::Deals => &[
                "company_id",
                "contact_id",
                "title",
                "value",
                "stage",
                "created_at",
                "close_date",
                "notes",
            ],
            Self::Activities => &[
                "deal_id",
                "company_id",
                "kind",
                "note",
                "due_date",
                "done",
                "created_at",
            ],
            Self::TimeEntries => &["deal_id", "work_date", "hours", "rate", "notes"],
            Self::Invoices => &["number", "deal_id", "issue_date", "due_date", "status", "notes"],
            Self::InvoiceItems => &["invoice_id", "description", "qty", "unit_price"],
        }
    }

    /// Foreign keys declared by this table.
    #[must_use]
    pub const fn foreign_keys(&self) -> &'static [ForeignKey] {
        match self {
            Self::Companies => &[],
            Self::Contacts => &[ForeignKey {
                column: "company_id",
                parent: Self::Companies,
                on_delete: OnDelete::SetNull,
            }],
            Self::Deals => &[
                ForeignKey {
                    column: "company_id",
                    parent: Self::Companies,
                    on_delete: OnDelete::Cascade,
                },
                ForeignKey {
                    column: "contact_id",
                    parent: Self::Contacts,
                    on_delete: OnDelete::SetNull,
                },
            ],
            Self::Activities => &[
                ForeignKey {
                    column: "deal_id",
                    parent: Self::Deals,
                    on_delete: OnDelete::Cascade,
                },
                ForeignKey {
                    column: "company_id",
                    parent: Self::Companies,
                    on_delete: OnDelete::Cascade,
                },
            ],
            Self::TimeEntries => &[ForeignKey {
                column: "deal_id",
                parent: Self::Deals,
                on_delete: OnDelete::Cascade,
            }],
            Self::Invoices => &[ForeignKey {
                column: "deal_id",
                parent: Self::Deals,
                on_delete: OnDelete::Cascade,
            }],
            Self::InvoiceItems => &[ForeignKey {
                column: "invoice_id",
                parent: Self::Invoices,
                on_delete: OnDelete::Cascade,
            }],
        }
    }

    /// Tables (and columns) that reference this table.
    #[must_use]
    pub fn children(&self) -> Vec<ChildLink> {
        Self::ALL
            .iter()
            .flat_map(|child| {
                child
                    .foreign_keys()
                    .iter()
                    .filter(|fk| fk.parent == *self)
                    .map(|fk| ChildLink {
                        child: *child,
                        column: fk.column,
                        on_delete: fk.on_delete,
                    })
            })
            .collect()
    }

    /// Whether `column` is a data column of this table.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Return an error naming the first unknown column, if any.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownColumn` for the first column not in `columns()`.
    pub fn check_columns<'a>(&self, columns: impl IntoIterator<Item = &'a String>) -> Result<(), Error> {
        for column in columns {
            if !self.has_column(column) {
                return Err(Error::UnknownColumn {
                    table: self.as_str().to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for TrackedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackedTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownTable(s.to_string()))
    }
}
