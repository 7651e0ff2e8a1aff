//! Data models for gate-sync.
//!
//! This module contains the domain models:
//! - TrackedTable (business entity types and their foreign keys)
//! - ChangeRecord, Operation, VersionStamp
//! - DeviceIdentity

pub mod change;
pub mod identity;
pub mod table;

pub use change::{ChangeRecord, FieldMap, Operation, Provenance, VersionStamp};
pub use identity::{DeviceIdentity, format_document_number};
pub use table::{ChildLink, ForeignKey, OnDelete, TrackedTable};
