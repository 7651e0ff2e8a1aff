//! gate-sync - offline change tracking and pack sync for business records
//!
//! This crate provides the core functionality for the `gsync` CLI tool:
//! every mutation of a tracked business table is captured into a per-device
//! change log, and devices converge by exchanging packs of those records.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (TrackedTable, ChangeRecord, DeviceIdentity)
//! - [`storage`] - SQLite database layer and change capture
//! - [`sync`] - Pack export/import and the merge engine
//! - [`config`] - Configuration management
//! - [`validate`] - Input normalization for the CLI
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod sync;
pub mod validate;

pub use error::{Error, Result};
