//! Persistent ledger store.
//!
//! The backing storage is a tabular collaborator: every group's ledger is a
//! grid of string cells, read and rewritten whole. This module owns the
//! read/rewrite contract on top of that grid:
//!
//! - `schema` normalizes any stored table (section-labeled or legacy
//!   unlabeled) into the canonical [`LedgerTable`] before business rules run,
//!   and renders tables back out;
//! - `file_store` keeps one table file per group and enforces the
//!   archive-preservation safety check on every rewrite.

pub mod file_store;
pub mod schema;

use thiserror::Error;

pub use file_store::FileLedgerStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Ledger store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt ledger table: {0}")]
    Corrupt(String),

    #[error("Refusing rewrite for '{group}': {detail}")]
    ArchiveLoss { group: String, detail: String },
}

impl StoreError {
    /// I/O failures are worth another attempt; corrupt tables and failed
    /// safety checks are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}
