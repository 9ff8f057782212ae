//! Data models for the ledger engine.
//!
//! This module contains the structures flowing through the sync pipeline:
//!
//! - `Member`, `GroupSnapshot`: one group's upstream truth for a single pass
//! - `LedgerRow`, `MonthSection`, `LedgerTable`: the persisted ledger shape
//! - `TransferRecord`, `TransferIndex`: cross-group transfer resolution

pub mod ledger;
pub mod member;
pub mod transfer;

pub use ledger::{LedgerRow, LedgerTable, MonthSection, SectionState};
pub use member::{GroupSnapshot, Member};
pub use transfer::{TransferIndex, TransferRecord};
