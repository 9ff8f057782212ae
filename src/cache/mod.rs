//! Tiered TTL cache for ledger tables.
//!
//! Two tiers share one envelope shape: a memory map for the running process
//! and JSON files for restarts. Readers go through [`SmartCache`] so the hot
//! path never touches the store or upstream; the sync pipeline invalidates a
//! group's key after every successful rewrite.

pub mod manager;

pub use manager::{CacheEntry, CacheLookup, CacheStats, SmartCache};
