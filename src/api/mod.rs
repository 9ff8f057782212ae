//! Upstream activity API client module.
//!
//! Provides the `UpstreamClient` for fetching per-group cumulative activity
//! snapshots, with retry/backoff and egress-path rotation per attempt.

pub mod client;
pub mod error;

pub use client::{UpstreamClient, UpstreamGroup};
pub use error::UpstreamError;
