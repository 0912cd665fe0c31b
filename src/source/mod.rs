//! Record sources for the sync engine
//!
//! This module provides the fetch interface consumed by the pagination orchestrator, the raw
//! record type parsers consume, and an HTTP implementation that maps status codes and
//! rate-limit headers into typed errors.

/// HTTP JSON client implementing `RecordSource`
mod client;
/// Type definitions for raw records, windows and fetch errors
mod types;

pub use client::{HttpRecordSource, QueryParams};
pub use types::*;
