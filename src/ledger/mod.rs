//! Canonical ledger model.
//!
//! Every parser normalizes its source records into [`AuditLog`]s (atomic, signed balance changes)
//! and optionally [`Transaction`]s (composite economic events). Everything downstream of the
//! parsers (merge, extraction, aggregation, persistence) only ever sees these two types.

/// Entity definitions and the composite import index
mod types;

pub use types::*;
