//! Domain Layer - Core price-state types and logic.
//!
//! Pure Rust with no I/O: the symbol universe, the per-symbol trade record,
//! and the store that merges observations from every source.

/// Symbols, trade records, observations, connection status.
pub mod streaming;

/// Concurrent per-symbol price state and its update rule.
pub mod price_state;
