//!
//! Utility module for consumers of matched events.
//!
//! Re-exports formatting helpers used when rendering transfer amounts.
/// Utility functions for formatting and display
pub mod index;

pub use index::format_token_amount;
