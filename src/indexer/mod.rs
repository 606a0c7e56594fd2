//! Ledger access for the subscriber
//!
//! This module provides the [`LedgerClient`] contract consumed by the sync engine and a client
//! for the Algorand indexer REST API, which serves rounds, their transactions, and the tip.

/// REST client for the indexer
mod client;
/// Type definitions for indexer data structures
mod types;

pub use client::{AlgorandIndexerClient, LedgerClient};
pub use types::*;
