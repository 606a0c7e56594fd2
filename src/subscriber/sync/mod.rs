//! Round Synchronization Module
//!
//! This module provides the core logic for following a round-numbered ledger and delivering the
//! transactions that match a consumer's filters. It is composed of several submodules, each
//! responsible for a specific aspect of the sync process:
//!
//! - `controller`: The state machine that plans, fetches, matches, dispatches and persists rounds.
//! - `filters`: Named transaction filters compiled into an immutable `FilterSet`.
//! - `events`: Matched events, the handler traits and the `EventDispatcher` that isolates handler failures.
//! - `strategies`: Catch-up strategies (`sync-oldest`, `sync-newest`, `fail`) deciding which rounds to fetch.
//! - `progress_tracker`: Per-run statistics, poll summaries and skipped-range bookkeeping.
//! - `watermark`: The `WatermarkStore` contract and the `StopSignal` a store may raise.
//! - `repositories`: In-memory, file-backed and range-bounded watermark stores.
//!
//! The controller processes one round at a time, and only records a round in the watermark store
//! after every matched event of that round has been dispatched.

/// Fetch, match, dispatch and persist loop
pub mod controller;
/// Event delivery to consumer handlers
pub mod events;
/// Named transaction filters
pub mod filters;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Watermark store implementations
pub mod repositories;
/// Pluggable catch-up strategies
pub mod strategies;
/// Watermark store contract
pub mod watermark;

pub use controller::{ControllerSettings, StopRequest, SyncController};
pub use events::{
    BoxError, DispatchOutcome, ErrorHandler, EventDispatcher, EventHandler, HandlerResult,
    MatchedEvent, PollHandler,
};
pub use filters::{FilterSet, NamedFilter, TransactionFilter};
pub use progress_tracker::{PollSummary, SyncProgressTracker, SyncStats};
pub use repositories::{BoundedWatermarkStore, FileWatermarkStore, InMemoryWatermarkStore};
pub use strategies::{RoundPlan, SyncBehaviour, SyncStrategy};
pub use watermark::{StopSignal, WatermarkError, WatermarkStore};
