//! Progress tracking for round synchronization.
//!
//! This module provides the `SyncProgressTracker`, which records the rounds the controller has
//! processed during one run, counts scanned transactions, matched events and handler failures,
//! and notices when rounds were skipped (the `sync-newest` strategy jumps over stale backlog).
//!
//! It only holds statistics for observability. The durable progress marker is the watermark.

use crate::transaction::Round;

use serde::Serialize;
use tracing::{info, warn};

/// Rounds between two periodic progress logs.
const LOG_EVERY_ROUNDS: u64 = 1000;

/// Service for tracking synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Watermark at the start of this run
    start_round: Round,
    /// The highest round processed (or the starting watermark)
    highest_processed_round: Round,
    /// Whether any round was processed in this run
    has_processed_data: bool,
    /// Total rounds processed
    rounds_processed: u64,
    /// Total transactions run through the filter set
    transactions_scanned: u64,
    /// Total matched events dispatched
    events_matched: u64,
    /// Total handler failures
    handler_failures: u64,
    /// Ranges of rounds that were never fetched
    gaps: Vec<(Round, Round)>,
    /// Last round at which we logged progress
    last_logged_round: Round,
}

impl SyncProgressTracker {
    /// Create a new progress tracker starting from the given watermark.
    pub fn new(start_round: Round) -> Self {
        Self {
            start_round,
            highest_processed_round: start_round,
            has_processed_data: false,
            rounds_processed: 0,
            transactions_scanned: 0,
            events_matched: 0,
            handler_failures: 0,
            gaps: Vec::new(),
            last_logged_round: start_round,
        }
    }

    /// Record a fully dispatched and persisted round.
    ///
    /// A round that does not directly follow the previous one opens a gap.
    pub fn record_round(&mut self, round: Round, transactions: u64, matched: u64, failed: u64) {
        let expected = self.highest_processed_round + 1;
        if round > expected {
            self.gaps.push((expected, round - 1));
        }

        self.highest_processed_round = self.highest_processed_round.max(round);
        self.has_processed_data = true;
        self.rounds_processed += 1;
        self.transactions_scanned += transactions;
        self.events_matched += matched;
        self.handler_failures += failed;
    }

    pub fn highest_processed_round(&self) -> Round {
        self.highest_processed_round
    }

    /// Ranges of rounds `(first, last)` skipped between processed rounds.
    pub fn check_for_gaps(&self) -> Vec<(Round, Round)> {
        self.gaps.clone()
    }

    /// Log progress every 1000 rounds or when forced
    pub fn log_progress(&mut self, force: bool) {
        let rounds_since_last_log = self
            .highest_processed_round
            .saturating_sub(self.last_logged_round);
        let should_log = force || rounds_since_last_log >= LOG_EVERY_ROUNDS;

        if should_log && self.has_processed_data {
            info!(
                "Sync progress: {} rounds, {} transactions scanned, {} events matched up to round {}",
                self.rounds_processed,
                self.transactions_scanned,
                self.events_matched,
                self.highest_processed_round
            );
            if self.handler_failures > 0 {
                warn!(
                    "{} handler failures so far in this run",
                    self.handler_failures
                );
            }
            self.last_logged_round = self.highest_processed_round;
        }
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_round: self.start_round,
            highest_processed_round: self.highest_processed_round,
            has_processed_data: self.has_processed_data,
            rounds_processed: self.rounds_processed,
            transactions_scanned: self.transactions_scanned,
            events_matched: self.events_matched,
            handler_failures: self.handler_failures,
            gaps: self.check_for_gaps(),
        }
    }
}

/// Statistics about one run of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub start_round: Round,
    pub highest_processed_round: Round,
    pub has_processed_data: bool,
    pub rounds_processed: u64,
    pub transactions_scanned: u64,
    pub events_matched: u64,
    pub handler_failures: u64,
    pub gaps: Vec<(Round, Round)>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} rounds, {} transactions, {} events, {} handler failures{}",
            self.start_round,
            self.highest_processed_round,
            self.rounds_processed,
            self.transactions_scanned,
            self.events_matched,
            self.handler_failures,
            if self.gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} skipped ranges)", self.gaps.len())
            }
        )
    }
}

/// What one poll of the controller did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Watermark read at the start of the poll.
    pub starting_watermark: Round,
    /// Watermark after the poll.
    pub new_watermark: Round,
    /// Tip observed at the start of the poll.
    pub current_round: Round,
    /// Rounds fetched and processed, inclusive.
    pub synced_range: Option<(Round, Round)>,
    /// Backlog rounds deliberately not fetched, inclusive.
    pub skipped_range: Option<(Round, Round)>,
    pub transactions_scanned: u64,
    pub events_matched: u64,
    pub handler_failures: u64,
    /// The watermark store asked the subscriber to stop.
    pub stop_signalled: bool,
}

impl PollSummary {
    pub fn idle(watermark: Round, current_round: Round) -> Self {
        Self {
            starting_watermark: watermark,
            new_watermark: watermark,
            current_round,
            synced_range: None,
            skipped_range: None,
            transactions_scanned: 0,
            events_matched: 0,
            handler_failures: 0,
            stop_signalled: false,
        }
    }

    /// Whether the poll found nothing to fetch.
    pub fn is_at_tip(&self) -> bool {
        self.synced_range.is_none() && self.new_watermark >= self.current_round
    }
}
