//! Round synchronization state machine.
//!
//! The `SyncController` owns one subscription's ingestion path. Every iteration it reads the
//! watermark and the ledger tip, asks the configured strategy which rounds to fetch, then
//! processes those rounds strictly one at a time:
//!
//! 1. fetch the block from the ledger client
//! 2. run the filter set over its transactions in block order
//! 3. dispatch every match, waiting for the handlers
//! 4. record the round in the watermark store
//!
//! Only after step 4 does the next round start, so the watermark never passes a round whose
//! events were not delivered, and a stop request never leaves a round half processed.
//!
//! Once caught up the controller either tails the ledger, polling for a new tip every
//! `frequency`, or stops. Ledger failures back off exponentially up to `max_backoff`;
//! persistence failures end the run.

use crate::indexer::LedgerClient;
use crate::subscriber::sync::{
    events::{EventDispatcher, MatchedEvent},
    filters::FilterSet,
    progress_tracker::{PollSummary, SyncProgressTracker, SyncStats},
    strategies::SyncStrategy,
    watermark::{WatermarkError, WatermarkStore},
};
use crate::subscriber::{ErrorKind, StopReason, SubscriberError, SyncStatus};
use crate::transaction::{Block, Round};

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runtime knobs of the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Upper bound on rounds fetched per iteration.
    pub max_rounds_to_sync: u64,
    /// Keep polling for new rounds once caught up, instead of stopping.
    pub wait_for_block_when_at_tip: bool,
    /// Tip polling interval while tailing.
    pub frequency: Duration,
    /// Cap on the delay between retries after a transient failure.
    pub max_backoff: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_rounds_to_sync: 500,
            wait_for_block_when_at_tip: true,
            frequency: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Cooperative stop request shared between the lifecycle manager and the run loop.
///
/// The first reason given wins; later requests are no-ops.
#[derive(Debug, Clone, Default)]
pub struct StopRequest {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl StopRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to stop. Returns `false` if a stop had already been requested.
    pub fn request(&self, reason: impl Into<String>) -> bool {
        let first = self.reason.set(reason.into()).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> String {
        self.reason.get().cloned().unwrap_or_default()
    }

    /// Resolves once a stop has been requested.
    pub async fn requested(&self) {
        self.token.cancelled().await
    }
}

/// Counts for one processed round.
#[derive(Debug, Default, Clone, Copy)]
struct RoundOutcome {
    transactions: u64,
    matched: u64,
    failed: u64,
}

/// Drives fetch, match, dispatch and persist for one subscription.
pub struct SyncController {
    ledger: Arc<dyn LedgerClient>,
    watermark: Arc<dyn WatermarkStore>,
    filters: FilterSet,
    dispatcher: EventDispatcher,
    strategy: Box<dyn SyncStrategy>,
    settings: ControllerSettings,
    status: Arc<watch::Sender<SyncStatus>>,
    progress: Option<SyncProgressTracker>,
}

impl SyncController {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        watermark: Arc<dyn WatermarkStore>,
        filters: FilterSet,
        strategy: Box<dyn SyncStrategy>,
        settings: ControllerSettings,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            ledger,
            watermark,
            filters,
            dispatcher: EventDispatcher::new(),
            strategy,
            settings,
            status: Arc::new(status),
            progress: None,
        }
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn dispatcher_mut(&mut self) -> &mut EventDispatcher {
        &mut self.dispatcher
    }

    /// Configured filters with no event handler; their matches are dropped.
    pub fn unhandled_filters(&self) -> Vec<&str> {
        self.filters
            .names()
            .filter(|name| !self.dispatcher.has_handlers(name))
            .collect()
    }

    /// Sender side of the status channel, shared with the lifecycle manager.
    pub fn status_handle(&self) -> Arc<watch::Sender<SyncStatus>> {
        self.status.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Statistics for the rounds processed so far, if any poll has run.
    pub fn stats(&self) -> Option<SyncStats> {
        self.progress.as_ref().map(|p| p.get_stats())
    }

    fn set_status(&self, status: SyncStatus) {
        let previous = self.status.send_replace(status.clone());
        if previous != status {
            info!("Sync status: {:?} -> {:?}", previous, status);
        }
    }

    /// Run a single iteration: plan, then process the planned rounds.
    ///
    /// Returns the poll summary; errors are returned to the caller rather than reported.
    pub async fn poll_once(&mut self) -> Result<PollSummary, SubscriberError> {
        self.poll(&StopRequest::new()).await
    }

    async fn poll(&mut self, stop: &StopRequest) -> Result<PollSummary, SubscriberError> {
        let watermark = match self.watermark.get().await {
            Ok(watermark) => watermark,
            Err(WatermarkError::Stop(signal)) => {
                info!("Watermark store signalled stop before fetching: {}", signal);
                let mut summary = PollSummary::idle(signal.round, signal.round);
                summary.stop_signalled = true;
                self.dispatcher.report_poll(&summary);
                return Ok(summary);
            }
            Err(e) => {
                return Err(SubscriberError::PersistenceError(format!(
                    "failed to read watermark: {}",
                    e
                )));
            }
        };
        let tip = self.ledger.current_round().await?;
        debug!("Polled watermark {} and tip {}", watermark, tip);

        self.progress
            .get_or_insert_with(|| SyncProgressTracker::new(watermark));

        let Some(plan) = self
            .strategy
            .plan(watermark, tip, self.settings.max_rounds_to_sync)?
        else {
            let summary = PollSummary::idle(watermark, tip);
            self.dispatcher.report_poll(&summary);
            return Ok(summary);
        };

        self.set_status(SyncStatus::CatchingUp);
        info!(
            "Syncing {} rounds {}..={} with {} (watermark {}, tip {})",
            plan.round_count(),
            plan.start,
            plan.end,
            self.strategy.name(),
            watermark,
            tip
        );

        let mut summary = PollSummary::idle(watermark, tip);
        summary.skipped_range = plan.skipped;

        for round in plan.rounds() {
            if stop.is_requested() {
                info!(
                    "Stop requested, leaving rounds {}..={} for the next run",
                    round, plan.end
                );
                break;
            }

            let block = match self.ledger.block(round).await {
                Ok(block) => block,
                Err(e) => {
                    if summary.synced_range.is_some() {
                        self.dispatcher.report_poll(&summary);
                    }
                    return Err(e.into());
                }
            };

            let outcome = self.process_block(round, &block).await;
            let persisted = self.watermark.set(round).await;

            let stop_signal = match persisted {
                Ok(()) => None,
                Err(WatermarkError::Stop(signal)) => Some(signal),
                Err(e) => {
                    if summary.synced_range.is_some() {
                        self.dispatcher.report_poll(&summary);
                    }
                    return Err(SubscriberError::PersistenceError(format!(
                        "failed to record round {}: {}",
                        round, e
                    )));
                }
            };

            if let Some(progress) = self.progress.as_mut() {
                progress.record_round(round, outcome.transactions, outcome.matched, outcome.failed);
                progress.log_progress(false);
            }
            summary.new_watermark = round;
            summary.synced_range = Some((plan.start, round));
            summary.transactions_scanned += outcome.transactions;
            summary.events_matched += outcome.matched;
            summary.handler_failures += outcome.failed;

            if let Some(signal) = stop_signal {
                info!("Watermark store signalled stop: {}", signal);
                summary.stop_signalled = true;
                break;
            }
        }

        if let Some(progress) = self.progress.as_mut() {
            progress.log_progress(true);
        }
        self.dispatcher.report_poll(&summary);
        Ok(summary)
    }

    /// Match and dispatch every transaction of `block`, in block order.
    async fn process_block(&self, round: Round, block: &Block) -> RoundOutcome {
        let mut outcome = RoundOutcome {
            transactions: block.transactions.len() as u64,
            ..Default::default()
        };

        for transaction in &block.transactions {
            for filter_name in self.filters.matches(transaction) {
                let event = MatchedEvent {
                    filter_name: filter_name.to_string(),
                    round,
                    transaction: transaction.clone(),
                };
                let dispatched = self.dispatcher.dispatch(&event).await;
                outcome.matched += 1;
                outcome.failed += dispatched.failed as u64;
            }
        }

        debug!(
            "Round {}: {} transactions, {} matched",
            round, outcome.transactions, outcome.matched
        );
        outcome
    }

    /// Run until stopped, caught up without tailing, signalled by the watermark store, or
    /// ended by a fatal error.
    pub async fn run(mut self, stop: StopRequest) -> StopReason {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500).min(self.settings.max_backoff))
            .with_max_interval(self.settings.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let reason = loop {
            if stop.is_requested() {
                break StopReason::Requested(stop.reason());
            }

            match self.poll(&stop).await {
                Ok(summary) => {
                    backoff.reset();

                    if summary.stop_signalled {
                        break StopReason::WatermarkSignal(summary.new_watermark);
                    }
                    if !summary.is_at_tip() {
                        continue;
                    }
                    if !self.settings.wait_for_block_when_at_tip {
                        break StopReason::CaughtUp(summary.new_watermark);
                    }

                    self.set_status(SyncStatus::Tailing);
                    sleep_or_stop(self.settings.frequency, &stop).await;
                }
                Err(e) if !e.is_fatal() => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.settings.max_backoff);
                    match e.kind() {
                        ErrorKind::LedgerRejected => {
                            error!("{}; the indexer may need attention, retrying in {:?}", e, delay)
                        }
                        _ => warn!("{}; retrying in {:?}", e, delay),
                    }
                    self.dispatcher.report_error(&e);
                    sleep_or_stop(delay, &stop).await;
                }
                Err(e) => {
                    error!("Subscription failed: {}", e);
                    self.dispatcher.report_error(&e);
                    break StopReason::Fatal(e.to_string());
                }
            }
        };

        if let Some(stats) = self.stats() {
            info!("{}", stats.summary());
        }
        info!("Subscriber stopped: {}", reason);
        self.set_status(SyncStatus::Stopped(reason.clone()));
        reason
    }
}

/// Sleep for `duration` unless a stop is requested first.
async fn sleep_or_stop(duration: Duration, stop: &StopRequest) {
    tokio::select! {
        _ = stop.requested() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}
