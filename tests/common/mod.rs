#![allow(dead_code)]

use async_trait::async_trait;
use round_subscriber::indexer::{LedgerClient, LedgerError};
use round_subscriber::subscriber::sync::{StopSignal, WatermarkError, WatermarkStore};
use round_subscriber::{
    Block, MatchedEvent, NamedFilter, Round, SubscriberConfig, SyncBehaviour, Transaction,
    TransactionPayload, TransactionType,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// ------- Ledger that serves a fixed set of blocks -------
pub struct ScriptedLedger {
    tip: AtomicU64,
    blocks: Mutex<HashMap<Round, Vec<Transaction>>>,
    fetched: Mutex<Vec<Round>>,
    fail_once: Mutex<HashSet<Round>>,
    reject_once: Mutex<HashSet<Round>>,
    tip_failures: AtomicUsize,
}

impl ScriptedLedger {
    pub fn new(tip: Round) -> Self {
        Self {
            tip: AtomicU64::new(tip),
            blocks: Mutex::new(HashMap::new()),
            fetched: Mutex::new(Vec::new()),
            fail_once: Mutex::new(HashSet::new()),
            reject_once: Mutex::new(HashSet::new()),
            tip_failures: AtomicUsize::new(0),
        }
    }

    pub fn with_block(self, round: Round, transactions: Vec<Transaction>) -> Self {
        self.blocks.lock().unwrap().insert(round, transactions);
        self
    }

    /// The first fetch of `round` fails with a transient error.
    pub fn failing_once_at(self, round: Round) -> Self {
        self.fail_once.lock().unwrap().insert(round);
        self
    }

    /// The first fetch of `round` returns a payload the client cannot use.
    pub fn rejecting_once_at(self, round: Round) -> Self {
        self.reject_once.lock().unwrap().insert(round);
        self
    }

    /// The next `count` tip requests fail.
    pub fn failing_tip(self, count: usize) -> Self {
        self.fail_next_tips(count);
        self
    }

    /// Like `failing_tip`, for a ledger already shared with a running subscriber.
    pub fn fail_next_tips(&self, count: usize) {
        self.tip_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_tip(&self, tip: Round) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn fetched(&self) -> Vec<Round> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn current_round(&self) -> Result<Round, LedgerError> {
        let failing = self
            .tip_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Unreachable("tip unavailable".to_string()));
        }
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn block(&self, round: Round) -> Result<Block, LedgerError> {
        self.fetched.lock().unwrap().push(round);
        if self.fail_once.lock().unwrap().remove(&round) {
            return Err(LedgerError::Unreachable(format!("timeout fetching {}", round)));
        }
        if self.reject_once.lock().unwrap().remove(&round) {
            return Err(LedgerError::UnexpectedPayload(format!(
                "block {} has no transactions field",
                round
            )));
        }
        if round > self.tip.load(Ordering::SeqCst) {
            return Err(LedgerError::RoundNotAvailable(round));
        }
        let transactions = self
            .blocks
            .lock()
            .unwrap()
            .get(&round)
            .cloned()
            .unwrap_or_default();
        Ok(Block::new(round, transactions))
    }
}

/// ------- Watermark store that records every set -------
pub struct RecordingStore {
    watermark: Mutex<Round>,
    history: Mutex<Vec<Round>>,
    stop_at: Option<Round>,
    fail_at: Option<Round>,
}

impl RecordingStore {
    pub fn new(watermark: Round) -> Self {
        Self {
            watermark: Mutex::new(watermark),
            history: Mutex::new(Vec::new()),
            stop_at: None,
            fail_at: None,
        }
    }

    pub fn stopping_at(mut self, round: Round) -> Self {
        self.stop_at = Some(round);
        self
    }

    pub fn failing_at(mut self, round: Round) -> Self {
        self.fail_at = Some(round);
        self
    }

    pub fn history(&self) -> Vec<Round> {
        self.history.lock().unwrap().clone()
    }

    pub fn current(&self) -> Round {
        *self.watermark.lock().unwrap()
    }
}

#[async_trait]
impl WatermarkStore for RecordingStore {
    async fn get(&self) -> Result<Round, WatermarkError> {
        Ok(*self.watermark.lock().unwrap())
    }

    async fn set(&self, round: Round) -> Result<(), WatermarkError> {
        if self.fail_at == Some(round) {
            return Err(WatermarkError::Persistence("disk full".to_string()));
        }
        *self.watermark.lock().unwrap() = round;
        self.history.lock().unwrap().push(round);
        if self.stop_at == Some(round) {
            return Err(WatermarkError::Stop(StopSignal::new(round, "end of range")));
        }
        Ok(())
    }
}

/// ------- Fixtures -------
pub const USDC: u64 = 31566704;

pub fn axfer(id: &str, round: Round, asset_id: u64, amount: u64) -> Transaction {
    Transaction {
        id: id.to_string(),
        round,
        intra_round_offset: 0,
        sender: "SENDER".to_string(),
        tx_type: TransactionType::AssetTransfer,
        payload: TransactionPayload::AssetTransfer {
            receiver: "RECEIVER".to_string(),
            asset_id,
            amount,
        },
    }
}

pub fn appl(id: &str, round: Round, app_id: u64) -> Transaction {
    Transaction {
        id: id.to_string(),
        round,
        intra_round_offset: 0,
        sender: "CALLER".to_string(),
        tx_type: TransactionType::ApplicationCall,
        payload: TransactionPayload::ApplicationCall { app_id },
    }
}

pub fn config(
    filters: Vec<NamedFilter>,
    behaviour: SyncBehaviour,
    max_rounds_to_sync: u64,
    wait_for_block_when_at_tip: bool,
) -> SubscriberConfig {
    let mut config = SubscriberConfig::new(filters);
    config.sync_behaviour = behaviour;
    config.max_rounds_to_sync = max_rounds_to_sync;
    config.wait_for_block_when_at_tip = wait_for_block_when_at_tip;
    config.frequency_in_seconds = 0.01;
    config.max_backoff_seconds = 1;
    config
}

pub type EventLog = Arc<Mutex<Vec<MatchedEvent>>>;

/// Handler that appends every event to `log`.
pub fn recorder(log: EventLog) -> impl Fn(&MatchedEvent) -> round_subscriber::HandlerResult + Send + Sync + 'static {
    move |event: &MatchedEvent| -> round_subscriber::HandlerResult {
        log.lock().unwrap().push(event.clone());
        Ok(())
    }
}
