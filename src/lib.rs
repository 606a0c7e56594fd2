//! Resumable, filter-driven transaction subscriptions for round-numbered ledgers.
//!
//! A subscriber declares named filters over transaction attributes, then replays and tails the
//! ledger, delivering every matching transaction to the handlers registered for that name. Progress
//! is recorded per round in a [`WatermarkStore`], so a restarted subscriber resumes after the last
//! fully processed round.
//!
//! ```no_run
//! use std::sync::Arc;
//! use round_subscriber::{
//!     AlgorandIndexerClient, AlgorandSubscriber, FileWatermarkStore, HandlerResult, MatchedEvent,
//!     SubscriberConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SubscriberConfig::from_path("subscriber.json")?;
//! let ledger = Arc::new(AlgorandIndexerClient::new("https://mainnet-idx.algonode.cloud", None)?);
//! let watermark = Arc::new(FileWatermarkStore::new("watermark.json"));
//!
//! let mut subscriber = AlgorandSubscriber::new(config, ledger, watermark)?;
//! subscriber.on("usdc", |event: &MatchedEvent| -> HandlerResult {
//!     println!("{} in round {}", event.transaction.id, event.round);
//!     Ok(())
//! })?;
//! subscriber.start()?;
//! subscriber.wait_until_stopped().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod indexer;
pub mod subscriber;
pub mod transaction;
pub mod utils;

pub use config::SubscriberConfig;
pub use indexer::{AlgorandIndexerClient, LedgerClient, LedgerError};
pub use subscriber::sync::{
    BoundedWatermarkStore, EventHandler, FileWatermarkStore, FilterSet, HandlerResult,
    InMemoryWatermarkStore, MatchedEvent, NamedFilter, PollSummary, StopSignal, SyncBehaviour,
    TransactionFilter, WatermarkError, WatermarkStore,
};
pub use subscriber::{AlgorandSubscriber, ErrorKind, StopReason, SubscriberError, SyncStatus};
pub use transaction::{Block, Round, Transaction, TransactionPayload, TransactionType};
