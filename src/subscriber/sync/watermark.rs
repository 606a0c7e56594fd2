//! Durable progress marker.
//!
//! The watermark is the last round whose transactions have been matched, dispatched and
//! recorded. The controller reads it at the top of every iteration and advances it one round
//! at a time; it never keeps its own authoritative copy.
//!
//! `set` may answer with a [`StopSignal`] instead of an error. The round has still been
//! recorded in that case, and the controller ends the subscription cleanly.

use crate::transaction::Round;

use std::fmt;

/// Request to end the subscription, raised by a watermark store after recording a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSignal {
    /// Round whose `set` raised the signal.
    pub round: Round,
    pub reason: String,
}

impl StopSignal {
    pub fn new(round: Round, reason: impl Into<String>) -> Self {
        Self {
            round,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stop at round {}: {}", self.round, self.reason)
    }
}

/// Errors returned by a watermark store
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    /// Clean termination request. Not a failure.
    #[error("Stop signalled: {0}")]
    Stop(StopSignal),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable `get`/`set` pair for the watermark.
///
/// `set` is only ever called with strictly increasing rounds, and only after the round's
/// dispatch has completed.
#[async_trait::async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark, or the store's default when nothing has been recorded yet.
    ///
    /// Returning `WatermarkError::Stop` ends the subscription before anything is fetched.
    async fn get(&self) -> Result<Round, WatermarkError>;

    /// Record `round` as fully processed. Returning `WatermarkError::Stop` ends the
    /// subscription after this round.
    async fn set(&self, round: Round) -> Result<(), WatermarkError>;
}
