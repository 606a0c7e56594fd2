use crate::indexer::LedgerError;
use crate::transaction::Round;

use std::fmt;

/// Error types surfaced by the subscriber
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
	#[error("Configuration error: {0}")]
	ConfigurationError(String),

	#[error("Transient fetch error: {0}")]
	TransientFetchError(LedgerError),

	#[error("Ledger rejected request: {0}")]
	LedgerRejectedError(LedgerError),

	#[error("Persistence error: {0}")]
	PersistenceError(String),

	#[error(
		"Handler for '{filter_name}' failed on transaction {transaction_id} in round {round}: {message}"
	)]
	HandlerError {
		filter_name: String,
		transaction_id: String,
		round: Round,
		message: String,
	},

	#[error(
		"Backlog of {backlog} rounds exceeds maxRoundsToSync {max_rounds} (watermark {watermark}, tip {tip})"
	)]
	BacklogError {
		watermark: Round,
		tip: Round,
		backlog: u64,
		max_rounds: u64,
	},

	#[error("Subscriber already started")]
	AlreadyStartedError,
}

impl From<LedgerError> for SubscriberError {
	fn from(error: LedgerError) -> Self {
		if error.is_transient() {
			SubscriberError::TransientFetchError(error)
		} else {
			SubscriberError::LedgerRejectedError(error)
		}
	}
}

/// Coarse classification of a [`SubscriberError`], for error sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	TransientFetch,
	/// The ledger answered with something retrying alone is unlikely to fix.
	LedgerRejected,
	Persistence,
	Handler,
	Configuration,
	Backlog,
}

impl SubscriberError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			SubscriberError::ConfigurationError(_) | SubscriberError::AlreadyStartedError => {
				ErrorKind::Configuration
			}
			SubscriberError::TransientFetchError(_) => ErrorKind::TransientFetch,
			SubscriberError::LedgerRejectedError(_) => ErrorKind::LedgerRejected,
			SubscriberError::PersistenceError(_) => ErrorKind::Persistence,
			SubscriberError::HandlerError { .. } => ErrorKind::Handler,
			SubscriberError::BacklogError { .. } => ErrorKind::Backlog,
		}
	}

	/// Whether the error ends the subscription.
	///
	/// Ledger failures of either kind are retried with backoff and handler failures are
	/// isolated; everything else stops the run loop.
	pub fn is_fatal(&self) -> bool {
		!matches!(
			self.kind(),
			ErrorKind::TransientFetch | ErrorKind::LedgerRejected | ErrorKind::Handler
		)
	}
}

/// Why the run loop reached `Stopped`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
	/// `stop(reason)` was called.
	Requested(String),
	/// The watermark store signalled stop, with the watermark at this round.
	WatermarkSignal(Round),
	/// Caught up to this round with `waitForBlockWhenAtTip` disabled.
	CaughtUp(Round),
	/// A fatal error ended the subscription.
	Fatal(String),
}

impl fmt::Display for StopReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StopReason::Requested(reason) => write!(f, "stop requested ({})", reason),
			StopReason::WatermarkSignal(round) => {
				write!(f, "watermark store signalled stop at round {}", round)
			}
			StopReason::CaughtUp(round) => write!(f, "caught up to round {}", round),
			StopReason::Fatal(error) => write!(f, "fatal error: {}", error),
		}
	}
}

/// Observable state of the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
	Idle,
	CatchingUp,
	Tailing,
	Stopped(StopReason),
}

impl SyncStatus {
	pub fn is_stopped(&self) -> bool {
		matches!(self, SyncStatus::Stopped(_))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_fetch_and_handler_errors_are_recoverable() {
		let transient = SubscriberError::from(LedgerError::RoundNotAvailable(7));
		let handler = SubscriberError::HandlerError {
			filter_name: "usdc".to_string(),
			transaction_id: "TX".to_string(),
			round: 7,
			message: "boom".to_string(),
		};
		let persistence = SubscriberError::PersistenceError("disk full".to_string());

		assert_eq!(transient.kind(), ErrorKind::TransientFetch);
		assert!(!transient.is_fatal());
		assert!(!handler.is_fatal());
		assert!(persistence.is_fatal());
		assert!(SubscriberError::ConfigurationError("dup".to_string()).is_fatal());
	}

	#[test]
	fn ledger_errors_split_into_transient_and_rejected() {
		let kind = |e: LedgerError| SubscriberError::from(e).kind();

		assert_eq!(kind(LedgerError::Unreachable("reset".to_string())), ErrorKind::TransientFetch);
		assert_eq!(
			kind(LedgerError::StatusError { status: 503, body: String::new() }),
			ErrorKind::TransientFetch
		);
		assert_eq!(
			kind(LedgerError::StatusError { status: 429, body: String::new() }),
			ErrorKind::TransientFetch
		);
		assert_eq!(
			kind(LedgerError::StatusError { status: 401, body: "bad token".to_string() }),
			ErrorKind::LedgerRejected
		);
		assert_eq!(
			kind(LedgerError::UnexpectedPayload("no round".to_string())),
			ErrorKind::LedgerRejected
		);

		let rejected = SubscriberError::from(LedgerError::UnexpectedPayload("x".to_string()));
		assert!(!rejected.is_fatal());
	}
}
