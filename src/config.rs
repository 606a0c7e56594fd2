//! Subscriber configuration.
//!
//! Option names follow the JSON shape consumers already write:
//!
//! ```json
//! {
//!   "filters": [{"name": "usdc", "filter": {"type": "axfer", "assetId": 31566704, "minAmount": 1000000}}],
//!   "waitForBlockWhenAtTip": true,
//!   "syncBehaviour": "sync-oldest",
//!   "maxRoundsToSync": 1
//! }
//! ```
//!
//! The watermark store is not part of this document; it is handed to the subscriber directly.

use crate::subscriber::SubscriberError;
use crate::subscriber::sync::{ControllerSettings, FilterSet, NamedFilter, SyncBehaviour};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_max_rounds_to_sync() -> u64 {
	500
}

fn default_frequency_in_seconds() -> f64 {
	1.0
}

fn default_max_backoff_seconds() -> u64 {
	30
}

/// Configuration of one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscriberConfig {
	/// Named match predicates.
	pub filters: Vec<NamedFilter>,
	/// Keep polling for new rounds once caught up instead of stopping.
	#[serde(default)]
	pub wait_for_block_when_at_tip: bool,
	#[serde(default)]
	pub sync_behaviour: SyncBehaviour,
	/// Per-iteration cap on fetched rounds.
	#[serde(default = "default_max_rounds_to_sync")]
	pub max_rounds_to_sync: u64,
	/// Tip polling interval while tailing.
	#[serde(default = "default_frequency_in_seconds")]
	pub frequency_in_seconds: f64,
	/// Cap on the retry delay after a transient ledger failure.
	#[serde(default = "default_max_backoff_seconds")]
	pub max_backoff_seconds: u64,
}

impl Default for SubscriberConfig {
	fn default() -> Self {
		Self {
			filters: Vec::new(),
			wait_for_block_when_at_tip: false,
			sync_behaviour: SyncBehaviour::default(),
			max_rounds_to_sync: default_max_rounds_to_sync(),
			frequency_in_seconds: default_frequency_in_seconds(),
			max_backoff_seconds: default_max_backoff_seconds(),
		}
	}
}

impl SubscriberConfig {
	pub fn new(filters: Vec<NamedFilter>) -> Self {
		Self {
			filters,
			..Default::default()
		}
	}

	/// Parse and validate a JSON document.
	pub fn from_json_str(raw: &str) -> Result<Self, SubscriberError> {
		let config: SubscriberConfig = serde_json::from_str(raw).map_err(|e| {
			SubscriberError::ConfigurationError(format!("invalid subscriber config: {}", e))
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Read, parse and validate a JSON file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SubscriberError> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path).map_err(|e| {
			SubscriberError::ConfigurationError(format!(
				"failed to read config {}: {}",
				path.display(),
				e
			))
		})?;
		Self::from_json_str(&raw)
	}

	/// Check option ranges and compile the filters.
	pub fn validate(&self) -> Result<FilterSet, SubscriberError> {
		if self.max_rounds_to_sync == 0 {
			return Err(SubscriberError::ConfigurationError(
				"maxRoundsToSync must be greater than 0".to_string(),
			));
		}
		self.frequency()?;
		if self.max_backoff_seconds == 0 {
			return Err(SubscriberError::ConfigurationError(
				"maxBackoffSeconds must be greater than 0".to_string(),
			));
		}

		FilterSet::compile(self.filters.clone())
	}

	/// Tip polling interval. Rejects values a `Duration` cannot hold.
	fn frequency(&self) -> Result<Duration, SubscriberError> {
		let invalid = || {
			SubscriberError::ConfigurationError(format!(
				"frequencyInSeconds must be a positive number of seconds, got {}",
				self.frequency_in_seconds
			))
		};
		if self.frequency_in_seconds <= 0.0 {
			return Err(invalid());
		}
		Duration::try_from_secs_f64(self.frequency_in_seconds).map_err(|_| invalid())
	}

	pub fn controller_settings(&self) -> Result<ControllerSettings, SubscriberError> {
		Ok(ControllerSettings {
			max_rounds_to_sync: self.max_rounds_to_sync,
			wait_for_block_when_at_tip: self.wait_for_block_when_at_tip,
			frequency: self.frequency()?,
			max_backoff: Duration::from_secs(self.max_backoff_seconds),
		})
	}
}
