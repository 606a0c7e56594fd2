use crate::subscriber::SubscriberError;
use crate::transaction::Round;

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// How the controller catches up when the watermark is behind the tip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncBehaviour {
	/// Drain the backlog oldest round first; never skips a round.
	#[default]
	#[serde(rename = "sync-oldest")]
	SyncOldest,
	/// Jump to the newest `maxRoundsToSync` rounds, discarding older backlog.
	#[serde(rename = "sync-newest")]
	SyncNewest,
	/// Refuse to sync when the backlog is larger than `maxRoundsToSync`.
	#[serde(rename = "fail")]
	Fail,
}

impl SyncBehaviour {
	/// Strategy implementing this behaviour
	pub fn strategy(&self) -> Box<dyn SyncStrategy> {
		match self {
			SyncBehaviour::SyncOldest => Box::new(SyncOldest),
			SyncBehaviour::SyncNewest => Box::new(SyncNewest),
			SyncBehaviour::Fail => Box::new(FailOnBacklog),
		}
	}
}

/// Rounds to fetch in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPlan {
	/// First round to fetch.
	pub start: Round,
	/// Last round to fetch, inclusive.
	pub end: Round,
	/// Backlog rounds the plan deliberately leaves behind, inclusive.
	pub skipped: Option<(Round, Round)>,
}

impl RoundPlan {
	/// Rounds in ascending fetch order.
	pub fn rounds(&self) -> RangeInclusive<Round> {
		self.start..=self.end
	}

	/// Number of rounds the plan fetches. Plans are never empty.
	pub fn round_count(&self) -> u64 {
		self.end - self.start + 1
	}
}

/// Trait for catch-up strategies
pub trait SyncStrategy: Send + Sync {
	/// Decide which rounds to fetch next.
	///
	/// Returns `None` when `watermark >= tip`. Every returned plan starts strictly after
	/// `watermark`, so persisting its rounds in order keeps the watermark increasing.
	fn plan(
		&self,
		watermark: Round,
		tip: Round,
		max_rounds_to_sync: u64,
	) -> Result<Option<RoundPlan>, SubscriberError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

fn check_budget(max_rounds_to_sync: u64) -> Result<(), SubscriberError> {
	if max_rounds_to_sync == 0 {
		return Err(SubscriberError::ConfigurationError(
			"maxRoundsToSync must be greater than 0".to_string(),
		));
	}
	Ok(())
}

/// Strategy that drains the backlog from the oldest unprocessed round
pub struct SyncOldest;

impl SyncStrategy for SyncOldest {
	fn plan(
		&self,
		watermark: Round,
		tip: Round,
		max_rounds_to_sync: u64,
	) -> Result<Option<RoundPlan>, SubscriberError> {
		check_budget(max_rounds_to_sync)?;
		if watermark >= tip {
			return Ok(None);
		}

		let end = watermark.saturating_add(max_rounds_to_sync).min(tip);
		debug!(
			"sync-oldest: watermark {}, tip {}, fetching {}..={}",
			watermark,
			tip,
			watermark + 1,
			end
		);
		Ok(Some(RoundPlan {
			start: watermark + 1,
			end,
			skipped: None,
		}))
	}

	fn name(&self) -> &'static str {
		"sync-oldest"
	}
}

/// Strategy that keeps only the newest `maxRoundsToSync` rounds of a large backlog
pub struct SyncNewest;

impl SyncStrategy for SyncNewest {
	fn plan(
		&self,
		watermark: Round,
		tip: Round,
		max_rounds_to_sync: u64,
	) -> Result<Option<RoundPlan>, SubscriberError> {
		check_budget(max_rounds_to_sync)?;
		if watermark >= tip {
			return Ok(None);
		}

		let backlog = tip - watermark;
		if backlog <= max_rounds_to_sync {
			return Ok(Some(RoundPlan {
				start: watermark + 1,
				end: tip,
				skipped: None,
			}));
		}

		let start = tip - max_rounds_to_sync + 1;
		info!(
			"sync-newest: skipping rounds {}..={} ({} rounds behind), fetching {}..={}",
			watermark + 1,
			start - 1,
			backlog,
			start,
			tip
		);
		Ok(Some(RoundPlan {
			start,
			end: tip,
			skipped: Some((watermark + 1, start - 1)),
		}))
	}

	fn name(&self) -> &'static str {
		"sync-newest"
	}
}

/// Strategy that errors instead of catching up on a large backlog
pub struct FailOnBacklog;

impl SyncStrategy for FailOnBacklog {
	fn plan(
		&self,
		watermark: Round,
		tip: Round,
		max_rounds_to_sync: u64,
	) -> Result<Option<RoundPlan>, SubscriberError> {
		check_budget(max_rounds_to_sync)?;
		if watermark >= tip {
			return Ok(None);
		}

		let backlog = tip - watermark;
		if backlog > max_rounds_to_sync {
			return Err(SubscriberError::BacklogError {
				watermark,
				tip,
				backlog,
				max_rounds: max_rounds_to_sync,
			});
		}

		Ok(Some(RoundPlan {
			start: watermark + 1,
			end: tip,
			skipped: None,
		}))
	}

	fn name(&self) -> &'static str {
		"fail"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::subscriber::ErrorKind;

	fn plan(behaviour: SyncBehaviour, watermark: Round, tip: Round, max: u64) -> Option<RoundPlan> {
		behaviour.strategy().plan(watermark, tip, max).unwrap()
	}

	#[test]
	fn oldest_walks_backlog_in_batches() {
		let mut watermark = 100;
		let mut batches = Vec::new();
		while let Some(p) = plan(SyncBehaviour::SyncOldest, watermark, 105, 2) {
			batches.push(p.rounds().collect::<Vec<_>>());
			watermark = p.end;
		}
		assert_eq!(batches, vec![vec![101, 102], vec![103, 104], vec![105]]);
	}

	#[test]
	fn newest_skips_stale_backlog() {
		let p = plan(SyncBehaviour::SyncNewest, 100, 1000, 5).unwrap();
		assert_eq!(p.rounds(), 996..=1000);
		assert_eq!(p.skipped, Some((101, 995)));
		assert_eq!(p.round_count(), 5);
	}

	#[test]
	fn newest_with_small_backlog_behaves_like_oldest() {
		let p = plan(SyncBehaviour::SyncNewest, 100, 103, 5).unwrap();
		assert_eq!(p.rounds(), 101..=103);
		assert_eq!(p.skipped, None);
	}

	#[test]
	fn caught_up_has_no_plan() {
		for behaviour in [SyncBehaviour::SyncOldest, SyncBehaviour::SyncNewest, SyncBehaviour::Fail] {
			assert_eq!(plan(behaviour, 500, 500, 10), None);
		}
	}

	#[test]
	fn fail_rejects_large_backlog() {
		let err = SyncBehaviour::Fail
			.strategy()
			.plan(100, 1000, 5)
			.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Backlog);
		assert_eq!(plan(SyncBehaviour::Fail, 100, 104, 5).unwrap().rounds(), 101..=104);
	}

	#[test]
	fn zero_budget_is_a_configuration_error() {
		let err = SyncOldest.plan(1, 2, 0).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Configuration);
	}

	#[test]
	fn behaviour_names_match_configuration_values() {
		let parsed: SyncBehaviour = serde_json::from_str("\"sync-newest\"").unwrap();
		assert_eq!(parsed, SyncBehaviour::SyncNewest);
		assert_eq!(parsed.strategy().name(), "sync-newest");
	}
}
