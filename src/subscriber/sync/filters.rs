//! Named transaction filters.
//!
//! A [`FilterSet`] is compiled once from the configured [`NamedFilter`]s and is immutable
//! afterwards. Constraints inside one filter are ANDed; filters are evaluated independently, so a
//! transaction may match several of them. Combinations that no transaction could ever satisfy are
//! rejected at compile time instead of silently never matching.

use crate::subscriber::SubscriberError;
use crate::transaction::{Transaction, TransactionType};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const ALL_TYPES: [TransactionType; 8] = [
	TransactionType::Payment,
	TransactionType::KeyRegistration,
	TransactionType::AssetConfig,
	TransactionType::AssetTransfer,
	TransactionType::AssetFreeze,
	TransactionType::ApplicationCall,
	TransactionType::StateProof,
	TransactionType::Heartbeat,
];

/// Optional attribute constraints of one filter. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionFilter {
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub tx_type: Option<TransactionType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub asset_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sender: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub receiver: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_amount: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_amount: Option<u64>,
}

impl TransactionFilter {
	pub fn with_type(mut self, tx_type: TransactionType) -> Self {
		self.tx_type = Some(tx_type);
		self
	}

	pub fn with_app_id(mut self, app_id: u64) -> Self {
		self.app_id = Some(app_id);
		self
	}

	pub fn with_asset_id(mut self, asset_id: u64) -> Self {
		self.asset_id = Some(asset_id);
		self
	}

	pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
		self.sender = Some(sender.into());
		self
	}

	pub fn with_receiver(mut self, receiver: impl Into<String>) -> Self {
		self.receiver = Some(receiver.into());
		self
	}

	pub fn with_min_amount(mut self, min_amount: u64) -> Self {
		self.min_amount = Some(min_amount);
		self
	}

	pub fn with_max_amount(mut self, max_amount: u64) -> Self {
		self.max_amount = Some(max_amount);
		self
	}

	/// Types that can carry every payload field this filter constrains.
	fn satisfiable_types(&self) -> Vec<TransactionType> {
		let candidates: Vec<TransactionType> = match self.tx_type {
			Some(tx_type) => vec![tx_type],
			None => ALL_TYPES.to_vec(),
		};

		candidates
			.into_iter()
			.filter(|t| self.app_id.is_none() || t.carries_app_id())
			.filter(|t| self.asset_id.is_none() || t.carries_asset_id())
			.filter(|t| self.receiver.is_none() || t.carries_receiver())
			.filter(|t| {
				(self.min_amount.is_none() && self.max_amount.is_none()) || t.carries_amount()
			})
			.collect()
	}

	fn validate(&self, name: &str) -> Result<(), SubscriberError> {
		if let (Some(min), Some(max)) = (self.min_amount, self.max_amount) {
			if min > max {
				return Err(SubscriberError::ConfigurationError(format!(
					"filter '{}' has minAmount {} greater than maxAmount {}",
					name, min, max
				)));
			}
		}

		if self.satisfiable_types().is_empty() {
			let declared = self
				.tx_type
				.map(|t| format!("type '{}'", t))
				.unwrap_or_else(|| "any transaction type".to_string());
			return Err(SubscriberError::ConfigurationError(format!(
				"filter '{}' constrains fields that {} cannot carry",
				name, declared
			)));
		}

		Ok(())
	}

	/// Whether `transaction` satisfies every declared constraint.
	pub fn matches(&self, transaction: &Transaction) -> bool {
		if let Some(tx_type) = self.tx_type {
			if transaction.tx_type != tx_type {
				return false;
			}
		}
		if let Some(sender) = &self.sender {
			if &transaction.sender != sender {
				return false;
			}
		}
		if let Some(receiver) = &self.receiver {
			if transaction.receiver() != Some(receiver.as_str()) {
				return false;
			}
		}
		if let Some(app_id) = self.app_id {
			if transaction.app_id() != Some(app_id) {
				return false;
			}
		}
		if let Some(asset_id) = self.asset_id {
			if transaction.asset_id() != Some(asset_id) {
				return false;
			}
		}
		if self.min_amount.is_some() || self.max_amount.is_some() {
			let Some(amount) = transaction.amount() else {
				return false;
			};
			if self.min_amount.is_some_and(|min| amount < min) {
				return false;
			}
			if self.max_amount.is_some_and(|max| amount > max) {
				return false;
			}
		}
		true
	}
}

/// A filter as declared in configuration: `{name, filter: {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedFilter {
	pub name: String,
	pub filter: TransactionFilter,
}

impl NamedFilter {
	pub fn new(name: impl Into<String>, filter: TransactionFilter) -> Self {
		Self {
			name: name.into(),
			filter,
		}
	}
}

/// Immutable, validated collection of named filters.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
	filters: Vec<NamedFilter>,
}

impl FilterSet {
	/// Validate and freeze `declared`.
	///
	/// Fails on empty or duplicate names and on filters no transaction could satisfy.
	pub fn compile(declared: Vec<NamedFilter>) -> Result<Self, SubscriberError> {
		let mut seen = HashSet::new();
		for named in &declared {
			if named.name.trim().is_empty() {
				return Err(SubscriberError::ConfigurationError(
					"filter names must not be empty".to_string(),
				));
			}
			if !seen.insert(named.name.as_str()) {
				return Err(SubscriberError::ConfigurationError(format!(
					"duplicate filter name '{}'",
					named.name
				)));
			}
			named.filter.validate(&named.name)?;
		}

		Ok(Self { filters: declared })
	}

	/// Names of the filters `transaction` satisfies, in declaration order.
	pub fn matches(&self, transaction: &Transaction) -> Vec<&str> {
		self.filters
			.iter()
			.filter(|f| f.filter.matches(transaction))
			.map(|f| f.name.as_str())
			.collect()
	}

	pub fn contains(&self, name: &str) -> bool {
		self.filters.iter().any(|f| f.name == name)
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.filters.iter().map(|f| f.name.as_str())
	}

	pub fn len(&self) -> usize {
		self.filters.len()
	}

	pub fn is_empty(&self) -> bool {
		self.filters.is_empty()
	}
}
