//!
//! REST client for the Algorand indexer.
//!
//! This module defines the [`LedgerClient`] contract the sync engine consumes and an
//! implementation backed by the indexer's HTTP API. Every request is retried with exponential
//! backoff for a bounded amount of time before the error is handed back to the caller.

use super::types::*;
use crate::transaction::{Block, Round};

use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, future::retry};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying the indexer API token.
const API_TOKEN_HEADER: &str = "X-Indexer-API-Token";

/// Upper bound on the time spent retrying one request.
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(10);

/// Source of rounds for the sync engine.
///
/// Both calls may fail transiently; the engine retries them and never advances the watermark
/// past a round it could not fetch.
#[async_trait]
pub trait LedgerClient: Send + Sync {
	/// The highest round currently known to the ledger.
	async fn current_round(&self) -> Result<Round, LedgerError>;

	/// The ordered transactions of `round`.
	async fn block(&self, round: Round) -> Result<Block, LedgerError>;
}

/// Algorand indexer client
#[derive(Clone)]
pub struct AlgorandIndexerClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the indexer, without a trailing slash.
	base_url: String,
	/// Optional API token sent with every request.
	api_token: Option<String>,
}

impl AlgorandIndexerClient {
	/// Create a new indexer client.
	///
	/// # Arguments
	/// * `base_url` - The indexer endpoint, e.g. `https://mainnet-idx.algonode.cloud`.
	/// * `api_token` - Token for indexers that require one.
	pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			api_token: api_token.filter(|t| !t.is_empty()),
		})
	}

	fn retry_policy(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(Duration::from_millis(200))
			.with_max_elapsed_time(Some(MAX_RETRY_ELAPSED))
			.build()
	}

	fn request(&self, url: &str) -> RequestBuilder {
		let request = self.http_client.get(url);
		match &self.api_token {
			Some(token) => request.header(API_TOKEN_HEADER, token),
			None => request,
		}
	}

	/// GET `path` and decode the JSON body.
	///
	/// Connection failures, 429 and 5xx responses are retried. A 404 while asking for a round
	/// is reported as [`LedgerError::RoundNotAvailable`] without retrying.
	async fn get_json<T: DeserializeOwned>(
		&self,
		path: &str,
		round: Option<Round>,
	) -> Result<T, LedgerError> {
		let url = format!("{}{}", self.base_url, path);
		debug!("GET {}", url);

		retry(self.retry_policy(), || {
			let request = self.request(&url);
			let url = url.clone();
			async move {
				let response = request.send().await.map_err(|e| {
					warn!("Request to {} failed: {}", url, e);
					backoff::Error::transient(LedgerError::HttpError(e))
				})?;

				let status = response.status();
				if status == StatusCode::NOT_FOUND {
					if let Some(round) = round {
						return Err(backoff::Error::permanent(LedgerError::RoundNotAvailable(
							round,
						)));
					}
				}

				if !status.is_success() {
					let body = response.text().await.unwrap_or_default();
					let error = LedgerError::StatusError {
						status: status.as_u16(),
						body,
					};
					if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
						warn!("Indexer returned {} for {}, retrying", status, url);
						return Err(backoff::Error::transient(error));
					}
					return Err(backoff::Error::permanent(error));
				}

				let bytes = response
					.bytes()
					.await
					.map_err(|e| backoff::Error::transient(LedgerError::HttpError(e)))?;
				serde_json::from_slice::<T>(&bytes)
					.map_err(|e| backoff::Error::permanent(LedgerError::JsonError(e)))
			}
		})
		.await
	}
}

#[async_trait]
impl LedgerClient for AlgorandIndexerClient {
	async fn current_round(&self) -> Result<Round, LedgerError> {
		let health: HealthResponse = self.get_json("/health", None).await?;
		Ok(health.round)
	}

	async fn block(&self, round: Round) -> Result<Block, LedgerError> {
		let response: BlockResponse = self
			.get_json(&format!("/v2/blocks/{}", round), Some(round))
			.await?;

		if response.round != round {
			return Err(LedgerError::UnexpectedPayload(format!(
				"asked for round {} but the indexer returned round {}",
				round, response.round
			)));
		}

		let block = response.into_block()?;
		debug!(
			"Fetched round {} with {} transactions",
			round,
			block.transactions.len()
		);
		Ok(block)
	}
}
