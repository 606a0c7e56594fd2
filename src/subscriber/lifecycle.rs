//! Subscriber lifecycle.
//!
//! [`AlgorandSubscriber`] is the consumer-facing surface: handlers are registered with `on`,
//! `on_error` and `on_poll` before `start`, which moves the sync controller onto its own tokio
//! task. `stop` is idempotent and returns once the run loop has finished the round it was
//! working on and reached `Stopped`.

use crate::config::SubscriberConfig;
use crate::indexer::LedgerClient;
use crate::subscriber::sync::{
	EventHandler, PollSummary, StopRequest, SyncController, WatermarkStore,
};
use crate::subscriber::{StopReason, SubscriberError, SyncStatus};

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Filter-driven transaction subscriber
pub struct AlgorandSubscriber {
	/// Present until `start` moves it onto the run loop task.
	controller: Option<SyncController>,
	stop_request: StopRequest,
	status: Arc<watch::Sender<SyncStatus>>,
	task: Mutex<Option<JoinHandle<StopReason>>>,
}

impl AlgorandSubscriber {
	/// Create a subscriber from a validated configuration.
	///
	/// Fails with a configuration error when the filters or options are invalid.
	pub fn new(
		config: SubscriberConfig,
		ledger: Arc<dyn LedgerClient>,
		watermark: Arc<dyn WatermarkStore>,
	) -> Result<Self, SubscriberError> {
		let filters = config.validate()?;
		let controller = SyncController::new(
			ledger,
			watermark,
			filters,
			config.sync_behaviour.strategy(),
			config.controller_settings()?,
		);
		if controller.filters().is_empty() {
			warn!("No filters configured; no events will be delivered");
		}
		debug!(
			"Created subscriber with {} filters, {:?}, maxRoundsToSync {}",
			controller.filters().len(),
			config.sync_behaviour,
			config.max_rounds_to_sync
		);

		Ok(Self {
			status: controller.status_handle(),
			controller: Some(controller),
			stop_request: StopRequest::new(),
			task: Mutex::new(None),
		})
	}

	fn controller_mut(&mut self) -> Result<&mut SyncController, SubscriberError> {
		self.controller
			.as_mut()
			.ok_or(SubscriberError::AlreadyStartedError)
	}

	/// Register `handler` for events of the filter named `filter_name`.
	///
	/// The name must be declared in the configuration.
	pub fn on<H>(&mut self, filter_name: &str, handler: H) -> Result<&mut Self, SubscriberError>
	where
		H: EventHandler + 'static,
	{
		let controller = self.controller_mut()?;
		if !controller.filters().contains(filter_name) {
			return Err(SubscriberError::ConfigurationError(format!(
				"no filter named '{}' is configured",
				filter_name
			)));
		}
		controller
			.dispatcher_mut()
			.register_handler(filter_name, Box::new(handler));
		Ok(self)
	}

	/// Register a sink for handler failures and ledger or persistence errors.
	pub fn on_error<F>(&mut self, handler: F) -> Result<&mut Self, SubscriberError>
	where
		F: Fn(&SubscriberError) + Send + Sync + 'static,
	{
		self.controller_mut()?
			.dispatcher_mut()
			.register_error_handler(Box::new(handler));
		Ok(self)
	}

	/// Register a sink that receives a summary after every poll.
	pub fn on_poll<F>(&mut self, handler: F) -> Result<&mut Self, SubscriberError>
	where
		F: Fn(&PollSummary) + Send + Sync + 'static,
	{
		self.controller_mut()?
			.dispatcher_mut()
			.register_poll_handler(Box::new(handler));
		Ok(self)
	}

	/// Names of configured filters that have no handler yet. Empty once started.
	pub fn unhandled_filters(&self) -> Vec<String> {
		self.controller
			.as_ref()
			.map(|c| c.unhandled_filters().into_iter().map(String::from).collect())
			.unwrap_or_default()
	}

	/// Run one iteration on the caller's task. Only available before `start`.
	pub async fn poll_once(&mut self) -> Result<PollSummary, SubscriberError> {
		self.controller_mut()?.poll_once().await
	}

	/// Spawn the run loop and return immediately.
	pub fn start(&mut self) -> Result<(), SubscriberError> {
		let controller = self
			.controller
			.take()
			.ok_or(SubscriberError::AlreadyStartedError)?;

		for name in controller.unhandled_filters() {
			warn!("Filter '{}' has no handler; its matches will be dropped", name);
		}
		info!("Starting subscriber");
		let handle = tokio::spawn(controller.run(self.stop_request.clone()));
		*self.task.get_mut() = Some(handle);
		Ok(())
	}

	/// Ask the run loop to stop and wait until it has.
	///
	/// Calling it again, or after the loop stopped on its own, has no further effect.
	pub async fn stop(&self, reason: impl Into<String>) {
		let reason = reason.into();
		if self.stop_request.request(reason.clone()) {
			info!("Stopping subscriber: {}", reason);
		} else {
			debug!("Stop already requested, ignoring '{}'", reason);
		}

		let mut task = self.task.lock().await;
		if let Some(handle) = task.take() {
			if let Err(e) = handle.await {
				error!("Subscriber task failed: {}", e);
				self.status.send_replace(SyncStatus::Stopped(StopReason::Fatal(format!(
					"run loop task failed: {}",
					e
				))));
			}
			return;
		}

		// Never started.
		if !self.status.borrow().is_stopped() {
			self.status
				.send_replace(SyncStatus::Stopped(StopReason::Requested(
					self.stop_request.reason(),
				)));
		}
	}

	pub fn status(&self) -> SyncStatus {
		self.status.borrow().clone()
	}

	/// Resolve with the stop reason once the subscriber reaches `Stopped`.
	pub async fn wait_until_stopped(&self) -> StopReason {
		let mut receiver = self.status.subscribe();
		match receiver.wait_for(SyncStatus::is_stopped).await {
			Ok(status) => match &*status {
				SyncStatus::Stopped(reason) => reason.clone(),
				other => StopReason::Fatal(format!("unexpected status {:?}", other)),
			},
			Err(_) => StopReason::Fatal("status channel closed".to_string()),
		}
	}
}

impl Drop for AlgorandSubscriber {
	fn drop(&mut self) {
		self.stop_request.request("subscriber dropped");
	}
}
