//! Event delivery for matched transactions.
//!
//! This module defines [`MatchedEvent`], the handler traits consumers implement, and the
//! [`EventDispatcher`] that routes each event to the handlers registered under its filter name.
//! Handlers run one at a time on the ingestion task, in registration order, which is what keeps
//! delivery in round order and in transaction order within a round.
//!
//! A failing handler (an `Err` result or a panic) never interrupts the round being processed:
//! the failure is turned into a [`SubscriberError::HandlerError`], logged, and forwarded to the
//! error handlers.

use crate::subscriber::SubscriberError;
use crate::subscriber::sync::progress_tracker::PollSummary;
use crate::transaction::{Round, Transaction};

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

/// Boxed error returned by consumer handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a consumer handler.
pub type HandlerResult = Result<(), BoxError>;

/// A transaction that satisfied a named filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedEvent {
    pub filter_name: String,
    pub round: Round,
    pub transaction: Transaction,
}

/// Trait for consuming matched events.
///
/// Any `Fn(&MatchedEvent) -> HandlerResult` closure implements it.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one matched event.
    async fn handle(&self, event: &MatchedEvent) -> HandlerResult;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &str {
        "anonymous"
    }
}

#[async_trait::async_trait]
impl<F> EventHandler for F
where
    F: Fn(&MatchedEvent) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, event: &MatchedEvent) -> HandlerResult {
        self(event)
    }
}

/// Sink for errors reported by the subscriber.
pub type ErrorHandler = Box<dyn Fn(&SubscriberError) + Send + Sync>;

/// Sink for per-poll summaries.
pub type PollHandler = Box<dyn Fn(&PollSummary) + Send + Sync>;

/// Counts for one dispatched event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Routes matched events to the handlers registered per filter name.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Vec<Box<dyn EventHandler>>>,
    error_handlers: Vec<ErrorHandler>,
    poll_handlers: Vec<PollHandler>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `filter_name`.
    ///
    /// Handlers for the same name are called in the order they are registered.
    pub fn register_handler(&mut self, filter_name: impl Into<String>, handler: Box<dyn EventHandler>) {
        self.handlers
            .entry(filter_name.into())
            .or_default()
            .push(handler);
    }

    /// Register a sink for handler failures and collaborator errors.
    pub fn register_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handlers.push(handler);
    }

    /// Register a sink for poll summaries.
    pub fn register_poll_handler(&mut self, handler: PollHandler) {
        self.poll_handlers.push(handler);
    }

    pub fn has_handlers(&self, filter_name: &str) -> bool {
        self.handlers
            .get(filter_name)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    /// Deliver `event` to every handler registered for its filter name.
    ///
    /// Failures are reported and counted but never returned: the caller keeps processing the
    /// round regardless. Events for names without handlers are dropped.
    pub async fn dispatch(&self, event: &MatchedEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let Some(handlers) = self.handlers.get(&event.filter_name) else {
            debug!(
                "No handler registered for '{}', dropping transaction {}",
                event.filter_name, event.transaction.id
            );
            return outcome;
        };

        for handler in handlers {
            let result = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;

            let message = match result {
                Ok(Ok(())) => {
                    outcome.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };

            outcome.failed += 1;
            error!(
                "Handler {} for '{}' failed on transaction {} in round {}: {}",
                handler.name(),
                event.filter_name,
                event.transaction.id,
                event.round,
                message
            );
            self.report_error(&SubscriberError::HandlerError {
                filter_name: event.filter_name.clone(),
                transaction_id: event.transaction.id.clone(),
                round: event.round,
                message,
            });
        }

        outcome
    }

    /// Forward `error` to every registered error handler.
    pub fn report_error(&self, error: &SubscriberError) {
        for handler in &self.error_handlers {
            handler(error);
        }
    }

    /// Forward `summary` to every registered poll handler.
    pub fn report_poll(&self, summary: &PollSummary) {
        for handler in &self.poll_handlers {
            handler(summary);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
