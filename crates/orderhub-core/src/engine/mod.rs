//! Order engine that owns the handlers and the background loop.
//!
//! Request-driven work (creating orders, transitions, cancel requests, rule
//! administration) goes through the handlers directly. [`OrderEngine::run`]
//! drives everything else: draining the webhook outbox, the auto-complete
//! sweep and storage cleanup, until Ctrl-C.

pub mod event_bus;
pub mod lifecycle;

use crate::catalog::CatalogService;
use crate::handlers::{CancellationHandler, MarkupHandler, OrderHandler, WebhookHandler};
use crate::monitoring::AutoCompleteMonitor;
use crate::numbering::OrderNumberGenerator;
use crate::state::{OrderStateError, OrderStateMachine};
use crate::webhook::{DispatchSettings, WebhookDispatcher, WebhookOutbox};
use orderhub_config::Config;
use orderhub_delivery::DeliveryService;
use orderhub_markup::MarkupService;
use orderhub_storage::StorageService;
use orderhub_types::{Clock, EngineEvent, WebhookEvent};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors surfaced by engine operations.
///
/// Each variant corresponds to one failure kind callers can act on; the HTTP
/// layer maps them one-to-one onto status codes.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Validation error: {0}")]
	Validation(String),
	#[error("Not found: {0}")]
	NotFound(String),
	/// The operation is not legal from the current state.
	#[error("Invalid state: {0}")]
	InvalidState(String),
	#[error("Conflict: {0}")]
	Conflict(String),
	#[error("Unauthorized: {0}")]
	Unauthorized(String),
	/// A collaborator is temporarily unavailable; the caller may retry.
	#[error("Dependency unavailable: {0}")]
	TransientDependency(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<OrderStateError> for EngineError {
	fn from(e: OrderStateError) -> Self {
		match e {
			OrderStateError::InvalidTransition { .. } | OrderStateError::GuardRejected(_) => {
				EngineError::InvalidState(e.to_string())
			},
			OrderStateError::Unauthorized(message) => EngineError::Unauthorized(message),
			OrderStateError::OrderNotFound(id) => EngineError::NotFound(format!("order {}", id)),
			OrderStateError::Contention(_) => EngineError::Conflict(e.to_string()),
			OrderStateError::Storage(message) => EngineError::Storage(message),
		}
	}
}

/// The assembled order hub.
#[derive(Clone)]
pub struct OrderEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) state_machine: Arc<OrderStateMachine>,
	pub(crate) catalog: Arc<CatalogService>,
	pub(crate) order_handler: Arc<OrderHandler>,
	pub(crate) cancellation_handler: Arc<CancellationHandler>,
	pub(crate) markup_handler: Arc<MarkupHandler>,
	pub(crate) webhook_handler: Arc<WebhookHandler>,
	pub(crate) dispatcher: Arc<WebhookDispatcher>,
	pub(crate) auto_complete: Arc<AutoCompleteMonitor>,
}

impl OrderEngine {
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		delivery: Arc<DeliveryService>,
		clock: Arc<dyn Clock>,
		numbers: Arc<dyn OrderNumberGenerator>,
		event_bus: event_bus::EventBus,
	) -> Self {
		let lease = span(config.webhook.lease_seconds, chrono::Duration::try_seconds);
		let outbox = Arc::new(WebhookOutbox::new(
			storage.clone(),
			config.webhook.retry_times,
			lease,
		));
		let state_machine = Arc::new(OrderStateMachine::new(
			storage.clone(),
			outbox.clone(),
			clock.clone(),
			span(config.order.cancel_threshold_minutes, chrono::Duration::try_minutes),
		));
		let markup = Arc::new(MarkupService::default());
		let catalog = Arc::new(CatalogService::new(storage.clone()));

		let order_handler = Arc::new(OrderHandler::new(
			storage.clone(),
			state_machine.clone(),
			catalog.clone(),
			markup.clone(),
			numbers,
			event_bus.clone(),
			clock.clone(),
			config.order.service_fee_rate,
		));
		let cancellation_handler = Arc::new(CancellationHandler::new(
			storage.clone(),
			state_machine.clone(),
			event_bus.clone(),
			clock.clone(),
		));
		let markup_handler = Arc::new(MarkupHandler::new(
			storage.clone(),
			markup,
			event_bus.clone(),
			clock.clone(),
		));
		let webhook_handler = Arc::new(WebhookHandler::new(
			storage.clone(),
			outbox,
			event_bus.clone(),
			clock.clone(),
		));
		let dispatcher = Arc::new(WebhookDispatcher::new(
			storage.clone(),
			delivery,
			event_bus.clone(),
			clock.clone(),
			DispatchSettings {
				retry_interval: span(
					config.webhook.retry_interval_minutes,
					chrono::Duration::try_minutes,
				),
				lease,
				max_concurrent: config.webhook.max_concurrent_deliveries,
			},
		));
		let auto_complete = Arc::new(AutoCompleteMonitor::new(
			order_handler.clone(),
			span(config.order.auto_complete_days, chrono::Duration::try_days),
		));

		Self {
			config,
			storage,
			clock,
			event_bus,
			state_machine,
			catalog,
			order_handler,
			cancellation_handler,
			markup_handler,
			webhook_handler,
			dispatcher,
			auto_complete,
		}
	}

	/// Main loop: drains the outbox on every poll tick and whenever tasks are
	/// enqueued, sweeps overdue deliveries, and cleans up storage.
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut events = self.event_bus.subscribe();

		let storage = self.storage.clone();
		let cleanup_interval = tokio::time::interval(Duration::from_secs(
			self.config.storage.cleanup_interval_seconds.max(1),
		));
		let cleanup_handle = tokio::spawn(async move {
			let mut interval = cleanup_interval;
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					},
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					},
					_ => {},
				}
			}
		});

		let mut poll = tokio::time::interval(Duration::from_secs(
			self.config.webhook.poll_interval_seconds.max(1),
		));
		let mut sweep = tokio::time::interval(Duration::from_secs(
			self.config.order.auto_complete_interval_seconds.max(1),
		));
		// One drain pass in flight at a time; a skipped wake-up is picked up
		// by the next tick.
		let drain_slot = Arc::new(Semaphore::new(1));

		loop {
			tokio::select! {
				_ = poll.tick() => {
					self.spawn_drain(&drain_slot);
				}

				Ok(event) = events.recv() => {
					if let EngineEvent::Webhook(WebhookEvent::TasksEnqueued { .. }) = event {
						self.spawn_drain(&drain_slot);
					}
				}

				_ = sweep.tick() => {
					let monitor = self.auto_complete.clone();
					tokio::spawn(async move {
						if let Err(e) = monitor.sweep_once().await {
							tracing::warn!(error = %e, "Auto-complete sweep failed");
						}
					});
				}

				_ = tokio::signal::ctrl_c() => {
					break;
				}
			}
		}

		cleanup_handle.abort();
		Ok(())
	}

	fn spawn_drain(&self, slot: &Arc<Semaphore>) {
		let Ok(permit) = slot.clone().try_acquire_owned() else {
			return;
		};
		let dispatcher = self.dispatcher.clone();
		tokio::spawn(async move {
			let _permit = permit;
			if let Err(e) = dispatcher.drain_once().await {
				tracing::warn!(error = %e, "Webhook drain failed");
			}
		});
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	pub fn state_machine(&self) -> &Arc<OrderStateMachine> {
		&self.state_machine
	}

	pub fn catalog(&self) -> &Arc<CatalogService> {
		&self.catalog
	}

	pub fn orders(&self) -> &Arc<OrderHandler> {
		&self.order_handler
	}

	pub fn cancellations(&self) -> &Arc<CancellationHandler> {
		&self.cancellation_handler
	}

	pub fn markups(&self) -> &Arc<MarkupHandler> {
		&self.markup_handler
	}

	pub fn webhooks(&self) -> &Arc<WebhookHandler> {
		&self.webhook_handler
	}

	pub fn dispatcher(&self) -> &Arc<WebhookDispatcher> {
		&self.dispatcher
	}

	pub fn auto_complete(&self) -> &Arc<AutoCompleteMonitor> {
		&self.auto_complete
	}
}

/// Converts a configured amount of some unit, saturating on overflow.
fn span(amount: u64, unit: fn(i64) -> Option<chrono::Duration>) -> chrono::Duration {
	i64::try_from(amount)
		.ok()
		.and_then(unit)
		.unwrap_or(chrono::Duration::MAX)
}
