//! Webhook endpoint registry and task administration.

use crate::engine::event_bus::EventBus;
use crate::handlers::require_admin;
use crate::webhook::outbox::sync_queue;
use crate::webhook::WebhookOutbox;
use crate::EngineError;
use orderhub_storage::{StorageError, StorageService, Versioned};
use orderhub_types::{
	Actor, Clock, EngineEvent, RegisterEndpointRequest, StorageKey, TargetKind, WebhookEndpoint,
	WebhookEvent, WebhookLog, WebhookStatus,
};
use std::sync::Arc;

pub struct WebhookHandler {
	storage: Arc<StorageService>,
	outbox: Arc<WebhookOutbox>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
}

impl WebhookHandler {
	pub fn new(
		storage: Arc<StorageService>,
		outbox: Arc<WebhookOutbox>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			storage,
			outbox,
			event_bus,
			clock,
		}
	}

	/// Registers or replaces the endpoint of a store or supplier.
	///
	/// An empty URL is accepted and simply disables deliveries.
	pub async fn register_endpoint(
		&self,
		actor: &Actor,
		target_kind: TargetKind,
		target_id: u64,
		request: RegisterEndpointRequest,
	) -> Result<WebhookEndpoint, EngineError> {
		ensure_may_manage(actor, target_kind, target_id)?;
		let url = request.url.trim().to_string();
		if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
			return Err(EngineError::Validation(format!(
				"webhook url must use http or https: {}",
				url
			)));
		}

		let endpoint = WebhookEndpoint {
			target_kind,
			target_id,
			url,
			enabled: request.enabled,
			updated_at: self.clock.now(),
		};
		self.outbox
			.save_endpoint(&endpoint)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		tracing::info!(
			target = %WebhookEndpoint::key_for(target_kind, target_id),
			enabled = endpoint.enabled,
			"Webhook endpoint registered"
		);
		Ok(endpoint)
	}

	pub async fn endpoint(
		&self,
		actor: &Actor,
		target_kind: TargetKind,
		target_id: u64,
	) -> Result<WebhookEndpoint, EngineError> {
		ensure_may_manage(actor, target_kind, target_id)?;
		self.outbox
			.endpoint(target_kind, target_id)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.ok_or_else(|| {
				EngineError::NotFound(format!(
					"webhook endpoint {}",
					WebhookEndpoint::key_for(target_kind, target_id)
				))
			})
	}

	/// Tasks ordered by id, optionally filtered by status. Administrators only.
	pub async fn list_tasks(
		&self,
		actor: &Actor,
		status: Option<WebhookStatus>,
	) -> Result<Vec<WebhookLog>, EngineError> {
		require_admin(actor)?;
		let mut tasks: Vec<WebhookLog> = self
			.all_tasks()
			.await?
			.into_iter()
			.filter(|task| status.is_none_or(|s| task.status == s))
			.collect();
		tasks.sort_by_key(|task| task.id);
		Ok(tasks)
	}

	/// Failed tasks with no retries left.
	pub async fn list_exhausted(&self, actor: &Actor) -> Result<Vec<WebhookLog>, EngineError> {
		require_admin(actor)?;
		let mut tasks: Vec<WebhookLog> = self
			.all_tasks()
			.await?
			.into_iter()
			.filter(WebhookLog::is_exhausted)
			.collect();
		tasks.sort_by_key(|task| task.id);
		Ok(tasks)
	}

	/// Puts an exhausted task back in the queue with a fresh retry budget.
	pub async fn requeue(&self, task_id: u64, actor: &Actor) -> Result<WebhookLog, EngineError> {
		require_admin(actor)?;
		let key = task_id.to_string();
		let current: Versioned<WebhookLog> = self
			.storage
			.retrieve_versioned(StorageKey::WebhookLogs.as_str(), &key)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => EngineError::NotFound(format!("webhook task {}", task_id)),
				other => EngineError::Storage(other.to_string()),
			})?;
		if !current.value.is_exhausted() {
			return Err(EngineError::InvalidState(format!(
				"webhook task {} is not exhausted",
				task_id
			)));
		}

		let mut task = current.value.clone();
		task.requeue(self.clock.now());
		let swapped = self
			.storage
			.swap_versioned(StorageKey::WebhookLogs.as_str(), &key, &current, &task)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		if !swapped {
			return Err(EngineError::Conflict(format!(
				"webhook task {} was modified concurrently",
				task_id
			)));
		}
		sync_queue(&self.storage, &task)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;

		tracing::info!(task_id, order_id = task.order_id, "Webhook task requeued");
		self.event_bus
			.publish(EngineEvent::Webhook(WebhookEvent::TasksEnqueued {
				order_id: task.order_id,
				count: 1,
			}));
		Ok(task)
	}

	async fn all_tasks(&self) -> Result<Vec<WebhookLog>, EngineError> {
		Ok(self
			.storage
			.retrieve_all::<WebhookLog>(StorageKey::WebhookLogs.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, task)| task)
			.collect())
	}
}

fn ensure_may_manage(
	actor: &Actor,
	target_kind: TargetKind,
	target_id: u64,
) -> Result<(), EngineError> {
	let allowed = match (actor, target_kind) {
		(Actor::Admin(_), _) => true,
		(Actor::Store(id), TargetKind::Store) | (Actor::Supplier(id), TargetKind::Supplier) => {
			*id == target_id
		},
		(Actor::Store(_), TargetKind::Supplier)
		| (Actor::Supplier(_), TargetKind::Store)
		| (Actor::System, _) => false,
	};
	if allowed {
		Ok(())
	} else {
		Err(EngineError::Unauthorized(format!(
			"{} cannot manage the endpoint of {} {}",
			actor,
			target_kind.as_str(),
			target_id
		)))
	}
}
