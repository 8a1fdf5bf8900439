//! Durable outbox of webhook tasks.
//!
//! Tasks are staged inside the same unit of work as the order transition that
//! produced them, so a rolled-back transition leaves none behind. Staged
//! tasks carry a hold lease that keeps the dispatcher away until the order
//! write has committed and [`WebhookOutbox::release`] lifts it.
//!
//! Every task that may still be delivered also has an entry in the
//! `webhook_queue` namespace holding its due time, which is all the
//! dispatcher scans.

use crate::state::UnitOfWork;
use chrono::{DateTime, Duration, Utc};
use orderhub_storage::{StorageError, StorageService};
use orderhub_types::{
	truncate_id, EventType, Order, StorageKey, TargetKind, WebhookEndpoint, WebhookLog,
	WebhookPayload, WebhookStatus,
};
use std::sync::Arc;
use uuid::Uuid;

/// Brings the queue entry of `task` in line with its state.
pub(crate) async fn sync_queue(
	storage: &StorageService,
	task: &WebhookLog,
) -> Result<(), StorageError> {
	let key = task.id.to_string();
	match task.due_at() {
		Some(due) => {
			storage
				.store(StorageKey::WebhookQueue.as_str(), &key, &due)
				.await
		},
		None => storage.remove(StorageKey::WebhookQueue.as_str(), &key).await,
	}
}

pub struct WebhookOutbox {
	storage: Arc<StorageService>,
	max_retry_count: u32,
	/// How long a staged task stays unclaimable if it is never released.
	hold: Duration,
}

impl WebhookOutbox {
	pub fn new(storage: Arc<StorageService>, max_retry_count: u32, hold: Duration) -> Self {
		Self {
			storage,
			max_retry_count,
			hold,
		}
	}

	pub async fn endpoint(
		&self,
		kind: TargetKind,
		target_id: u64,
	) -> Result<Option<WebhookEndpoint>, StorageError> {
		self.storage
			.find(
				StorageKey::WebhookEndpoints.as_str(),
				&WebhookEndpoint::key_for(kind, target_id),
			)
			.await
	}

	pub async fn save_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), StorageError> {
		self.storage
			.store(
				StorageKey::WebhookEndpoints.as_str(),
				&WebhookEndpoint::key_for(endpoint.target_kind, endpoint.target_id),
				endpoint,
			)
			.await
	}

	/// Stages one task per party of `order` with a deliverable endpoint.
	///
	/// A party without an endpoint, or with a disabled or empty one, simply
	/// gets nothing. The returned tasks are held until released.
	pub(crate) async fn stage(
		&self,
		unit: &mut UnitOfWork<'_>,
		order: &Order,
		event_type: EventType,
		now: DateTime<Utc>,
	) -> Result<Vec<WebhookLog>, StorageError> {
		let held_until = now.checked_add_signed(self.hold).ok_or_else(|| {
			StorageError::Configuration("webhook hold period out of range".into())
		})?;
		let mut tasks = Vec::new();
		for (kind, target_id) in [
			(TargetKind::Store, order.store_id),
			(TargetKind::Supplier, order.supplier_id),
		] {
			let Some(endpoint) = self.endpoint(kind, target_id).await? else {
				continue;
			};
			if !endpoint.accepts_deliveries() {
				continue;
			}

			let id = self
				.storage
				.next_sequence(StorageKey::WebhookLogs.as_str())
				.await?;
			let task_id = Uuid::new_v4();
			let task = WebhookLog {
				id,
				task_id,
				target_kind: kind,
				target_id,
				event_type,
				order_id: order.id,
				order_no: order.order_no.clone(),
				url: endpoint.url.clone(),
				request_body: WebhookPayload {
					task_id,
					event_type,
					order_id: order.id,
					order_no: order.order_no.clone(),
					timestamp: now.timestamp(),
					payload: order_payload(order),
				},
				status: WebhookStatus::Pending,
				retry_count: 0,
				max_retry_count: self.max_retry_count,
				next_retry_at: None,
				lease_expires_at: Some(held_until),
				response_code: None,
				response_body: None,
				duration_ms: None,
				error_message: None,
				created_at: now,
				updated_at: now,
			};
			unit.insert(StorageKey::WebhookLogs, &id.to_string(), &task)
				.await?;
			unit.insert(StorageKey::WebhookQueue, &id.to_string(), &now)
				.await?;
			tasks.push(task);
		}
		Ok(tasks)
	}

	/// Lifts the hold lease from committed tasks.
	///
	/// A task the dispatcher already claimed after its hold ran out is left
	/// alone, and one that cannot be released here becomes deliverable once
	/// the hold expires.
	pub(crate) async fn release(&self, tasks: &mut [WebhookLog]) {
		for task in tasks.iter_mut() {
			let mut released = task.clone();
			released.lease_expires_at = None;
			let task_ref = task.task_id.to_string();
			match self
				.storage
				.compare_and_swap(
					StorageKey::WebhookLogs.as_str(),
					&task.id.to_string(),
					Some(&*task),
					&released,
				)
				.await
			{
				Ok(true) => *task = released,
				Ok(false) => {
					tracing::debug!(
						task_id = %truncate_id(&task_ref),
						"Webhook task changed before release"
					);
				},
				Err(e) => {
					tracing::warn!(
						task_id = %truncate_id(&task_ref),
						error = %e,
						"Failed to release webhook task; it waits for its hold to expire"
					);
				},
			}
		}
	}
}

/// Order summary carried in the `payload` field.
fn order_payload(order: &Order) -> serde_json::Value {
	serde_json::json!({
		"status": order.status,
		"paymentStatus": order.payment_status,
		"storeId": order.store_id,
		"supplierId": order.supplier_id,
		"goodsAmount": order.goods_amount,
		"serviceFee": order.service_fee,
		"totalAmount": order.total_amount,
		"itemCount": order.item_count,
		"cancellation": order.cancellation,
		"updatedAt": order.updated_at,
	})
}
