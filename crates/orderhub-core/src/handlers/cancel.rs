//! Cancellation workflow.
//!
//! Direct cancellation is a plain transition guarded by the state machine.
//! Stores outside the self-service window escalate through a cancel request
//! that an administrator approves or rejects; at most one request per order
//! is pending at a time, enforced by a per-order index written with
//! insert-if-absent.

use crate::engine::event_bus::EventBus;
use crate::handlers::{ensure_readable, publish_outcome, require_admin, require_text};
use crate::state::{OrderStateMachine, RequestApproval, Transition};
use crate::EngineError;
use orderhub_storage::StorageService;
use orderhub_types::{
	Actor, AuditCancelRequest, AuditDecision, CancelRequestStatus, CancellationEvent, Clock,
	EngineEvent, Inconsistency, Order, OrderCancelRequest, OrderStatus, StorageKey,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

pub struct CancellationHandler {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
}

impl CancellationHandler {
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			storage,
			state_machine,
			event_bus,
			clock,
		}
	}

	/// Cancels an order directly.
	///
	/// Stores may only do this while the order awaits confirmation and within
	/// the self-service window; everything else goes through a request.
	#[instrument(skip_all, fields(order_id = order_id, actor = %actor))]
	pub async fn cancel(
		&self,
		order_id: u64,
		actor: &Actor,
		reason: &str,
	) -> Result<Order, EngineError> {
		require_text("reason", reason)?;
		let outcome = self
			.state_machine
			.transition(
				order_id,
				Transition::new(OrderStatus::Cancelled, *actor, reason),
			)
			.await?;
		publish_outcome(&self.event_bus, &outcome);
		Ok(outcome.order)
	}

	/// Files a cancel request for an order the store can no longer cancel itself.
	#[instrument(skip_all, fields(order_id = order_id))]
	pub async fn submit_request(
		&self,
		order_id: u64,
		actor: &Actor,
		reason: &str,
	) -> Result<OrderCancelRequest, EngineError> {
		let store_id = match actor {
			Actor::Store(id) => *id,
			Actor::Supplier(_) | Actor::Admin(_) | Actor::System => {
				return Err(EngineError::Unauthorized(
					"only stores can submit cancel requests".into(),
				))
			},
		};
		require_text("reason", reason)?;

		let _guard = self.state_machine.lock(order_id).await;
		let order = self.state_machine.load(order_id).await?;
		ensure_readable(&order, actor)?;
		if !matches!(
			order.status,
			OrderStatus::PendingConfirm | OrderStatus::Confirmed
		) {
			return Err(EngineError::InvalidState(format!(
				"cancel requests are accepted for pending_confirm or confirmed orders; order is {}",
				order.status
			)));
		}
		let self_service = Transition::new(OrderStatus::Cancelled, *actor, reason);
		if order.status == OrderStatus::PendingConfirm
			&& self
				.state_machine
				.check(&order, &self_service, self.clock.now())
				.is_ok()
		{
			return Err(EngineError::InvalidState(format!(
				"order can still be cancelled directly; use POST /api/orders/{}/cancel",
				order_id
			)));
		}

		let request_id = self
			.storage
			.next_sequence(StorageKey::CancelRequests.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		let index_key = order_id.to_string();
		let reserved = self
			.storage
			.insert_if_absent(
				StorageKey::PendingCancelRequests.as_str(),
				&index_key,
				&request_id,
			)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		if !reserved {
			return Err(EngineError::Conflict(format!(
				"order {} already has a pending cancel request",
				order_id
			)));
		}

		let request = OrderCancelRequest {
			id: request_id,
			order_id,
			store_id,
			reason: reason.to_string(),
			status: CancelRequestStatus::Pending,
			admin_id: None,
			admin_remark: None,
			created_at: self.clock.now(),
			processed_at: None,
		};
		if let Err(e) = self
			.storage
			.store(
				StorageKey::CancelRequests.as_str(),
				&request_id.to_string(),
				&request,
			)
			.await
		{
			if let Err(release) = self
				.storage
				.remove(StorageKey::PendingCancelRequests.as_str(), &index_key)
				.await
			{
				tracing::warn!(order_id, error = %release, "Failed to release cancel request index");
			}
			return Err(EngineError::Storage(e.to_string()));
		}

		tracing::info!(order_id, request_id, "Cancel request submitted");
		self.event_bus
			.publish(EngineEvent::Cancellation(CancellationEvent::RequestSubmitted {
				request_id,
				order_id,
			}));
		Ok(request)
	}

	/// Approves or rejects a pending request. Administrators only.
	///
	/// Approval cancels the order and resolves the request in the same unit;
	/// if the order can no longer be cancelled the request stays pending.
	#[instrument(skip_all, fields(request_id = request_id))]
	pub async fn audit(
		&self,
		request_id: u64,
		actor: &Actor,
		audit: AuditCancelRequest,
	) -> Result<OrderCancelRequest, EngineError> {
		let admin_id = require_admin(actor)?;
		let request = self.get_request(request_id).await?;
		if !request.is_pending() {
			return Err(EngineError::InvalidState(format!(
				"cancel request {} was already {}",
				request_id,
				status_name(request.status)
			)));
		}
		let remark = Some(audit.remark.trim().to_string()).filter(|r| !r.is_empty());

		match audit.decision {
			AuditDecision::Approve => {
				let log_remark = remark
					.clone()
					.unwrap_or_else(|| format!("cancel request {} approved", request_id));
				let transition = Transition::new(OrderStatus::Cancelled, *actor, log_remark)
					.with_reason(request.reason.clone())
					.approving(RequestApproval {
						request_id,
						admin_id,
						remark,
					});
				let outcome = self
					.state_machine
					.transition(request.order_id, transition)
					.await?;
				publish_outcome(&self.event_bus, &outcome);
				outcome.closed_request.ok_or_else(|| {
					EngineError::InvalidState(format!(
						"cancel request {} was not resolved",
						request_id
					))
				})
			},
			AuditDecision::Reject => self.reject(request, admin_id, remark).await,
		}
	}

	async fn reject(
		&self,
		request: OrderCancelRequest,
		admin_id: u64,
		remark: Option<String>,
	) -> Result<OrderCancelRequest, EngineError> {
		let order_id = request.order_id;
		let _guard = self.state_machine.lock(order_id).await;

		// Re-read under the lock; a concurrent terminal transition may have
		// closed it already.
		let mut request = self.get_request(request.id).await?;
		if !request.is_pending() {
			return Err(EngineError::InvalidState(format!(
				"cancel request {} was already {}",
				request.id,
				status_name(request.status)
			)));
		}
		request.status = CancelRequestStatus::Rejected;
		request.admin_id = Some(admin_id);
		request.admin_remark = remark;
		request.processed_at = Some(self.clock.now());

		self.storage
			.update(
				StorageKey::CancelRequests.as_str(),
				&request.id.to_string(),
				&request,
			)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		self.storage
			.remove(
				StorageKey::PendingCancelRequests.as_str(),
				&order_id.to_string(),
			)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;

		tracing::info!(order_id, request_id = request.id, "Cancel request rejected");
		self.event_bus
			.publish(EngineEvent::Cancellation(CancellationEvent::RequestResolved {
				request_id: request.id,
				order_id,
				status: request.status,
			}));
		Ok(request)
	}

	/// Moves a cancelled order back to `pending_payment`. Administrators only.
	pub async fn restore(
		&self,
		order_id: u64,
		actor: &Actor,
		remark: &str,
	) -> Result<Order, EngineError> {
		require_admin(actor)?;
		let remark = if remark.trim().is_empty() {
			"order restored"
		} else {
			remark
		};
		let outcome = self
			.state_machine
			.transition(
				order_id,
				Transition::new(OrderStatus::PendingPayment, *actor, remark),
			)
			.await?;
		publish_outcome(&self.event_bus, &outcome);
		Ok(outcome.order)
	}

	pub async fn get_request(&self, request_id: u64) -> Result<OrderCancelRequest, EngineError> {
		self.storage
			.find(StorageKey::CancelRequests.as_str(), &request_id.to_string())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.ok_or_else(|| EngineError::NotFound(format!("cancel request {}", request_id)))
	}

	/// Requests filed against an order, oldest first.
	pub async fn list_requests(
		&self,
		order_id: u64,
		actor: &Actor,
	) -> Result<Vec<OrderCancelRequest>, EngineError> {
		let order = self.state_machine.load(order_id).await?;
		ensure_readable(&order, actor)?;
		let mut requests: Vec<OrderCancelRequest> = self
			.all_requests()
			.await?
			.into_iter()
			.filter(|r| r.order_id == order_id)
			.collect();
		requests.sort_by_key(|r| r.id);
		Ok(requests)
	}

	/// Pending requests across all orders. Administrators only.
	pub async fn pending_requests(
		&self,
		actor: &Actor,
	) -> Result<Vec<OrderCancelRequest>, EngineError> {
		require_admin(actor)?;
		let mut requests: Vec<OrderCancelRequest> = self
			.all_requests()
			.await?
			.into_iter()
			.filter(|r| r.is_pending())
			.collect();
		requests.sort_by_key(|r| r.id);
		Ok(requests)
	}

	/// Scans for requests whose status disagrees with their order's status.
	pub async fn find_inconsistencies(
		&self,
		actor: &Actor,
	) -> Result<Vec<Inconsistency>, EngineError> {
		match actor {
			Actor::Admin(_) | Actor::System => {},
			Actor::Store(_) | Actor::Supplier(_) => {
				return Err(EngineError::Unauthorized(
					"this operation requires an administrator".into(),
				))
			},
		}
		let orders: HashMap<u64, OrderStatus> = self
			.storage
			.retrieve_all::<Order>(StorageKey::Orders.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, order)| (order.id, order.status))
			.collect();

		let mut found: Vec<Inconsistency> = self
			.all_requests()
			.await?
			.iter()
			.filter_map(|r| r.inconsistency_with(orders.get(&r.order_id).copied()))
			.collect();
		found.sort_by_key(|i| i.request_id);
		Ok(found)
	}

	async fn all_requests(&self) -> Result<Vec<OrderCancelRequest>, EngineError> {
		Ok(self
			.storage
			.retrieve_all::<OrderCancelRequest>(StorageKey::CancelRequests.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, request)| request)
			.collect())
	}
}

fn status_name(status: CancelRequestStatus) -> &'static str {
	match status {
		CancelRequestStatus::Pending => "pending",
		CancelRequestStatus::Approved => "approved",
		CancelRequestStatus::Rejected => "rejected",
	}
}
