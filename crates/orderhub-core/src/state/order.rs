//! Order state machine implementation.
//!
//! Orders move `pending_payment -> pending_confirm -> confirmed -> delivering
//! -> completed`, may be cancelled from any non-terminal status, and a
//! cancelled order can be restored to `pending_payment`. Which actor may take
//! which edge is decided here by exhaustive matching on [`Actor`].
//!
//! A transition is committed as one unit: the order record, the status log
//! entry, the webhook tasks and, when the order turns terminal, the closing of
//! a pending cancel request. Units for the same order are serialized by a
//! per-order lock; the order record itself is written last with a
//! compare-and-swap, and any failure rolls the earlier writes back. Webhook
//! tasks stay held until that write has succeeded.

use crate::state::UnitOfWork;
use crate::webhook::WebhookOutbox;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use orderhub_storage::{StorageError, StorageService, Versioned};
use orderhub_types::{
	Actor, CancelRequestStatus, Cancellation, Clock, EventType, Order, OrderCancelRequest,
	OrderStatus, OrderStatusLog, PaymentInfo, PaymentStatus, StorageKey, WebhookLog,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	/// The edge exists but a guard on it rejected this attempt.
	#[error("{0}")]
	GuardRejected(String),
	#[error("{0}")]
	Unauthorized(String),
	#[error("Order not found: {0}")]
	OrderNotFound(u64),
	/// The order record changed underneath a committed unit.
	#[error("Order {0} was modified concurrently")]
	Contention(u64),
}

impl From<StorageError> for OrderStateError {
	fn from(e: StorageError) -> Self {
		OrderStateError::Storage(e.to_string())
	}
}

static TRANSITIONS: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;
	let mut m = HashMap::new();
	m.insert(PendingPayment, HashSet::from([PendingConfirm, Cancelled]));
	m.insert(PendingConfirm, HashSet::from([Confirmed, Cancelled]));
	m.insert(Confirmed, HashSet::from([Delivering, Cancelled]));
	m.insert(Delivering, HashSet::from([Completed, Cancelled]));
	m.insert(Completed, HashSet::new());
	m.insert(Cancelled, HashSet::from([PendingPayment]));
	m
});

/// Checks if a state transition is valid.
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
	TRANSITIONS.get(&from).is_some_and(|set| set.contains(&to))
}

/// Webhook event emitted by a transition, if any.
///
/// `from` is `None` for order creation. Payment confirmation is logged but
/// not notified.
pub fn event_for(from: Option<OrderStatus>, to: OrderStatus) -> Option<EventType> {
	match (from, to) {
		(None, _) => Some(EventType::OrderCreated),
		(Some(OrderStatus::Cancelled), OrderStatus::PendingPayment) => {
			Some(EventType::OrderRestored)
		},
		(Some(_), OrderStatus::PendingPayment) => None,
		(Some(_), OrderStatus::PendingConfirm) => None,
		(Some(_), OrderStatus::Confirmed) => Some(EventType::OrderConfirmed),
		(Some(_), OrderStatus::Delivering) => Some(EventType::OrderDelivering),
		(Some(_), OrderStatus::Completed) => Some(EventType::OrderCompleted),
		(Some(_), OrderStatus::Cancelled) => Some(EventType::OrderCancelled),
	}
}

/// Admin approval of a specific cancel request, carried by the cancelling
/// transition so the request is resolved in the same unit.
#[derive(Debug, Clone)]
pub struct RequestApproval {
	pub request_id: u64,
	pub admin_id: u64,
	pub remark: Option<String>,
}

/// A requested status change.
#[derive(Debug, Clone)]
pub struct Transition {
	pub to: OrderStatus,
	pub actor: Actor,
	/// Recorded on the status log entry.
	pub remark: String,
	/// Cancellation reason; defaults to the remark.
	pub reason: Option<String>,
	/// Required when confirming payment.
	pub payment: Option<PaymentInfo>,
	pub approval: Option<RequestApproval>,
}

impl Transition {
	pub fn new(to: OrderStatus, actor: Actor, remark: impl Into<String>) -> Self {
		Self {
			to,
			actor,
			remark: remark.into(),
			reason: None,
			payment: None,
			approval: None,
		}
	}

	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());
		self
	}

	pub fn with_payment(mut self, payment: PaymentInfo) -> Self {
		self.payment = Some(payment);
		self
	}

	pub fn approving(mut self, approval: RequestApproval) -> Self {
		self.approval = Some(approval);
		self
	}
}

/// Everything a committed unit wrote.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
	pub order: Order,
	/// `None` for creation.
	pub from: Option<OrderStatus>,
	pub actor: Actor,
	pub log: OrderStatusLog,
	pub tasks: Vec<WebhookLog>,
	pub closed_request: Option<OrderCancelRequest>,
}

/// Manages order state transitions and persistence.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	outbox: Arc<WebhookOutbox>,
	clock: Arc<dyn Clock>,
	cancel_threshold: Duration,
	locks: Arc<DashMap<u64, Arc<Mutex<()>>>>,
}

/// Holds the lock of one order. The lock entry is dropped from the table on
/// release when no other task holds or awaits it.
pub struct OrderGuard {
	order_id: u64,
	locks: Arc<DashMap<u64, Arc<Mutex<()>>>>,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OrderGuard {
	fn drop(&mut self) {
		self.guard.take();
		self.locks
			.remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
	}
}

impl OrderStateMachine {
	pub fn new(
		storage: Arc<StorageService>,
		outbox: Arc<WebhookOutbox>,
		clock: Arc<dyn Clock>,
		cancel_threshold: Duration,
	) -> Self {
		Self {
			storage,
			outbox,
			clock,
			cancel_threshold,
			locks: Arc::new(DashMap::new()),
		}
	}

	pub fn cancel_threshold(&self) -> Duration {
		self.cancel_threshold
	}

	/// Acquires the per-order lock.
	///
	/// [`transition`](Self::transition) takes this lock itself; callers that
	/// hold the guard must not call it for the same order.
	pub async fn lock(&self, order_id: u64) -> OrderGuard {
		let lock = self
			.locks
			.entry(order_id)
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();
		OrderGuard {
			order_id,
			locks: self.locks.clone(),
			guard: Some(lock.lock_owned().await),
		}
	}

	#[cfg(test)]
	fn lock_count(&self) -> usize {
		self.locks.len()
	}

	/// Loads an order, including archived ones.
	pub async fn load(&self, order_id: u64) -> Result<Order, OrderStateError> {
		self.storage
			.find(StorageKey::Orders.as_str(), &order_id.to_string())
			.await?
			.ok_or(OrderStateError::OrderNotFound(order_id))
	}

	/// Status log of an order, oldest first.
	pub async fn logs(&self, order_id: u64) -> Result<Vec<OrderStatusLog>, OrderStateError> {
		Ok(self
			.storage
			.find(StorageKey::StatusLogs.as_str(), &order_id.to_string())
			.await?
			.unwrap_or_default())
	}

	/// Decides whether `transition` may be applied to `order` at `now`.
	///
	/// Ownership is checked first, then the edge, then the actor guard.
	pub fn check(
		&self,
		order: &Order,
		transition: &Transition,
		now: DateTime<Utc>,
	) -> Result<(), OrderStateError> {
		let actor = transition.actor;
		if !order.is_visible_to(&actor) {
			return Err(OrderStateError::Unauthorized(format!(
				"{} {} is not a party to order {}",
				actor.kind(),
				actor.id(),
				order.id
			)));
		}

		let from = order.status;
		let to = transition.to;
		if !is_valid_transition(from, to) {
			return Err(OrderStateError::InvalidTransition { from, to });
		}

		match to {
			OrderStatus::PendingConfirm => match actor {
				Actor::System => {
					if transition.payment.is_none() {
						return Err(OrderStateError::GuardRejected(
							"payment details are required".into(),
						));
					}
					Ok(())
				},
				Actor::Store(_) | Actor::Supplier(_) | Actor::Admin(_) => Err(
					OrderStateError::Unauthorized("payment is confirmed by the system only".into()),
				),
			},
			OrderStatus::Confirmed | OrderStatus::Delivering => match actor {
				Actor::Supplier(_) => Ok(()),
				Actor::Store(_) | Actor::Admin(_) | Actor::System => {
					Err(OrderStateError::Unauthorized(format!(
						"only the supplier can move an order to {}",
						to
					)))
				},
			},
			OrderStatus::Completed => match actor {
				Actor::Supplier(_) | Actor::System => Ok(()),
				Actor::Store(_) | Actor::Admin(_) => Err(OrderStateError::Unauthorized(
					"only the supplier or the system can complete an order".into(),
				)),
			},
			OrderStatus::Cancelled => self.check_cancel(order, actor, now),
			OrderStatus::PendingPayment => match actor {
				Actor::Admin(_) => Ok(()),
				Actor::Store(_) | Actor::Supplier(_) | Actor::System => Err(
					OrderStateError::Unauthorized("only an administrator can restore an order".into()),
				),
			},
		}
	}

	fn check_cancel(
		&self,
		order: &Order,
		actor: Actor,
		now: DateTime<Utc>,
	) -> Result<(), OrderStateError> {
		match actor {
			Actor::Admin(_) | Actor::System => Ok(()),
			Actor::Supplier(_) => match order.status {
				OrderStatus::PendingConfirm | OrderStatus::Confirmed => Ok(()),
				status => Err(OrderStateError::GuardRejected(format!(
					"supplier cannot cancel an order that is {}",
					status
				))),
			},
			Actor::Store(_) => {
				if order.status != OrderStatus::PendingConfirm {
					return Err(OrderStateError::GuardRejected(format!(
						"order is {}; submit a cancel request via POST /api/orders/{}/cancel-requests",
						order.status, order.id
					)));
				}
				if now - order.created_at > self.cancel_threshold {
					return Err(OrderStateError::GuardRejected(format!(
						"self-service cancellation is only possible within {} minutes of ordering; \
						 submit a cancel request via POST /api/orders/{}/cancel-requests",
						self.cancel_threshold.num_minutes(),
						order.id
					)));
				}
				Ok(())
			},
		}
	}

	/// Persists a new order with its creation log entry and `order.created`
	/// tasks.
	pub async fn create(
		&self,
		order: Order,
		actor: Actor,
		remark: &str,
	) -> Result<TransitionOutcome, OrderStateError> {
		let _guard = self.lock(order.id).await;
		let now = order.created_at;
		let mut unit = UnitOfWork::new(&self.storage);

		let staged = async {
			if !unit
				.insert(StorageKey::Orders, &order.id.to_string(), &order)
				.await?
			{
				return Err(OrderStateError::Contention(order.id));
			}
			let log = self
				.append_log(&mut unit, &order, None, actor, remark, now)
				.await?;
			let tasks = self
				.outbox
				.stage(&mut unit, &order, EventType::OrderCreated, now)
				.await?;
			Ok((log, tasks))
		}
		.await;

		match staged {
			Ok((log, mut tasks)) => {
				unit.commit();
				self.outbox.release(&mut tasks).await;
				Ok(TransitionOutcome {
					order,
					from: None,
					actor,
					log,
					tasks,
					closed_request: None,
				})
			},
			Err(e) => {
				unit.rollback().await;
				Err(e)
			},
		}
	}

	/// Applies `transition` to the order as one atomic unit.
	pub async fn transition(
		&self,
		order_id: u64,
		transition: Transition,
	) -> Result<TransitionOutcome, OrderStateError> {
		let _guard = self.lock(order_id).await;
		let now = self.clock.now();
		let key = order_id.to_string();

		let current: Versioned<Order> = match self
			.storage
			.retrieve_versioned(StorageKey::Orders.as_str(), &key)
			.await
		{
			Ok(current) => current,
			Err(StorageError::NotFound) => return Err(OrderStateError::OrderNotFound(order_id)),
			Err(e) => return Err(e.into()),
		};
		if current.value.is_archived() {
			return Err(OrderStateError::OrderNotFound(order_id));
		}

		self.check(&current.value, &transition, now)?;
		if transition.to == OrderStatus::Delivering
			&& !self
				.storage
				.exists(StorageKey::Shipments.as_str(), &key)
				.await?
		{
			return Err(OrderStateError::GuardRejected(
				"a shipment must be registered before delivery starts".into(),
			));
		}

		let from = current.value.status;
		let mut order = current.value.clone();
		apply(&mut order, &transition, now);

		let mut unit = UnitOfWork::new(&self.storage);
		let staged = self
			.stage(&mut unit, &order, from, &transition, now)
			.await;
		let (log, mut tasks, closed_request) = match staged {
			Ok(staged) => staged,
			Err(e) => {
				unit.rollback().await;
				return Err(e);
			},
		};

		match self
			.storage
			.swap_versioned(StorageKey::Orders.as_str(), &key, &current, &order)
			.await
		{
			Ok(true) => {
				unit.commit();
				self.outbox.release(&mut tasks).await;
				tracing::info!(
					order_id,
					from = %from,
					to = %order.status,
					actor = %transition.actor.kind(),
					"Order transitioned"
				);
				Ok(TransitionOutcome {
					order,
					from: Some(from),
					actor: transition.actor,
					log,
					tasks,
					closed_request,
				})
			},
			Ok(false) => {
				unit.rollback().await;
				Err(OrderStateError::Contention(order_id))
			},
			Err(e) => {
				unit.rollback().await;
				Err(e.into())
			},
		}
	}

	async fn stage(
		&self,
		unit: &mut UnitOfWork<'_>,
		order: &Order,
		from: OrderStatus,
		transition: &Transition,
		now: DateTime<Utc>,
	) -> Result<(OrderStatusLog, Vec<WebhookLog>, Option<OrderCancelRequest>), OrderStateError> {
		let closed_request = if order.status.is_terminal() {
			self.close_pending_request(unit, order, transition, now)
				.await?
		} else {
			None
		};
		let log = self
			.append_log(
				unit,
				order,
				Some(from),
				transition.actor,
				&transition.remark,
				now,
			)
			.await?;
		let tasks = match event_for(Some(from), order.status) {
			Some(event) => self.outbox.stage(unit, order, event, now).await?,
			None => Vec::new(),
		};
		Ok((log, tasks, closed_request))
	}

	async fn append_log(
		&self,
		unit: &mut UnitOfWork<'_>,
		order: &Order,
		from: Option<OrderStatus>,
		actor: Actor,
		remark: &str,
		now: DateTime<Utc>,
	) -> Result<OrderStatusLog, StorageError> {
		let key = order.id.to_string();
		let entry = OrderStatusLog {
			id: self
				.storage
				.next_sequence(StorageKey::StatusLogs.as_str())
				.await?,
			order_id: order.id,
			from_status: from,
			to_status: order.status,
			actor_kind: actor.kind(),
			actor_id: actor.id(),
			remark: remark.to_string(),
			created_at: now,
		};
		let mut logs: Vec<OrderStatusLog> = self
			.storage
			.find(StorageKey::StatusLogs.as_str(), &key)
			.await?
			.unwrap_or_default();
		logs.push(entry.clone());
		unit.put(StorageKey::StatusLogs, &key, &logs).await?;
		Ok(entry)
	}

	/// Resolves the pending cancel request of an order that just turned
	/// terminal: approved if it was cancelled, rejected if it completed.
	async fn close_pending_request(
		&self,
		unit: &mut UnitOfWork<'_>,
		order: &Order,
		transition: &Transition,
		now: DateTime<Utc>,
	) -> Result<Option<OrderCancelRequest>, OrderStateError> {
		let key = order.id.to_string();
		let pending: Option<u64> = self
			.storage
			.find(StorageKey::PendingCancelRequests.as_str(), &key)
			.await?;

		if let Some(approval) = &transition.approval {
			if pending != Some(approval.request_id) {
				return Err(OrderStateError::GuardRejected(format!(
					"cancel request {} is no longer pending",
					approval.request_id
				)));
			}
		}
		let Some(request_id) = pending else {
			return Ok(None);
		};

		let mut request: OrderCancelRequest = self
			.storage
			.retrieve(StorageKey::CancelRequests.as_str(), &request_id.to_string())
			.await?;
		request.status = if order.status == OrderStatus::Cancelled {
			CancelRequestStatus::Approved
		} else {
			CancelRequestStatus::Rejected
		};
		request.processed_at = Some(now);
		match &transition.approval {
			Some(approval) => {
				request.admin_id = Some(approval.admin_id);
				request.admin_remark = approval.remark.clone();
			},
			None => {
				let actor = transition.actor;
				request.admin_id = match actor {
					Actor::Admin(id) => Some(id),
					Actor::Store(_) | Actor::Supplier(_) | Actor::System => None,
				};
				request.admin_remark = Some(format!(
					"closed automatically: order {} by {} {}",
					order.status,
					actor.kind(),
					actor.id()
				));
			},
		}

		unit.put(
			StorageKey::CancelRequests,
			&request_id.to_string(),
			&request,
		)
		.await?;
		unit.remove(StorageKey::PendingCancelRequests, &key).await?;
		Ok(Some(request))
	}
}

/// Stamps the fields that accompany entering `transition.to`.
fn apply(order: &mut Order, transition: &Transition, now: DateTime<Utc>) {
	order.status = transition.to;
	order.updated_at = now;
	match transition.to {
		OrderStatus::PendingConfirm => {
			order.payment_status = PaymentStatus::Paid;
			order.payment = transition.payment.clone();
		},
		OrderStatus::Confirmed => order.confirmed_at = Some(now),
		OrderStatus::Delivering => order.delivering_at = Some(now),
		OrderStatus::Completed => order.completed_at = Some(now),
		OrderStatus::Cancelled => {
			order.cancellation = Some(Cancellation {
				reason: transition
					.reason
					.clone()
					.unwrap_or_else(|| transition.remark.clone()),
				cancelled_by: transition.actor.kind(),
				cancelled_by_id: transition.actor.id(),
				cancelled_at: now,
			});
			if order.payment_status == PaymentStatus::Paid {
				order.payment_status = PaymentStatus::RefundPending;
			}
		},
		OrderStatus::PendingPayment => {
			order.restored_at = Some(now);
			order.cancellation = None;
			order.payment = None;
			order.payment_status = PaymentStatus::Unpaid;
			order.confirmed_at = None;
			order.delivering_at = None;
		},
	}
}
