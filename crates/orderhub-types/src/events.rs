//! Event types for in-process communication.
//!
//! Every accepted mutation is published on the engine's event bus after it
//! has been committed. Subscribers (the dispatcher wake-up, logging, tests)
//! observe these; they never drive the state machine themselves.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Actor, CancelRequestStatus, OrderStatus};

/// Main event type encompassing all engine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
	/// Events from the order aggregate.
	Order(OrderEvent),
	/// Events from the cancellation workflow.
	Cancellation(CancellationEvent),
	/// Events from the notification subsystem.
	Webhook(WebhookEvent),
	/// The published markup rule set was replaced.
	MarkupRulesChanged { active_rules: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	Created {
		order_id: u64,
		order_no: String,
	},
	StatusChanged {
		order_id: u64,
		from: OrderStatus,
		to: OrderStatus,
		actor: Actor,
	},
	/// Payment confirmation recorded on the order.
	PaymentConfirmed { order_id: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CancellationEvent {
	RequestSubmitted { request_id: u64, order_id: u64 },
	RequestResolved {
		request_id: u64,
		order_id: u64,
		status: CancelRequestStatus,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WebhookEvent {
	/// New tasks were enqueued and can be drained.
	TasksEnqueued { order_id: u64, count: usize },
	Delivered { task_id: Uuid, order_id: u64 },
	Failed {
		task_id: Uuid,
		order_id: u64,
		retry_count: u32,
		exhausted: bool,
	},
}
