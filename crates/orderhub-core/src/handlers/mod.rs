//! Operation handlers.
//!
//! Each handler validates its input, delegates status changes to the state
//! machine and publishes the resulting events once the change is committed.

pub mod cancel;
pub mod markup;
pub mod order;
pub mod webhook;

pub use cancel::CancellationHandler;
pub use markup::MarkupHandler;
pub use order::OrderHandler;
pub use webhook::WebhookHandler;

use crate::engine::event_bus::EventBus;
use crate::state::TransitionOutcome;
use crate::EngineError;
use orderhub_types::{
	Actor, CancellationEvent, EngineEvent, Order, OrderEvent, WebhookEvent,
};

/// Publishes the events describing a committed unit.
pub(crate) fn publish_outcome(event_bus: &EventBus, outcome: &TransitionOutcome) {
	let order_id = outcome.order.id;
	match outcome.from {
		None => event_bus.publish(EngineEvent::Order(OrderEvent::Created {
			order_id,
			order_no: outcome.order.order_no.clone(),
		})),
		Some(from) => event_bus.publish(EngineEvent::Order(OrderEvent::StatusChanged {
			order_id,
			from,
			to: outcome.order.status,
			actor: outcome.actor,
		})),
	}
	if let Some(request) = &outcome.closed_request {
		event_bus.publish(EngineEvent::Cancellation(
			CancellationEvent::RequestResolved {
				request_id: request.id,
				order_id,
				status: request.status,
			},
		));
	}
	if !outcome.tasks.is_empty() {
		event_bus.publish(EngineEvent::Webhook(WebhookEvent::TasksEnqueued {
			order_id,
			count: outcome.tasks.len(),
		}));
	}
}

/// Rejects reads of archived orders and orders the actor is not a party to.
pub(crate) fn ensure_readable(order: &Order, actor: &Actor) -> Result<(), EngineError> {
	if order.is_archived() {
		return Err(EngineError::NotFound(format!("order {}", order.id)));
	}
	if !order.is_visible_to(actor) {
		return Err(EngineError::Unauthorized(format!(
			"{} {} is not a party to order {}",
			actor.kind(),
			actor.id(),
			order.id
		)));
	}
	Ok(())
}

pub(crate) fn require_admin(actor: &Actor) -> Result<u64, EngineError> {
	match actor {
		Actor::Admin(id) => Ok(*id),
		Actor::Store(_) | Actor::Supplier(_) | Actor::System => Err(EngineError::Unauthorized(
			"this operation requires an administrator".into(),
		)),
	}
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), EngineError> {
	if value.trim().is_empty() {
		return Err(EngineError::Validation(format!("{} cannot be empty", field)));
	}
	Ok(())
}
