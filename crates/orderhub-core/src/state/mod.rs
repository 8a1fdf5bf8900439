//! State management for orders.
//!
//! The state machine owns every status change of an order together with the
//! audit log and outbox writes that must accompany it.

pub mod order;
mod unit;

pub use order::{
	event_for, is_valid_transition, OrderGuard, OrderStateError, OrderStateMachine,
	RequestApproval, Transition, TransitionOutcome,
};
pub(crate) use unit::UnitOfWork;
