//! Escalated cancellation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::OrderStatus;

/// A store's request to cancel an order outside the self-service window.
///
/// At most one request per order is `Pending` at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelRequest {
	pub id: u64,
	pub order_id: u64,
	pub store_id: u64,
	pub reason: String,
	pub status: CancelRequestStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub admin_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub admin_remark: Option<String>,
	pub created_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelRequestStatus {
	Pending,
	Approved,
	Rejected,
}

/// Admin decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
	Approve,
	Reject,
}

/// A request/order pair that violates the coupling rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
	pub request_id: u64,
	pub order_id: u64,
	pub kind: InconsistencyKind,
	pub request_status: CancelRequestStatus,
	/// `None` when the referenced order is missing altogether.
	pub order_status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyKind {
	/// An approved request whose order is not cancelled.
	ApprovedOnActiveOrder,
	/// A pending request whose order already reached a terminal status.
	PendingOnTerminalOrder,
}

impl OrderCancelRequest {
	pub fn is_pending(&self) -> bool {
		self.status == CancelRequestStatus::Pending
	}

	/// Checks this request against the current status of its order.
	pub fn inconsistency_with(&self, order_status: Option<OrderStatus>) -> Option<Inconsistency> {
		let kind = match (self.status, order_status) {
			(CancelRequestStatus::Approved, Some(OrderStatus::Cancelled)) => return None,
			(CancelRequestStatus::Approved, _) => InconsistencyKind::ApprovedOnActiveOrder,
			(CancelRequestStatus::Pending, Some(status)) if status.is_terminal() => {
				InconsistencyKind::PendingOnTerminalOrder
			},
			(CancelRequestStatus::Pending, None) => InconsistencyKind::PendingOnTerminalOrder,
			_ => return None,
		};
		Some(Inconsistency {
			request_id: self.id,
			order_id: self.order_id,
			kind,
			request_status: self.status,
			order_status,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(status: CancelRequestStatus) -> OrderCancelRequest {
		OrderCancelRequest {
			id: 1,
			order_id: 2,
			store_id: 3,
			reason: "changed mind".into(),
			status,
			admin_id: None,
			admin_remark: None,
			created_at: Utc::now(),
			processed_at: None,
		}
	}

	#[test]
	fn test_detects_both_inconsistency_kinds() {
		let approved = request(CancelRequestStatus::Approved);
		assert!(approved
			.inconsistency_with(Some(OrderStatus::Cancelled))
			.is_none());
		assert_eq!(
			approved
				.inconsistency_with(Some(OrderStatus::Confirmed))
				.map(|i| i.kind),
			Some(InconsistencyKind::ApprovedOnActiveOrder)
		);

		let pending = request(CancelRequestStatus::Pending);
		assert!(pending
			.inconsistency_with(Some(OrderStatus::Confirmed))
			.is_none());
		assert_eq!(
			pending
				.inconsistency_with(Some(OrderStatus::Completed))
				.map(|i| i.kind),
			Some(InconsistencyKind::PendingOnTerminalOrder)
		);
	}

	#[test]
	fn test_rejected_requests_are_never_inconsistent() {
		let rejected = request(CancelRequestStatus::Rejected);
		for status in OrderStatus::all() {
			assert!(rejected.inconsistency_with(Some(status)).is_none());
		}
	}
}
