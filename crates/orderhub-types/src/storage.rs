//! Storage namespaces used by the order hub.

use std::str::FromStr;

/// Storage keys for different data collections.
///
/// Each variant is a namespace; records are addressed as `namespace:id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records keyed by numeric id
	Orders,
	/// Order number to order id index
	OrderNumbers,
	/// Per-order status log vectors
	StatusLogs,
	/// Cancel requests keyed by request id
	CancelRequests,
	/// Order id to pending cancel request id
	PendingCancelRequests,
	/// Waybills keyed by order id
	Shipments,
	/// Catalog SKUs
	Skus,
	/// Markup rules
	MarkupRules,
	/// Webhook endpoints keyed by `kind:id`
	WebhookEndpoints,
	/// Webhook delivery tasks
	WebhookLogs,
	/// Due time of every task that may still be delivered, keyed by task id
	WebhookQueue,
	/// Monotonic id counters
	Sequences,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::OrderNumbers => "order_numbers",
			StorageKey::StatusLogs => "status_logs",
			StorageKey::CancelRequests => "cancel_requests",
			StorageKey::PendingCancelRequests => "pending_cancel_requests",
			StorageKey::Shipments => "shipments",
			StorageKey::Skus => "skus",
			StorageKey::MarkupRules => "markup_rules",
			StorageKey::WebhookEndpoints => "webhook_endpoints",
			StorageKey::WebhookLogs => "webhook_logs",
			StorageKey::WebhookQueue => "webhook_queue",
			StorageKey::Sequences => "sequences",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::OrderNumbers,
			Self::StatusLogs,
			Self::CancelRequests,
			Self::PendingCancelRequests,
			Self::Shipments,
			Self::Skus,
			Self::MarkupRules,
			Self::WebhookEndpoints,
			Self::WebhookLogs,
			Self::WebhookQueue,
			Self::Sequences,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
