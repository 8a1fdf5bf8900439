//! Order aggregate types.
//!
//! This module defines the persisted shape of an order, its line items, the
//! status and payment enums driven by the state machine, and the append-only
//! status log written for every accepted transition.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Actor, ActorKind};

/// An order placed by a store with a single supplier.
///
/// Monetary invariants, maintained by [`Order::recalculate`]:
/// `total_amount == goods_amount + service_fee` and
/// `supplier_amount == goods_amount - markup_total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Numeric identity.
	pub id: u64,
	/// Human-facing order number, `<unix-timestamp><6 digits>`.
	pub order_no: String,
	pub store_id: u64,
	pub supplier_id: u64,
	/// Line items with their markup snapshot.
	pub items: Vec<OrderItem>,
	/// Sum of final (marked-up) line prices.
	pub goods_amount: Decimal,
	/// Platform service fee charged on top of the goods amount.
	pub service_fee: Decimal,
	/// Sum of markups across all lines.
	pub markup_total: Decimal,
	/// Amount owed to the supplier.
	pub supplier_amount: Decimal,
	/// Amount charged to the store.
	pub total_amount: Decimal,
	/// Total quantity across all lines.
	pub item_count: u32,
	pub status: OrderStatus,
	pub payment_status: PaymentStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payment: Option<PaymentInfo>,
	pub delivery: DeliverySnapshot,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cancellation: Option<Cancellation>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confirmed_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivering_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub restored_at: Option<DateTime<Utc>>,
	/// Soft-delete marker; archived orders are never physically removed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_at: Option<DateTime<Utc>>,
}

/// A single order line with the price snapshot taken at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
	pub sku_id: u64,
	pub name: String,
	pub quantity: u32,
	/// Supplier base price per unit.
	pub unit_price: Decimal,
	/// Markup per unit.
	pub markup_amount: Decimal,
	/// Price per unit charged to the store.
	pub final_price: Decimal,
	/// `final_price * quantity`.
	pub subtotal: Decimal,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub markup_rule_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub markup_rule_name: Option<String>,
}

/// Delivery address captured when the order is submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySnapshot {
	pub contact_name: String,
	pub contact_phone: String,
	pub address: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remark: Option<String>,
}

/// Payment details stamped by a successful payment confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
	pub method: String,
	pub reference: String,
	pub paid_at: DateTime<Utc>,
}

/// Cancellation metadata stamped when an order enters `cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
	pub reason: String,
	pub cancelled_by: ActorKind,
	pub cancelled_by_id: u64,
	pub cancelled_at: DateTime<Utc>,
}

/// Waybill registered by the supplier before delivery can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
	pub order_id: u64,
	pub carrier: String,
	pub tracking_no: String,
	pub created_at: DateTime<Utc>,
}

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	PendingPayment,
	PendingConfirm,
	Confirmed,
	Delivering,
	Completed,
	Cancelled,
}

impl OrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::PendingPayment => "pending_payment",
			OrderStatus::PendingConfirm => "pending_confirm",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Delivering => "delivering",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	/// `completed` and `cancelled` end forward progress.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::PendingPayment,
			Self::PendingConfirm,
			Self::Confirmed,
			Self::Delivering,
			Self::Completed,
			Self::Cancelled,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Payment status tracked alongside the order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	Unpaid,
	Paid,
	/// A paid order was cancelled; the refund is handled by the payment side.
	RefundPending,
}

/// Immutable audit record of one accepted status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusLog {
	pub id: u64,
	pub order_id: u64,
	/// `None` for the creation entry.
	pub from_status: Option<OrderStatus>,
	pub to_status: OrderStatus,
	pub actor_kind: ActorKind,
	pub actor_id: u64,
	pub remark: String,
	pub created_at: DateTime<Utc>,
}

impl Order {
	/// Recomputes the derived totals from the line items.
	pub fn recalculate(&mut self, service_fee_rate: Decimal) {
		self.goods_amount = self.items.iter().map(|i| i.subtotal).sum();
		self.markup_total = self
			.items
			.iter()
			.map(|i| i.markup_amount * Decimal::from(i.quantity))
			.sum();
		self.item_count = self.items.iter().map(|i| i.quantity).sum();
		self.service_fee = crate::round_money(self.goods_amount * service_fee_rate);
		self.total_amount = self.goods_amount + self.service_fee;
		self.supplier_amount = self.goods_amount - self.markup_total;
	}

	/// Whether `actor` is a party to this order (or privileged).
	pub fn is_visible_to(&self, actor: &Actor) -> bool {
		match actor {
			Actor::Store(id) => *id == self.store_id,
			Actor::Supplier(id) => *id == self.supplier_id,
			Actor::Admin(_) | Actor::System => true,
		}
	}

	pub fn is_archived(&self) -> bool {
		self.deleted_at.is_some()
	}
}

impl OrderItem {
	pub fn new(
		sku_id: u64,
		name: impl Into<String>,
		quantity: u32,
		unit_price: Decimal,
		markup_amount: Decimal,
	) -> Self {
		let final_price = unit_price + markup_amount;
		Self {
			sku_id,
			name: name.into(),
			quantity,
			unit_price,
			markup_amount,
			final_price,
			subtotal: final_price * Decimal::from(quantity),
			markup_rule_id: None,
			markup_rule_name: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_order(items: Vec<OrderItem>) -> Order {
		let now = Utc::now();
		Order {
			id: 1,
			order_no: "1700000000000001".into(),
			store_id: 10,
			supplier_id: 20,
			items,
			goods_amount: Decimal::ZERO,
			service_fee: Decimal::ZERO,
			markup_total: Decimal::ZERO,
			supplier_amount: Decimal::ZERO,
			total_amount: Decimal::ZERO,
			item_count: 0,
			status: OrderStatus::PendingPayment,
			payment_status: PaymentStatus::Unpaid,
			payment: None,
			delivery: DeliverySnapshot::default(),
			cancellation: None,
			created_at: now,
			updated_at: now,
			confirmed_at: None,
			delivering_at: None,
			completed_at: None,
			restored_at: None,
			deleted_at: None,
		}
	}

	#[test]
	fn test_recalculate_keeps_amount_invariants() {
		let mut order = sample_order(vec![
			OrderItem::new(1, "Rice", 4, Decimal::new(2000, 2), Decimal::new(200, 2)),
			OrderItem::new(2, "Oil", 1, Decimal::new(5050, 2), Decimal::ZERO),
		]);
		order.recalculate(Decimal::new(3, 3));

		assert_eq!(order.goods_amount, Decimal::new(13850, 2));
		assert_eq!(order.markup_total, Decimal::new(800, 2));
		assert_eq!(order.item_count, 5);
		assert_eq!(order.total_amount, order.goods_amount + order.service_fee);
		assert_eq!(
			order.supplier_amount,
			order.goods_amount - order.markup_total
		);
	}

	#[test]
	fn test_visibility_by_actor() {
		let order = sample_order(vec![]);
		assert!(order.is_visible_to(&Actor::Store(10)));
		assert!(!order.is_visible_to(&Actor::Store(11)));
		assert!(order.is_visible_to(&Actor::Supplier(20)));
		assert!(order.is_visible_to(&Actor::Admin(1)));
	}

	#[test]
	fn test_status_serialization_is_snake_case() {
		let json = serde_json::to_string(&OrderStatus::PendingConfirm).unwrap();
		assert_eq!(json, "\"pending_confirm\"");
		assert!(OrderStatus::Cancelled.is_terminal());
		assert!(!OrderStatus::Delivering.is_terminal());
	}
}
