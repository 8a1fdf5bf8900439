//! Catalog records consulted when pricing an order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A supplier's sellable SKU with its base price and markup dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkuRecord {
	pub id: u64,
	pub supplier_id: u64,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub material_id: Option<u64>,
	pub base_price: Decimal,
	#[serde(default = "default_active")]
	pub active: bool,
}

fn default_active() -> bool {
	true
}
