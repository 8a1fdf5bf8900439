//! Price markup rule types.
//!
//! A rule scopes itself with up to four optional dimensions. An unset
//! dimension is a wildcard. The resolution algorithm lives in the markup
//! crate; these are the persisted and wire shapes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

/// An administrator-defined pricing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMarkup {
	pub id: u64,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub store_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub supplier_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub category_id: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub material_id: Option<u64>,
	pub kind: MarkupKind,
	/// Fixed amount, or a fraction of the original price for percentage rules.
	pub value: Decimal,
	/// Lower clamp; zero disables it.
	#[serde(default)]
	pub min_markup: Decimal,
	/// Upper clamp; zero disables it.
	#[serde(default)]
	pub max_markup: Decimal,
	/// Derived from the bound dimensions. Never taken from input.
	pub specificity: u32,
	/// Explicit tie-breaker among rules of equal specificity.
	#[serde(default)]
	pub priority: i32,
	pub is_active: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub start_time: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_time: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remark: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkupKind {
	Fixed,
	Percentage,
}

/// Input of a markup calculation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkupRequest {
	#[serde(default)]
	pub store_id: Option<u64>,
	#[serde(default)]
	pub supplier_id: Option<u64>,
	#[serde(default)]
	pub category_id: Option<u64>,
	#[serde(default)]
	pub material_id: Option<u64>,
	pub original_price: Decimal,
}

/// Result of a markup calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupQuote {
	pub original_price: Decimal,
	pub markup_amount: Decimal,
	pub final_price: Decimal,
	pub rule_id: Option<u64>,
	pub rule_name: Option<String>,
}

impl MarkupQuote {
	/// A quote with zero markup, used when no rule matches.
	pub fn unmarked(original_price: Decimal) -> Self {
		Self {
			original_price,
			markup_amount: Decimal::ZERO,
			final_price: original_price,
			rule_id: None,
			rule_name: None,
		}
	}
}

/// Rule creation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMarkupRequest {
	pub name: String,
	#[serde(default)]
	pub store_id: Option<u64>,
	#[serde(default)]
	pub supplier_id: Option<u64>,
	#[serde(default)]
	pub category_id: Option<u64>,
	#[serde(default)]
	pub material_id: Option<u64>,
	pub kind: MarkupKind,
	pub value: Decimal,
	#[serde(default)]
	pub min_markup: Decimal,
	#[serde(default)]
	pub max_markup: Decimal,
	#[serde(default)]
	pub priority: i32,
	#[serde(default = "default_active")]
	pub is_active: bool,
	#[serde(default)]
	pub start_time: Option<DateTime<Utc>>,
	#[serde(default)]
	pub end_time: Option<DateTime<Utc>>,
	#[serde(default)]
	pub remark: Option<String>,
}

/// Partial rule update. An absent field is left untouched; for the nullable
/// dimensions and window bounds an explicit `null` clears the value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMarkupRequest {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default, deserialize_with = "double_option")]
	pub store_id: Option<Option<u64>>,
	#[serde(default, deserialize_with = "double_option")]
	pub supplier_id: Option<Option<u64>>,
	#[serde(default, deserialize_with = "double_option")]
	pub category_id: Option<Option<u64>>,
	#[serde(default, deserialize_with = "double_option")]
	pub material_id: Option<Option<u64>>,
	#[serde(default)]
	pub kind: Option<MarkupKind>,
	#[serde(default)]
	pub value: Option<Decimal>,
	#[serde(default)]
	pub min_markup: Option<Decimal>,
	#[serde(default)]
	pub max_markup: Option<Decimal>,
	#[serde(default)]
	pub priority: Option<i32>,
	#[serde(default, deserialize_with = "double_option")]
	pub start_time: Option<Option<DateTime<Utc>>>,
	#[serde(default, deserialize_with = "double_option")]
	pub end_time: Option<Option<DateTime<Utc>>>,
	#[serde(default, deserialize_with = "double_option")]
	pub remark: Option<Option<String>>,
}

fn default_active() -> bool {
	true
}

/// Distinguishes an explicit `null` (`Some(None)`) from an absent field (`None`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
	T: Deserialize<'de>,
	D: Deserializer<'de>,
{
	Option::<T>::deserialize(deserializer).map(Some)
}

impl PriceMarkup {
	/// Whether the rule is active and `now` lies within its validity window.
	pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
		self.is_active
			&& self.start_time.is_none_or(|start| start <= now)
			&& self.end_time.is_none_or(|end| now <= end)
	}

	/// Applies an update request field by field.
	pub fn apply_update(&mut self, update: UpdateMarkupRequest) {
		if let Some(name) = update.name {
			self.name = name;
		}
		if let Some(store_id) = update.store_id {
			self.store_id = store_id;
		}
		if let Some(supplier_id) = update.supplier_id {
			self.supplier_id = supplier_id;
		}
		if let Some(category_id) = update.category_id {
			self.category_id = category_id;
		}
		if let Some(material_id) = update.material_id {
			self.material_id = material_id;
		}
		if let Some(kind) = update.kind {
			self.kind = kind;
		}
		if let Some(value) = update.value {
			self.value = value;
		}
		if let Some(min_markup) = update.min_markup {
			self.min_markup = min_markup;
		}
		if let Some(max_markup) = update.max_markup {
			self.max_markup = max_markup;
		}
		if let Some(priority) = update.priority {
			self.priority = priority;
		}
		if let Some(start_time) = update.start_time {
			self.start_time = start_time;
		}
		if let Some(end_time) = update.end_time {
			self.end_time = end_time;
		}
		if let Some(remark) = update.remark {
			self.remark = remark;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_update_distinguishes_null_from_absent() {
		let update: UpdateMarkupRequest =
			serde_json::from_value(serde_json::json!({"store_id": null, "value": "2.5"})).unwrap();
		assert_eq!(update.store_id, Some(None));
		assert_eq!(update.supplier_id, None);
		assert_eq!(update.value, Some(Decimal::new(25, 1)));
	}
}
