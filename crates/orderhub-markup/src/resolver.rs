//! Rule matching.

use chrono::{DateTime, Utc};
use orderhub_types::{MarkupQuote, MarkupRequest, PriceMarkup};

use crate::markup_amount;

/// A bound dimension matches only an equal value; an unbound one matches anything.
fn dimension_matches(bound: Option<u64>, requested: Option<u64>) -> bool {
	match bound {
		None => true,
		Some(id) => requested == Some(id),
	}
}

/// Whether `rule` applies to `request`, ignoring effectiveness.
pub fn matches(rule: &PriceMarkup, request: &MarkupRequest) -> bool {
	dimension_matches(rule.store_id, request.store_id)
		&& dimension_matches(rule.supplier_id, request.supplier_id)
		&& dimension_matches(rule.category_id, request.category_id)
		&& dimension_matches(rule.material_id, request.material_id)
}

/// Applies the first effective matching rule from `sorted_rules`.
///
/// `sorted_rules` must already be in precedence order (see `RuleSet`).
/// No match yields a zero markup, never an error.
pub fn resolve(
	sorted_rules: &[PriceMarkup],
	request: &MarkupRequest,
	now: DateTime<Utc>,
) -> MarkupQuote {
	let Some(rule) = sorted_rules
		.iter()
		.find(|rule| rule.is_effective_at(now) && matches(rule, request))
	else {
		return MarkupQuote::unmarked(request.original_price);
	};

	let markup = markup_amount(rule, request.original_price);
	MarkupQuote {
		original_price: request.original_price,
		markup_amount: markup,
		final_price: request.original_price + markup,
		rule_id: Some(rule.id),
		rule_name: Some(rule.name.clone()),
	}
}

#[cfg(test)]
mod tests {
	use crate::test_support::*;
	use crate::RuleSet;
	use chrono::Duration;
	use orderhub_types::{MarkupKind, MarkupRequest};
	use rust_decimal::Decimal;

	fn request() -> MarkupRequest {
		MarkupRequest {
			store_id: Some(1),
			supplier_id: Some(2),
			category_id: Some(3),
			material_id: Some(4),
			original_price: Decimal::new(10000, 2),
		}
	}

	#[test]
	fn test_material_rule_beats_store_rule_in_any_order() {
		let mut store_pct = rule(1, MarkupKind::Percentage, Decimal::new(5, 2));
		store_pct.store_id = Some(1);
		let mut material_fixed = rule(2, MarkupKind::Fixed, Decimal::new(2, 0));
		material_fixed.material_id = Some(4);
		// Newer store rule must still lose.
		store_pct.created_at = epoch() + Duration::days(1);

		let forward = RuleSet::new(vec![scoped(store_pct.clone()), scoped(material_fixed.clone())]);
		let backward = RuleSet::new(vec![scoped(material_fixed), scoped(store_pct)]);

		let a = forward.quote(&request(), epoch());
		let b = backward.quote(&request(), epoch());
		assert_eq!(a, b);
		assert_eq!(a.markup_amount, Decimal::new(200, 2));
		assert_eq!(a.rule_id, Some(2));
		assert_eq!(a.final_price, Decimal::new(10200, 2));
	}

	#[test]
	fn test_ties_broken_by_priority_then_recency() {
		let mut low = rule(1, MarkupKind::Fixed, Decimal::ONE);
		low.priority = 1;
		let mut high = rule(2, MarkupKind::Fixed, Decimal::TWO);
		high.priority = 5;
		let set = RuleSet::new(vec![scoped(low.clone()), scoped(high)]);
		assert_eq!(set.quote(&request(), epoch()).rule_id, Some(2));

		let mut older = rule(3, MarkupKind::Fixed, Decimal::ONE);
		older.created_at = epoch() - Duration::days(2);
		let newer = rule(4, MarkupKind::Fixed, Decimal::TWO);
		let set = RuleSet::new(vec![scoped(newer), scoped(older)]);
		assert_eq!(set.quote(&request(), epoch()).rule_id, Some(4));
	}

	#[test]
	fn test_bound_dimension_requires_value() {
		let mut category = rule(1, MarkupKind::Fixed, Decimal::ONE);
		category.category_id = Some(3);
		let set = RuleSet::new(vec![scoped(category)]);

		let mut without_category = request();
		without_category.category_id = None;
		let quote = set.quote(&without_category, epoch());
		assert_eq!(quote.markup_amount, Decimal::ZERO);
		assert_eq!(quote.final_price, quote.original_price);
		assert_eq!(quote.rule_id, None);
	}

	#[test]
	fn test_inactive_and_out_of_window_rules_skipped() {
		let mut inactive = rule(1, MarkupKind::Fixed, Decimal::new(9, 0));
		inactive.material_id = Some(4);
		inactive.is_active = false;

		let mut expired = rule(2, MarkupKind::Fixed, Decimal::new(8, 0));
		expired.category_id = Some(3);
		expired.end_time = Some(epoch() - Duration::seconds(1));

		let fallback = rule(3, MarkupKind::Fixed, Decimal::ONE);

		let set = RuleSet::new(vec![scoped(inactive), scoped(expired), scoped(fallback)]);
		let quote = set.quote(&request(), epoch());
		assert_eq!(quote.rule_id, Some(3));
		assert_eq!(quote.markup_amount, Decimal::ONE.round_dp(2));
	}

	#[test]
	fn test_resolution_is_deterministic() {
		let mut pct = rule(1, MarkupKind::Percentage, Decimal::new(333, 4));
		pct.supplier_id = Some(2);
		let set = RuleSet::new(vec![scoped(pct)]);
		let first = set.quote(&request(), epoch());
		let second = set.quote(&request(), epoch());
		assert_eq!(first, second);
		assert_eq!(first.markup_amount, Decimal::new(333, 2));
	}
}
