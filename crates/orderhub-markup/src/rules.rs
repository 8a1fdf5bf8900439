//! Rule specificity and validation.

use crate::MarkupError;
use orderhub_types::{MarkupKind, PriceMarkup};
use rust_decimal::Decimal;

/// Weight contributed by a bound material dimension.
pub const MATERIAL_WEIGHT: u32 = 1000;
/// Weight contributed by a bound category dimension.
pub const CATEGORY_WEIGHT: u32 = 100;
/// Weight contributed by a bound supplier dimension.
pub const SUPPLIER_WEIGHT: u32 = 10;
/// Weight contributed by a bound store dimension.
pub const STORE_WEIGHT: u32 = 1;

/// Specificity of a rule: the sum of the weights of its bound dimensions.
///
/// Each weight exceeds the sum of all smaller ones, so a rule bound on a more
/// significant dimension outranks any combination of less significant ones.
pub fn specificity(rule: &PriceMarkup) -> u32 {
	[
		(rule.material_id, MATERIAL_WEIGHT),
		(rule.category_id, CATEGORY_WEIGHT),
		(rule.supplier_id, SUPPLIER_WEIGHT),
		(rule.store_id, STORE_WEIGHT),
	]
	.into_iter()
	.filter(|(dimension, _)| dimension.is_some())
	.map(|(_, weight)| weight)
	.sum()
}

/// Upper bound for a percentage rule, as a fraction (1000 %).
const MAX_PERCENTAGE: Decimal = Decimal::TEN;

/// Checks a rule definition before it is stored.
pub fn validate_rule(rule: &PriceMarkup) -> Result<(), MarkupError> {
	if rule.name.trim().is_empty() {
		return Err(MarkupError::InvalidRule("name cannot be empty".into()));
	}
	if rule.value.is_sign_negative() && !rule.value.is_zero() {
		return Err(MarkupError::InvalidRule("value cannot be negative".into()));
	}
	if rule.kind == MarkupKind::Percentage && rule.value > MAX_PERCENTAGE {
		return Err(MarkupError::InvalidRule(format!(
			"percentage value {} exceeds {}",
			rule.value, MAX_PERCENTAGE
		)));
	}
	if rule.min_markup < Decimal::ZERO || rule.max_markup < Decimal::ZERO {
		return Err(MarkupError::InvalidRule(
			"min_markup and max_markup cannot be negative".into(),
		));
	}
	if !rule.min_markup.is_zero() && !rule.max_markup.is_zero() && rule.min_markup > rule.max_markup
	{
		return Err(MarkupError::InvalidRule(format!(
			"min_markup {} exceeds max_markup {}",
			rule.min_markup, rule.max_markup
		)));
	}
	if let (Some(start), Some(end)) = (rule.start_time, rule.end_time) {
		if start >= end {
			return Err(MarkupError::InvalidRule(
				"start_time must be before end_time".into(),
			));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::*;
	use chrono::Duration;

	#[test]
	fn test_specificity_orders_dimensions_strictly() {
		let mut material = rule(1, MarkupKind::Fixed, Decimal::ONE);
		material.material_id = Some(1);

		let mut everything_else = rule(2, MarkupKind::Fixed, Decimal::ONE);
		everything_else.category_id = Some(1);
		everything_else.supplier_id = Some(1);
		everything_else.store_id = Some(1);

		let mut supplier_store = rule(3, MarkupKind::Fixed, Decimal::ONE);
		supplier_store.supplier_id = Some(1);
		supplier_store.store_id = Some(1);

		let mut category = rule(4, MarkupKind::Fixed, Decimal::ONE);
		category.category_id = Some(1);

		assert!(specificity(&material) > specificity(&everything_else));
		assert!(specificity(&category) > specificity(&supplier_store));
		assert_eq!(specificity(&rule(5, MarkupKind::Fixed, Decimal::ONE)), 0);
	}

	#[test]
	fn test_validation_rejects_bad_definitions() {
		let mut unnamed = rule(1, MarkupKind::Fixed, Decimal::ONE);
		unnamed.name = "  ".into();
		assert!(validate_rule(&unnamed).is_err());

		let negative = rule(2, MarkupKind::Fixed, Decimal::new(-1, 0));
		assert!(validate_rule(&negative).is_err());

		let huge = rule(3, MarkupKind::Percentage, Decimal::new(11, 0));
		assert!(validate_rule(&huge).is_err());

		let mut inverted = rule(4, MarkupKind::Fixed, Decimal::ONE);
		inverted.min_markup = Decimal::new(5, 0);
		inverted.max_markup = Decimal::new(1, 0);
		assert!(validate_rule(&inverted).is_err());

		let mut window = rule(5, MarkupKind::Fixed, Decimal::ONE);
		window.start_time = Some(epoch());
		window.end_time = Some(epoch() - Duration::hours(1));
		assert!(validate_rule(&window).is_err());

		let mut min_only = rule(6, MarkupKind::Fixed, Decimal::ONE);
		min_only.min_markup = Decimal::new(5, 0);
		assert!(validate_rule(&min_only).is_ok());
	}
}
