//! Price markup resolution for the order hub.
//!
//! Given a calculation request and the current rule set, the engine selects
//! the single most specific effective rule and computes the markup. Resolution
//! is a pure function of `(rules, request, now)`; [`MarkupService`] only adds
//! an atomically swappable snapshot of the rule set on top.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use orderhub_types::{round_money, MarkupKind, MarkupQuote, MarkupRequest, PriceMarkup};
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::sync::Arc;
use thiserror::Error;

pub mod resolver;
pub mod rules;

pub use resolver::resolve;
pub use rules::{specificity, validate_rule, MATERIAL_WEIGHT, CATEGORY_WEIGHT, STORE_WEIGHT, SUPPLIER_WEIGHT};

/// Errors raised when a rule definition is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
	#[error("Invalid rule: {0}")]
	InvalidRule(String),
}

/// An immutable, pre-sorted view of the rule set.
///
/// Rules are ordered by descending specificity, then explicit priority,
/// then recency, then id, so resolution is a first-match scan.
#[derive(Debug, Default)]
pub struct RuleSet {
	rules: Vec<PriceMarkup>,
}

impl RuleSet {
	pub fn new(mut rules: Vec<PriceMarkup>) -> Self {
		rules.sort_by_key(|rule| {
			(
				Reverse(rule.specificity),
				Reverse(rule.priority),
				Reverse(rule.created_at),
				Reverse(rule.id),
			)
		});
		Self { rules }
	}

	pub fn rules(&self) -> &[PriceMarkup] {
		&self.rules
	}

	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	/// Quotes `request` against this snapshot.
	pub fn quote(&self, request: &MarkupRequest, now: DateTime<Utc>) -> MarkupQuote {
		resolve(&self.rules, request, now)
	}
}

/// Shared handle to the currently published rule set.
///
/// Publishing replaces the snapshot wholesale. A calculation loads one
/// snapshot and uses it throughout, so it never observes a partial update.
pub struct MarkupService {
	snapshot: ArcSwap<RuleSet>,
}

impl Default for MarkupService {
	fn default() -> Self {
		Self::new(Vec::new())
	}
}

impl MarkupService {
	pub fn new(rules: Vec<PriceMarkup>) -> Self {
		Self {
			snapshot: ArcSwap::from_pointee(RuleSet::new(rules)),
		}
	}

	/// Replaces the published rule set.
	pub fn publish(&self, rules: Vec<PriceMarkup>) {
		self.snapshot.store(Arc::new(RuleSet::new(rules)));
	}

	/// Current snapshot.
	pub fn snapshot(&self) -> Arc<RuleSet> {
		self.snapshot.load_full()
	}

	pub fn calculate(&self, request: &MarkupRequest, now: DateTime<Utc>) -> MarkupQuote {
		self.snapshot.load().quote(request, now)
	}
}

/// Raw markup of a rule for `original_price`, clamped and rounded.
pub fn markup_amount(rule: &PriceMarkup, original_price: Decimal) -> Decimal {
	let raw = match rule.kind {
		MarkupKind::Fixed => rule.value,
		MarkupKind::Percentage => original_price * rule.value,
	};
	let mut amount = raw;
	if !rule.min_markup.is_zero() && amount < rule.min_markup {
		amount = rule.min_markup;
	}
	if !rule.max_markup.is_zero() && amount > rule.max_markup {
		amount = rule.max_markup;
	}
	round_money(amount)
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use chrono::TimeZone;

	pub fn epoch() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()
	}

	pub fn rule(id: u64, kind: MarkupKind, value: Decimal) -> PriceMarkup {
		PriceMarkup {
			id,
			name: format!("rule-{}", id),
			store_id: None,
			supplier_id: None,
			category_id: None,
			material_id: None,
			kind,
			value,
			min_markup: Decimal::ZERO,
			max_markup: Decimal::ZERO,
			specificity: 0,
			priority: 0,
			is_active: true,
			start_time: None,
			end_time: None,
			remark: None,
			created_at: epoch(),
			updated_at: epoch(),
		}
	}

	/// Recomputes specificity after the scoping fields were set.
	pub fn scoped(mut rule: PriceMarkup) -> PriceMarkup {
		rule.specificity = specificity(&rule);
		rule
	}
}
