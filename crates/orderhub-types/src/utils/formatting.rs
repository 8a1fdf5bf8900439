//! String and amount formatting helpers.

use rust_decimal::{Decimal, RoundingStrategy};

/// Shortens an identifier for log fields.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.chars().count() <= 8 {
		id.to_string()
	} else {
		format!("{}..", id.chars().take(8).collect::<String>())
	}
}

/// Keeps at most `max` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
	match s.char_indices().nth(max) {
		Some((idx, _)) => s[..idx].to_string(),
		None => s.to_string(),
	}
}

/// Rounds a monetary amount to two decimal places, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
	amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(truncate_id("123456789"), "12345678..");
		assert_eq!(truncate_id("a7c2e9f0-1111-2222"), "a7c2e9f0..");
	}

	#[test]
	fn test_truncate_chars_respects_char_boundaries() {
		assert_eq!(truncate_chars("héllo", 2), "hé");
		assert_eq!(truncate_chars("ok", 10), "ok");
	}

	#[test]
	fn test_round_money() {
		assert_eq!(round_money(Decimal::new(3005, 3)), Decimal::new(301, 2));
		assert_eq!(round_money(Decimal::new(3004, 3)), Decimal::new(300, 2));
		assert_eq!(round_money(Decimal::new(1000, 0) * Decimal::new(3, 3)), Decimal::new(300, 2));
	}
}
