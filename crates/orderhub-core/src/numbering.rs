//! Order number generation.
//!
//! Numbers have the form `<unix-timestamp><6 digits>`. Generators only
//! propose numbers; uniqueness is enforced by the order handler, which
//! reserves each proposal in the order-number index and asks again on a
//! collision.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

const SUFFIX_RANGE: u64 = 1_000_000;

pub trait OrderNumberGenerator: Send + Sync {
	fn generate(&self, now: DateTime<Utc>) -> String;
}

/// Timestamp followed by a rolling six-digit counter.
///
/// The counter starts at a clock-derived offset so restarts within the same
/// second are unlikely to replay earlier suffixes.
pub struct TimestampNumberGenerator {
	counter: AtomicU64,
}

impl TimestampNumberGenerator {
	pub fn new() -> Self {
		let seed = u64::from(Utc::now().timestamp_subsec_micros());
		Self::starting_at(seed)
	}

	pub fn starting_at(seed: u64) -> Self {
		Self {
			counter: AtomicU64::new(seed % SUFFIX_RANGE),
		}
	}
}

impl Default for TimestampNumberGenerator {
	fn default() -> Self {
		Self::new()
	}
}

impl OrderNumberGenerator for TimestampNumberGenerator {
	fn generate(&self, now: DateTime<Utc>) -> String {
		let suffix = self.counter.fetch_add(1, Ordering::Relaxed) % SUFFIX_RANGE;
		format!("{}{:06}", now.timestamp(), suffix)
	}
}

/// Deterministic generator for tests: a fixed prefix and a counter.
pub struct SequentialNumberGenerator {
	prefix: String,
	next: AtomicU64,
}

impl SequentialNumberGenerator {
	pub fn new(prefix: impl Into<String>, start: u64) -> Self {
		Self {
			prefix: prefix.into(),
			next: AtomicU64::new(start),
		}
	}
}

impl OrderNumberGenerator for SequentialNumberGenerator {
	fn generate(&self, _now: DateTime<Utc>) -> String {
		let n = self.next.fetch_add(1, Ordering::Relaxed) % SUFFIX_RANGE;
		format!("{}{:06}", self.prefix, n)
	}
}
