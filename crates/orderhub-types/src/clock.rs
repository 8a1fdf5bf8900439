//! Time source abstraction.
//!
//! Time-windowed guards (self-cancel threshold, auto-complete grace period,
//! retry scheduling) read the clock through this trait so tests can pin it.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
	now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			now: Arc::new(Mutex::new(start)),
		}
	}

	pub fn set(&self, to: DateTime<Utc>) {
		if let Ok(mut now) = self.now.lock() {
			*now = to;
		}
	}

	pub fn advance(&self, by: Duration) {
		if let Ok(mut now) = self.now.lock() {
			*now += by;
		}
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		match self.now.lock() {
			Ok(now) => *now,
			Err(poisoned) => *poisoned.into_inner(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_manual_clock_shared_between_clones() {
		let start = Utc::now();
		let clock = ManualClock::new(start);
		let handle = clock.clone();
		handle.advance(Duration::minutes(61));
		assert_eq!(clock.now(), start + Duration::minutes(61));
	}
}
