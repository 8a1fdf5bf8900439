//! Automatic completion of long-running deliveries.
//!
//! Orders that stay in `delivering` beyond the grace period are completed by
//! the system actor, exactly as if the supplier had completed them.

use crate::handlers::OrderHandler;
use crate::EngineError;
use chrono::Duration;
use orderhub_types::Actor;
use std::sync::Arc;
use tracing::instrument;

pub struct AutoCompleteMonitor {
	orders: Arc<OrderHandler>,
	grace: Duration,
}

impl AutoCompleteMonitor {
	pub fn new(orders: Arc<OrderHandler>, grace: Duration) -> Self {
		Self { orders, grace }
	}

	/// Completes every overdue delivery and returns how many were completed.
	///
	/// An order that moved on between the scan and its transition is skipped.
	#[instrument(skip_all)]
	pub async fn sweep_once(&self) -> Result<usize, EngineError> {
		let remark = format!("auto-completed after {} days in delivery", self.grace.num_days());
		let mut completed = 0;
		for order_id in self.orders.overdue_deliveries(self.grace).await? {
			match self.orders.complete(order_id, &Actor::System, &remark).await {
				Ok(_) => completed += 1,
				Err(EngineError::InvalidState(reason)) | Err(EngineError::NotFound(reason)) => {
					tracing::debug!(order_id, %reason, "Skipped auto-completion");
				},
				Err(e) => {
					tracing::warn!(order_id, error = %e, "Auto-completion failed");
				},
			}
		}
		if completed > 0 {
			tracing::info!(completed, "Auto-completed overdue deliveries");
		}
		Ok(completed)
	}
}
