//! Startup and shutdown of the order engine.

use super::{EngineError, OrderEngine};
use orderhub_types::Actor;

impl OrderEngine {
	/// Publishes the stored markup rules, restores missing webhook queue
	/// entries, and reports cancel requests that disagree with their orders.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(service_id = %self.config.service.id, "Initializing order engine");

		let rules = self.markup_handler.refresh().await?;
		tracing::info!(rules, "Markup rules loaded");

		self.dispatcher
			.rebuild_queue()
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;

		let inconsistencies = self
			.cancellation_handler
			.find_inconsistencies(&Actor::System)
			.await?;
		for found in &inconsistencies {
			tracing::warn!(
				request_id = found.request_id,
				order_id = found.order_id,
				kind = ?found.kind,
				"Cancel request inconsistent with its order"
			);
		}
		Ok(())
	}

	/// Runs a final outbox pass so tasks committed just before shutdown get
	/// one attempt.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down order engine");
		let report = self
			.dispatcher
			.drain_once()
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		if report.claimed > 0 {
			tracing::info!(delivered = report.succeeded, "Final webhook pass finished");
		}
		Ok(())
	}
}
