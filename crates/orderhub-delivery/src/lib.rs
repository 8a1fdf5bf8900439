//! Webhook delivery module for the order hub.
//!
//! This module sends webhook requests to store and supplier endpoints. The
//! transport sits behind [`DeliveryInterface`] so the dispatcher can be
//! exercised without a network. Retry policy is not a concern here: a single
//! call performs a single attempt and reports what happened.

use async_trait::async_trait;
use orderhub_types::{ConfigSchema, EventType, ImplementationRegistry, WebhookLog, WebhookPayload};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Re-export implementations
pub mod implementations {
	pub mod http;
}

/// Errors that can occur while attempting a delivery.
///
/// A non-2xx response is not an error at this layer; it is returned as a
/// [`DeliveryResponse`] and judged by the caller.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// The request could not be sent or the connection failed.
	#[error("Network error: {0}")]
	Network(String),
	/// No response arrived within the allotted time.
	#[error("Request timed out after {0} ms")]
	Timeout(u64),
	/// The request was malformed before sending (bad URL, unserializable body).
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	/// Error in implementation configuration.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// One outbound webhook request.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRequest {
	pub url: String,
	pub event_type: EventType,
	pub task_id: Uuid,
	pub body: WebhookPayload,
}

impl DeliveryRequest {
	/// Builds the request for a stored task, reusing its body snapshot.
	pub fn from_task(task: &WebhookLog) -> Self {
		Self {
			url: task.url.clone(),
			event_type: task.event_type,
			task_id: task.task_id,
			body: task.request_body.clone(),
		}
	}
}

/// What the destination answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
	pub status: u16,
	pub body: String,
	pub duration_ms: u64,
}

impl DeliveryResponse {
	/// Only 2xx counts as delivered.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Trait defining the interface for webhook transports.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Returns the configuration schema for this delivery implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Performs one delivery attempt.
	async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError>;
}

/// Type alias for delivery factory functions.
pub type DeliveryFactory = fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError>;

/// Registry trait for delivery implementations.
pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

/// Get all registered delivery implementations.
pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::http;

	vec![(http::Registry::NAME, http::Registry::factory())]
}

/// Wraps the configured transport with an upper bound on attempt time.
///
/// The bound applies regardless of what the transport does internally, so a
/// hung destination always surfaces as [`DeliveryError::Timeout`].
pub struct DeliveryService {
	implementation: Box<dyn DeliveryInterface>,
	timeout: Duration,
}

impl DeliveryService {
	pub fn new(implementation: Box<dyn DeliveryInterface>, timeout: Duration) -> Self {
		Self {
			implementation,
			timeout,
		}
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Delivers a request, bounded by the configured timeout.
	pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
		let started = Instant::now();
		let task_id = request.task_id;
		match tokio::time::timeout(self.timeout, self.implementation.send(request)).await {
			Ok(result) => result,
			Err(_) => {
				let elapsed = started.elapsed().as_millis() as u64;
				tracing::debug!(%task_id, elapsed_ms = elapsed, "Webhook attempt timed out");
				Err(DeliveryError::Timeout(elapsed))
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderhub_types::{Schema, ValidationError};

	struct Stalled;

	struct NoSchema;

	impl ConfigSchema for NoSchema {
		fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
			Schema::new(vec![], vec![]).validate(config)
		}
	}

	#[async_trait]
	impl DeliveryInterface for Stalled {
		fn config_schema(&self) -> Box<dyn ConfigSchema> {
			Box::new(NoSchema)
		}

		async fn send(&self, _request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
			tokio::time::sleep(Duration::from_secs(60)).await;
			Ok(DeliveryResponse {
				status: 200,
				body: String::new(),
				duration_ms: 60_000,
			})
		}
	}

	fn request() -> DeliveryRequest {
		let task_id = Uuid::new_v4();
		DeliveryRequest {
			url: "http://127.0.0.1:1/hook".into(),
			event_type: EventType::OrderCreated,
			task_id,
			body: WebhookPayload {
				task_id,
				event_type: EventType::OrderCreated,
				order_id: 1,
				order_no: "17000000000000001".into(),
				timestamp: 1_700_000_000,
				payload: serde_json::json!({}),
			},
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_stalled_transport_times_out() {
		let service = DeliveryService::new(Box::new(Stalled), Duration::from_secs(5));
		let result = service.deliver(request()).await;
		assert!(matches!(result, Err(DeliveryError::Timeout(_))));
	}

	#[test]
	fn test_success_is_2xx_only() {
		let response = |status| DeliveryResponse {
			status,
			body: String::new(),
			duration_ms: 1,
		};
		assert!(response(200).is_success());
		assert!(response(204).is_success());
		assert!(!response(302).is_success());
		assert!(!response(500).is_success());
	}
}
