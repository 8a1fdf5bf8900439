//! HTTP webhook transport.
//!
//! Posts the JSON payload to the destination URL with the event type and task
//! id repeated in headers so receivers can route and de-duplicate without
//! parsing the body.

use crate::{
	DeliveryError, DeliveryFactory, DeliveryInterface, DeliveryRegistry, DeliveryRequest,
	DeliveryResponse,
};
use async_trait::async_trait;
use orderhub_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use std::time::{Duration, Instant};

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Header carrying the task id.
pub const TASK_HEADER: &str = "X-Webhook-Task";

const DEFAULT_USER_AGENT: &str = concat!("orderhub-webhook/", env!("CARGO_PKG_VERSION"));
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// reqwest-based delivery.
pub struct HttpDelivery {
	client: reqwest::Client,
}

impl HttpDelivery {
	pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self, DeliveryError> {
		let client = reqwest::Client::builder()
			.user_agent(user_agent)
			.connect_timeout(connect_timeout)
			.build()
			.map_err(|e| DeliveryError::Configuration(e.to_string()))?;
		Ok(Self { client })
	}
}

/// Configuration schema for HttpDelivery.
pub struct HttpDeliverySchema;

impl ConfigSchema for HttpDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("user_agent", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(s) if !s.trim().is_empty() => Ok(()),
						_ => Err("user_agent cannot be empty".to_string()),
					}
				}),
				Field::new(
					"connect_timeout_seconds",
					FieldType::Integer {
						min: Some(1),
						max: Some(300),
					},
				),
			],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for HttpDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(HttpDeliverySchema)
	}

	async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
		let url = reqwest::Url::parse(&request.url)
			.map_err(|e| DeliveryError::InvalidRequest(format!("{}: {}", request.url, e)))?;
		let body = serde_json::to_vec(&request.body)
			.map_err(|e| DeliveryError::InvalidRequest(e.to_string()))?;

		let started = Instant::now();
		let response = self
			.client
			.post(url)
			.header(reqwest::header::CONTENT_TYPE, "application/json")
			.header(EVENT_HEADER, request.event_type.as_str())
			.header(TASK_HEADER, request.task_id.to_string())
			.body(body)
			.send()
			.await
			.map_err(|e| {
				if e.is_timeout() {
					DeliveryError::Timeout(started.elapsed().as_millis() as u64)
				} else {
					DeliveryError::Network(e.to_string())
				}
			})?;

		let status = response.status().as_u16();
		// An unreadable body still leaves a usable status code.
		let body = response.text().await.unwrap_or_default();
		let duration_ms = started.elapsed().as_millis() as u64;

		tracing::debug!(
			task_id = %request.task_id,
			event = %request.event_type,
			status,
			duration_ms,
			"Webhook attempt finished"
		);

		Ok(DeliveryResponse {
			status,
			body,
			duration_ms,
		})
	}
}

/// Factory function to create the HTTP delivery from configuration.
///
/// Configuration parameters:
/// - `user_agent`: User-Agent header value (optional)
/// - `connect_timeout_seconds`: TCP connect timeout (optional, default 5)
pub fn create_http_delivery(
	config: &toml::Value,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	HttpDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(format!("Invalid configuration: {}", e)))?;

	let user_agent = config
		.get("user_agent")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_USER_AGENT);
	let connect_timeout = config
		.get("connect_timeout_seconds")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECONDS);

	Ok(Box::new(HttpDelivery::new(
		user_agent,
		Duration::from_secs(connect_timeout),
	)?))
}

/// Registry for the HTTP delivery implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_http_delivery
	}
}

impl DeliveryRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{
		http::{HeaderMap, StatusCode},
		routing::post,
		Router,
	};
	use orderhub_types::{EventType, WebhookPayload};
	use uuid::Uuid;

	async fn spawn_receiver() -> String {
		async fn ok(headers: HeaderMap, body: String) -> (StatusCode, String) {
			let event = headers
				.get(EVENT_HEADER)
				.and_then(|v| v.to_str().ok())
				.unwrap_or_default()
				.to_string();
			let task_ok = headers.contains_key(TASK_HEADER);
			let json_ok = headers
				.get("content-type")
				.is_some_and(|v| v == "application/json");
			let parsed = serde_json::from_str::<serde_json::Value>(&body).is_ok();
			(
				StatusCode::CREATED,
				format!("{}|{}|{}|{}", event, task_ok, json_ok, parsed),
			)
		}

		let app = Router::new()
			.route("/ok", post(ok))
			.route(
				"/boom",
				post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
			);
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{}", addr)
	}

	fn request(url: String) -> DeliveryRequest {
		let task_id = Uuid::new_v4();
		DeliveryRequest {
			url,
			event_type: EventType::OrderConfirmed,
			task_id,
			body: WebhookPayload {
				task_id,
				event_type: EventType::OrderConfirmed,
				order_id: 7,
				order_no: "17000000000000007".into(),
				timestamp: 1_700_000_000,
				payload: serde_json::json!({ "status": "confirmed" }),
			},
		}
	}

	fn delivery() -> Box<dyn DeliveryInterface> {
		create_http_delivery(&toml::Value::Table(toml::map::Map::new())).unwrap()
	}

	#[tokio::test]
	async fn test_posts_json_with_headers() {
		let base = spawn_receiver().await;
		let response = delivery()
			.send(request(format!("{}/ok", base)))
			.await
			.unwrap();
		assert_eq!(response.status, 201);
		assert!(response.is_success());
		assert_eq!(response.body, "order.confirmed|true|true|true");
	}

	#[tokio::test]
	async fn test_error_status_is_returned_not_raised() {
		let base = spawn_receiver().await;
		let response = delivery()
			.send(request(format!("{}/boom", base)))
			.await
			.unwrap();
		assert_eq!(response.status, 500);
		assert!(!response.is_success());
		assert_eq!(response.body, "boom");
	}

	#[tokio::test]
	async fn test_invalid_url_rejected_before_sending() {
		let result = delivery().send(request("not a url".into())).await;
		assert!(matches!(result, Err(DeliveryError::InvalidRequest(_))));
	}

	#[test]
	fn test_schema_rejects_bad_timeout() {
		let config: toml::Value = toml::from_str("connect_timeout_seconds = 0").unwrap();
		assert!(create_http_delivery(&config).is_err());
	}
}
