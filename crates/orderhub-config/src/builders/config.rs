//! Configuration builder for test and development configurations.

use crate::{
	ApiConfig, Config, DeliveryConfig, OrderConfig, ServiceConfig, StorageConfig, WebhookConfig,
};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults to the in-memory storage backend and the http transport with
/// an empty implementation table each.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	storage_cleanup_interval_seconds: u64,
	delivery_primary: String,
	delivery_implementations: HashMap<String, toml::Value>,
	order: OrderConfig,
	webhook: WebhookConfig,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			service_id: "orderhub-test".to_string(),
			storage_primary: "memory".to_string(),
			storage_implementations: HashMap::from([("memory".to_string(), empty_table())]),
			storage_cleanup_interval_seconds: 60,
			delivery_primary: "http".to_string(),
			delivery_implementations: HashMap::from([("http".to_string(), empty_table())]),
			order: OrderConfig::default(),
			webhook: WebhookConfig::default(),
			api: None,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	/// Selects a storage backend and its raw configuration table.
	pub fn storage(mut self, primary: impl Into<String>, config: toml::Value) -> Self {
		let primary = primary.into();
		self.storage_implementations.insert(primary.clone(), config);
		self.storage_primary = primary;
		self
	}

	pub fn storage_cleanup_interval_seconds(mut self, interval: u64) -> Self {
		self.storage_cleanup_interval_seconds = interval;
		self
	}

	pub fn cancel_threshold_minutes(mut self, minutes: u64) -> Self {
		self.order.cancel_threshold_minutes = minutes;
		self
	}

	pub fn service_fee_rate(mut self, rate: Decimal) -> Self {
		self.order.service_fee_rate = rate;
		self
	}

	pub fn auto_complete_days(mut self, days: u64) -> Self {
		self.order.auto_complete_days = days;
		self
	}

	pub fn webhook_retry(mut self, retry_times: u32, retry_interval_minutes: u64) -> Self {
		self.webhook.retry_times = retry_times;
		self.webhook.retry_interval_minutes = retry_interval_minutes;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: self.storage_cleanup_interval_seconds,
			},
			delivery: DeliveryConfig {
				primary: self.delivery_primary,
				implementations: self.delivery_implementations,
			},
			order: self.order,
			webhook: self.webhook,
			api: self.api,
		}
	}
}
