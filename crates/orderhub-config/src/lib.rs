//! Configuration module for the order hub.
//!
//! Configuration is read from TOML, environment references are resolved, and
//! the result is validated before any component is constructed.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Storage backend selection.
	pub storage: StorageConfig,
	/// Outbound webhook transport selection.
	pub delivery: DeliveryConfig,
	/// Order lifecycle parameters.
	#[serde(default)]
	pub order: OrderConfig,
	/// Notification retry and dispatcher parameters.
	#[serde(default)]
	pub webhook: WebhookConfig,
	/// HTTP API server.
	pub api: Option<ApiConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired storage entries.
	pub cleanup_interval_seconds: u64,
}

/// Configuration for the webhook transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of transport implementation names to their raw configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Order lifecycle parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderConfig {
	/// Self-service cancellation window, in minutes since creation.
	#[serde(
		default = "default_cancel_threshold_minutes",
		alias = "order_cancel_threshold"
	)]
	pub cancel_threshold_minutes: u64,
	/// Fraction of the goods amount charged as service fee.
	#[serde(default = "default_service_fee_rate")]
	pub service_fee_rate: Decimal,
	/// Grace period after which delivering orders complete automatically.
	#[serde(default = "default_auto_complete_days")]
	pub auto_complete_days: u64,
	/// How often the auto-complete sweep runs.
	#[serde(default = "default_auto_complete_interval_seconds")]
	pub auto_complete_interval_seconds: u64,
}

impl Default for OrderConfig {
	fn default() -> Self {
		Self {
			cancel_threshold_minutes: default_cancel_threshold_minutes(),
			service_fee_rate: default_service_fee_rate(),
			auto_complete_days: default_auto_complete_days(),
			auto_complete_interval_seconds: default_auto_complete_interval_seconds(),
		}
	}
}

fn default_cancel_threshold_minutes() -> u64 {
	60
}

fn default_service_fee_rate() -> Decimal {
	Decimal::new(3, 3)
}

fn default_auto_complete_days() -> u64 {
	7
}

fn default_auto_complete_interval_seconds() -> u64 {
	3600
}

/// Notification subsystem parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
	/// Attempts before a task is left in terminal `failed`.
	#[serde(default = "default_retry_times")]
	pub retry_times: u32,
	/// Delay between a failed attempt and the next one.
	#[serde(default = "default_retry_interval_minutes")]
	pub retry_interval_minutes: u64,
	/// How often the dispatcher polls for due tasks.
	#[serde(default = "default_poll_interval_seconds")]
	pub poll_interval_seconds: u64,
	/// Upper bound on in-flight deliveries.
	#[serde(default = "default_max_concurrent_deliveries")]
	pub max_concurrent_deliveries: usize,
	/// Claim lease; an unfinished claim becomes claimable again after it.
	#[serde(default = "default_lease_seconds")]
	pub lease_seconds: u64,
	/// Per-request timeout for outbound calls.
	#[serde(default = "default_webhook_timeout_seconds")]
	pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
	fn default() -> Self {
		Self {
			retry_times: default_retry_times(),
			retry_interval_minutes: default_retry_interval_minutes(),
			poll_interval_seconds: default_poll_interval_seconds(),
			max_concurrent_deliveries: default_max_concurrent_deliveries(),
			lease_seconds: default_lease_seconds(),
			timeout_seconds: default_webhook_timeout_seconds(),
		}
	}
}

fn default_retry_times() -> u32 {
	3
}

fn default_retry_interval_minutes() -> u64 {
	5
}

fn default_poll_interval_seconds() -> u64 {
	5
}

fn default_max_concurrent_deliveries() -> usize {
	16
}

fn default_lease_seconds() -> u64 {
	60
}

fn default_webhook_timeout_seconds() -> u64 {
	10
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			host: default_api_host(),
			port: default_api_port(),
			timeout_seconds: default_api_timeout(),
			max_request_size: default_max_request_size(),
		}
	}
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

fn default_api_timeout() -> u64 {
	30
}

fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)));
			},
		};
		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// API settings, falling back to defaults when the section is absent.
	pub fn api_or_default(&self) -> ApiConfig {
		self.api.clone().unwrap_or_default()
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.trim().is_empty() {
			return Err(ConfigError::Validation("service.id cannot be empty".into()));
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in storage.implementations",
				self.storage.primary
			)));
		}
		if !(1..=86400).contains(&self.storage.cleanup_interval_seconds) {
			return Err(ConfigError::Validation(
				"storage.cleanup_interval_seconds must be between 1 and 86400".into(),
			));
		}

		if !self
			.delivery
			.implementations
			.contains_key(&self.delivery.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary delivery '{}' not found in delivery.implementations",
				self.delivery.primary
			)));
		}

		let order = &self.order;
		check_range(
			"order.cancel_threshold_minutes",
			order.cancel_threshold_minutes,
			MAX_CANCEL_THRESHOLD_MINUTES,
		)?;
		if order.service_fee_rate < Decimal::ZERO || order.service_fee_rate >= Decimal::ONE {
			return Err(ConfigError::Validation(format!(
				"order.service_fee_rate must be within [0, 1), got {}",
				order.service_fee_rate
			)));
		}
		check_range(
			"order.auto_complete_days",
			order.auto_complete_days,
			MAX_AUTO_COMPLETE_DAYS,
		)?;
		check_range(
			"order.auto_complete_interval_seconds",
			order.auto_complete_interval_seconds,
			MAX_INTERVAL_SECONDS,
		)?;

		let webhook = &self.webhook;
		if !(1..=20).contains(&webhook.retry_times) {
			return Err(ConfigError::Validation(
				"webhook.retry_times must be between 1 and 20".into(),
			));
		}
		check_range(
			"webhook.retry_interval_minutes",
			webhook.retry_interval_minutes,
			MAX_RETRY_INTERVAL_MINUTES,
		)?;
		check_range(
			"webhook.poll_interval_seconds",
			webhook.poll_interval_seconds,
			MAX_INTERVAL_SECONDS,
		)?;
		check_range(
			"webhook.lease_seconds",
			webhook.lease_seconds,
			MAX_LEASE_SECONDS,
		)?;
		if webhook.max_concurrent_deliveries == 0 {
			return Err(ConfigError::Validation(
				"webhook.max_concurrent_deliveries must be greater than 0".into(),
			));
		}
		if webhook.timeout_seconds == 0 || webhook.timeout_seconds >= webhook.lease_seconds {
			return Err(ConfigError::Validation(format!(
				"webhook.timeout_seconds must be greater than 0 and below lease_seconds ({})",
				webhook.lease_seconds
			)));
		}

		if let Some(api) = &self.api {
			if api.enabled && api.port == 0 {
				return Err(ConfigError::Validation("api.port cannot be 0".into()));
			}
		}

		Ok(())
	}
}

/// Longest self-service cancellation window: 30 days.
const MAX_CANCEL_THRESHOLD_MINUTES: u64 = 43_200;
const MAX_AUTO_COMPLETE_DAYS: u64 = 365;
/// One week.
const MAX_RETRY_INTERVAL_MINUTES: u64 = 10_080;
/// One day.
const MAX_LEASE_SECONDS: u64 = 86_400;
const MAX_INTERVAL_SECONDS: u64 = 86_400;

/// Requires `1 <= value <= max`.
fn check_range(key: &str, value: u64, max: u64) -> Result<(), ConfigError> {
	if value == 0 || value > max {
		return Err(ConfigError::Validation(format!(
			"{} must be between 1 and {}, got {}",
			key, max, value
		)));
	}
	Ok(())
}

/// Parses and validates a configuration string. Environment references are
/// resolved first.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
