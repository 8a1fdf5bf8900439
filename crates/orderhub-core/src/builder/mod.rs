//! Builder for assembling an [`OrderEngine`] from configured backends.
//!
//! Storage and delivery implementations are looked up by name in factory
//! maps and created from their configuration tables. Only the configured
//! primary of each is constructed; every other entry is ignored.

use crate::engine::{event_bus::EventBus, OrderEngine};
use crate::numbering::{OrderNumberGenerator, TimestampNumberGenerator};
use orderhub_config::Config;
use orderhub_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use orderhub_storage::{StorageError, StorageInterface, StorageService};
use orderhub_types::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory maps keyed by implementation name.
pub struct EngineFactories<SF, DF> {
	pub storage_factories: HashMap<String, SF>,
	pub delivery_factories: HashMap<String, DF>,
}

pub struct EngineBuilder {
	config: Config,
	clock: Arc<dyn Clock>,
	numbers: Option<Arc<dyn OrderNumberGenerator>>,
	event_capacity: usize,
}

impl EngineBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: Arc::new(SystemClock),
			numbers: None,
			event_capacity: crate::engine::event_bus::DEFAULT_CAPACITY,
		}
	}

	/// Replaces the wall clock, e.g. with a manual clock in tests.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn with_number_generator(mut self, numbers: Arc<dyn OrderNumberGenerator>) -> Self {
		self.numbers = Some(numbers);
		self
	}

	pub fn with_event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	/// Creates the configured primary storage and delivery implementations
	/// and assembles the engine around them.
	pub fn build<SF, DF>(self, factories: EngineFactories<SF, DF>) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		DF: Fn(&toml::Value) -> Result<Box<dyn DeliveryInterface>, DeliveryError>,
	{
		let storage = create_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
		)?;
		let delivery = create_primary(
			"delivery",
			&self.config.delivery.primary,
			&self.config.delivery.implementations,
			&factories.delivery_factories,
		)?;
		Ok(self.build_with(storage, delivery))
	}

	/// Assembles the engine around already constructed backends.
	pub fn build_with(
		self,
		storage: Box<dyn StorageInterface>,
		delivery: Box<dyn DeliveryInterface>,
	) -> OrderEngine {
		let storage = Arc::new(StorageService::new(storage));
		let delivery = Arc::new(DeliveryService::new(
			delivery,
			Duration::from_secs(self.config.webhook.timeout_seconds),
		));
		let numbers = self
			.numbers
			.unwrap_or_else(|| Arc::new(TimestampNumberGenerator::new()));
		OrderEngine::new(
			self.config,
			storage,
			delivery,
			self.clock,
			numbers,
			EventBus::new(self.event_capacity),
		)
	}
}

fn create_primary<T: ?Sized, E: std::fmt::Display, F>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<T>, BuilderError>
where
	F: Fn(&toml::Value) -> Result<Box<T>, E>,
{
	let config = implementations.get(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"{} implementation '{}' has no configuration table",
			component, primary
		))
	})?;
	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"{} implementation '{}' is not registered",
			component, primary
		))
	})?;
	match factory(config) {
		Ok(implementation) => {
			tracing::info!(component, implementation = %primary, "Loaded");
			Ok(implementation)
		},
		Err(e) => {
			tracing::error!(
				component,
				implementation = %primary,
				error = %e,
				"Failed to create implementation"
			);
			Err(BuilderError::Config(format!(
				"Failed to create {} implementation '{}': {}",
				component, primary, e
			)))
		},
	}
}
