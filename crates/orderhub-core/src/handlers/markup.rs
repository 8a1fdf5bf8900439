//! Markup rule administration and price preview.
//!
//! Rules are persisted one record per id. After every change the full set
//! is reloaded and published to the [`MarkupService`] as a new snapshot, so
//! in-flight calculations keep using the snapshot they started with.

use crate::engine::event_bus::EventBus;
use crate::handlers::require_admin;
use crate::EngineError;
use orderhub_markup::{specificity, validate_rule, MarkupService};
use orderhub_storage::StorageService;
use orderhub_types::{
	Actor, Clock, CreateMarkupRequest, EngineEvent, MarkupQuote, MarkupRequest, PriceMarkup,
	StorageKey, UpdateMarkupRequest,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

pub struct MarkupHandler {
	storage: Arc<StorageService>,
	markup: Arc<MarkupService>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
}

impl MarkupHandler {
	pub fn new(
		storage: Arc<StorageService>,
		markup: Arc<MarkupService>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self {
			storage,
			markup,
			event_bus,
			clock,
		}
	}

	/// Reloads every stored rule and publishes them as the active snapshot.
	///
	/// Returns the number of published rules.
	pub async fn refresh(&self) -> Result<usize, EngineError> {
		let rules = self.load_all().await?;
		let count = rules.len();
		self.markup.publish(rules);
		tracing::debug!(rules = count, "Markup rules published");
		self.event_bus
			.publish(EngineEvent::MarkupRulesChanged { active_rules: count });
		Ok(count)
	}

	/// All rules ordered by id.
	pub async fn list(&self, actor: &Actor) -> Result<Vec<PriceMarkup>, EngineError> {
		require_admin(actor)?;
		self.load_all().await
	}

	pub async fn get(&self, rule_id: u64, actor: &Actor) -> Result<PriceMarkup, EngineError> {
		require_admin(actor)?;
		self.load(rule_id).await
	}

	#[instrument(skip_all, fields(name = %request.name))]
	pub async fn create(
		&self,
		actor: &Actor,
		request: CreateMarkupRequest,
	) -> Result<PriceMarkup, EngineError> {
		require_admin(actor)?;
		let now = self.clock.now();
		let id = self
			.storage
			.next_sequence(StorageKey::MarkupRules.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		let mut rule = PriceMarkup {
			id,
			name: request.name,
			store_id: request.store_id,
			supplier_id: request.supplier_id,
			category_id: request.category_id,
			material_id: request.material_id,
			kind: request.kind,
			value: request.value,
			min_markup: request.min_markup,
			max_markup: request.max_markup,
			specificity: 0,
			priority: request.priority,
			is_active: request.is_active,
			start_time: request.start_time,
			end_time: request.end_time,
			remark: request.remark,
			created_at: now,
			updated_at: now,
		};
		rule.specificity = specificity(&rule);
		validate_rule(&rule).map_err(|e| EngineError::Validation(e.to_string()))?;

		self.save(&rule).await?;
		tracing::info!(rule_id = id, specificity = rule.specificity, "Markup rule created");
		self.refresh().await?;
		Ok(rule)
	}

	pub async fn update(
		&self,
		rule_id: u64,
		actor: &Actor,
		update: UpdateMarkupRequest,
	) -> Result<PriceMarkup, EngineError> {
		require_admin(actor)?;
		let mut rule = self.load(rule_id).await?;
		rule.apply_update(update);
		rule.specificity = specificity(&rule);
		rule.updated_at = self.clock.now();
		validate_rule(&rule).map_err(|e| EngineError::Validation(e.to_string()))?;

		self.save(&rule).await?;
		tracing::info!(rule_id, specificity = rule.specificity, "Markup rule updated");
		self.refresh().await?;
		Ok(rule)
	}

	/// Flips the active flag.
	pub async fn toggle(&self, rule_id: u64, actor: &Actor) -> Result<PriceMarkup, EngineError> {
		require_admin(actor)?;
		let mut rule = self.load(rule_id).await?;
		rule.is_active = !rule.is_active;
		rule.updated_at = self.clock.now();
		self.save(&rule).await?;
		tracing::info!(rule_id, active = rule.is_active, "Markup rule toggled");
		self.refresh().await?;
		Ok(rule)
	}

	/// Deletes a rule. Active rules must be deactivated first.
	pub async fn delete(&self, rule_id: u64, actor: &Actor) -> Result<(), EngineError> {
		require_admin(actor)?;
		let rule = self.load(rule_id).await?;
		if rule.is_active {
			return Err(EngineError::InvalidState(format!(
				"markup rule {} is active; deactivate it before deleting",
				rule_id
			)));
		}
		self.storage
			.remove(StorageKey::MarkupRules.as_str(), &rule_id.to_string())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		tracing::info!(rule_id, "Markup rule deleted");
		self.refresh().await?;
		Ok(())
	}

	/// Quotes a price against the published snapshot.
	pub fn preview(&self, request: &MarkupRequest) -> Result<MarkupQuote, EngineError> {
		if request.original_price < Decimal::ZERO {
			return Err(EngineError::Validation(
				"original_price cannot be negative".into(),
			));
		}
		Ok(self.markup.calculate(request, self.clock.now()))
	}

	async fn load(&self, rule_id: u64) -> Result<PriceMarkup, EngineError> {
		self.storage
			.find(StorageKey::MarkupRules.as_str(), &rule_id.to_string())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.ok_or_else(|| EngineError::NotFound(format!("markup rule {}", rule_id)))
	}

	async fn load_all(&self) -> Result<Vec<PriceMarkup>, EngineError> {
		let mut rules: Vec<PriceMarkup> = self
			.storage
			.retrieve_all(StorageKey::MarkupRules.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, rule)| rule)
			.collect();
		rules.sort_by_key(|rule| rule.id);
		Ok(rules)
	}

	async fn save(&self, rule: &PriceMarkup) -> Result<(), EngineError> {
		self.storage
			.store(StorageKey::MarkupRules.as_str(), &rule.id.to_string(), rule)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))
	}
}
