//! SKU catalog lookups used when pricing orders.

use crate::handlers::{require_admin, require_text};
use crate::EngineError;
use orderhub_storage::StorageService;
use orderhub_types::{Actor, SkuRecord, StorageKey};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct CatalogService {
	storage: Arc<StorageService>,
}

impl CatalogService {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn get_sku(&self, sku_id: u64) -> Result<SkuRecord, EngineError> {
		self.storage
			.find(StorageKey::Skus.as_str(), &sku_id.to_string())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.ok_or_else(|| EngineError::NotFound(format!("sku {}", sku_id)))
	}

	/// Creates or replaces a SKU. Administrators only.
	pub async fn upsert_sku(&self, actor: &Actor, sku: SkuRecord) -> Result<SkuRecord, EngineError> {
		require_admin(actor)?;
		require_text("name", &sku.name)?;
		if sku.base_price < Decimal::ZERO {
			return Err(EngineError::Validation(
				"base_price cannot be negative".into(),
			));
		}
		self.storage
			.store(StorageKey::Skus.as_str(), &sku.id.to_string(), &sku)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		tracing::info!(sku_id = sku.id, supplier_id = sku.supplier_id, "SKU saved");
		Ok(sku)
	}
}
