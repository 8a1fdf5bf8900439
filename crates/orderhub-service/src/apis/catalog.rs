//! SKU catalog maintenance.

use crate::apis::{api_error, bad_request, ActingParty};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	response::Json,
};
use orderhub_types::{APIError, SkuRecord};

/// Handles PUT /api/catalog/skus/{id}. The path id wins over the body.
pub async fn upsert_sku(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(mut sku): Json<SkuRecord>,
) -> Result<Json<SkuRecord>, APIError> {
	if sku.id != 0 && sku.id != id {
		return Err(bad_request(format!(
			"sku id {} in body does not match path id {}",
			sku.id, id
		)));
	}
	sku.id = id;
	state
		.engine
		.catalog()
		.upsert_sku(&actor, sku)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn get_sku(
	State(state): State<AppState>,
	ActingParty(_actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<SkuRecord>, APIError> {
	state
		.engine
		.catalog()
		.get_sku(id)
		.await
		.map(Json)
		.map_err(api_error)
}
