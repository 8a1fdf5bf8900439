//! Markup rule administration and price preview.

use crate::apis::{api_error, ActingParty};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
};
use orderhub_types::{
	APIError, CreateMarkupRequest, MarkupQuote, MarkupRequest, PriceMarkup, UpdateMarkupRequest,
};

/// Handles POST /api/markups/calculate.
///
/// Open to every authenticated party; the quote only reflects published
/// rules and never changes state.
pub async fn calculate(
	State(state): State<AppState>,
	ActingParty(_actor): ActingParty,
	Json(request): Json<MarkupRequest>,
) -> Result<Json<MarkupQuote>, APIError> {
	state
		.engine
		.markups()
		.preview(&request)
		.map(Json)
		.map_err(api_error)
}

pub async fn list_rules(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
) -> Result<Json<Vec<PriceMarkup>>, APIError> {
	state
		.engine
		.markups()
		.list(&actor)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn get_rule(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<PriceMarkup>, APIError> {
	state
		.engine
		.markups()
		.get(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn create_rule(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Json(request): Json<CreateMarkupRequest>,
) -> Result<(StatusCode, Json<PriceMarkup>), APIError> {
	let rule = state
		.engine
		.markups()
		.create(&actor, request)
		.await
		.map_err(api_error)?;
	Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn update_rule(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(update): Json<UpdateMarkupRequest>,
) -> Result<Json<PriceMarkup>, APIError> {
	state
		.engine
		.markups()
		.update(id, &actor, update)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn toggle_rule(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<PriceMarkup>, APIError> {
	state
		.engine
		.markups()
		.toggle(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn delete_rule(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<StatusCode, APIError> {
	state
		.engine
		.markups()
		.delete(id, &actor)
		.await
		.map_err(api_error)?;
	Ok(StatusCode::NO_CONTENT)
}
