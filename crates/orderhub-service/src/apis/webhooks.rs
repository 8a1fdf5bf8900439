//! Webhook endpoint registration and delivery task administration.

use crate::apis::{api_error, bad_request, ActingParty};
use crate::server::AppState;
use axum::{
	extract::{Path, Query, State},
	response::Json,
};
use orderhub_types::{
	APIError, RegisterEndpointRequest, TargetKind, WebhookEndpoint, WebhookLog, WebhookStatus,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct TaskFilter {
	pub status: Option<String>,
	/// Only failed tasks with no retries left.
	#[serde(default)]
	pub exhausted: bool,
}

/// Handles PUT /api/webhooks/endpoints/{kind}/{id}.
pub async fn register_endpoint(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path((kind, id)): Path<(String, u64)>,
	Json(request): Json<RegisterEndpointRequest>,
) -> Result<Json<WebhookEndpoint>, APIError> {
	let kind = kind.parse::<TargetKind>().map_err(bad_request)?;
	state
		.engine
		.webhooks()
		.register_endpoint(&actor, kind, id, request)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn get_endpoint(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path((kind, id)): Path<(String, u64)>,
) -> Result<Json<WebhookEndpoint>, APIError> {
	let kind = kind.parse::<TargetKind>().map_err(bad_request)?;
	state
		.engine
		.webhooks()
		.endpoint(&actor, kind, id)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles GET /api/webhooks/logs?status=..&exhausted=..
pub async fn list_tasks(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<WebhookLog>>, APIError> {
	let webhooks = state.engine.webhooks();
	if filter.exhausted {
		return webhooks
			.list_exhausted(&actor)
			.await
			.map(Json)
			.map_err(api_error);
	}
	let status = filter
		.status
		.as_deref()
		.map(str::parse::<WebhookStatus>)
		.transpose()
		.map_err(bad_request)?;
	webhooks
		.list_tasks(&actor, status)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles POST /api/webhooks/logs/{id}/retry.
pub async fn retry_task(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<WebhookLog>, APIError> {
	state
		.engine
		.webhooks()
		.requeue(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}
