//! Cancellation endpoints: direct cancel, cancel requests and their audit.

use crate::apis::{api_error, ActingParty};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
};
use orderhub_types::{
	APIError, AuditCancelRequest, Inconsistency, Order, OrderCancelRequest, ReasonRequest,
	RemarkRequest,
};

/// Handles POST /api/orders/{id}/cancel.
pub async fn cancel_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(request): Json<ReasonRequest>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.cancellations()
		.cancel(id, &actor, &request.reason)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles POST /api/orders/{id}/cancel-requests.
pub async fn submit_request(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(request): Json<ReasonRequest>,
) -> Result<(StatusCode, Json<OrderCancelRequest>), APIError> {
	let request = state
		.engine
		.cancellations()
		.submit_request(id, &actor, &request.reason)
		.await
		.map_err(api_error)?;
	Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<Vec<OrderCancelRequest>>, APIError> {
	state
		.engine
		.cancellations()
		.list_requests(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles GET /api/cancel-requests: every pending request, for review.
pub async fn pending_requests(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
) -> Result<Json<Vec<OrderCancelRequest>>, APIError> {
	state
		.engine
		.cancellations()
		.pending_requests(&actor)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn inconsistencies(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
) -> Result<Json<Vec<Inconsistency>>, APIError> {
	state
		.engine
		.cancellations()
		.find_inconsistencies(&actor)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles POST /api/cancel-requests/{id}/audit.
pub async fn audit_request(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(audit): Json<AuditCancelRequest>,
) -> Result<Json<OrderCancelRequest>, APIError> {
	state
		.engine
		.cancellations()
		.audit(id, &actor, audit)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles POST /api/orders/{id}/restore.
pub async fn restore_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	body: Option<Json<RemarkRequest>>,
) -> Result<Json<Order>, APIError> {
	let remark = body.map(|Json(r)| r.remark).unwrap_or_default();
	state
		.engine
		.cancellations()
		.restore(id, &actor, &remark)
		.await
		.map(Json)
		.map_err(api_error)
}
