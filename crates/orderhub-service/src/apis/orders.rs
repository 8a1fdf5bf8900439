//! Order endpoints: creation, reads, payment and fulfilment transitions.

use crate::apis::{api_error, ActingParty};
use crate::server::AppState;
use axum::{
	extract::{Path, State},
	http::StatusCode,
	response::Json,
};
use orderhub_types::{
	APIError, ConfirmPaymentRequest, CreateOrderRequest, CreateOrderResponse, Order,
	OrderStatusLog, RemarkRequest, Shipment, ShipmentRequest,
};

/// Handles POST /api/orders.
pub async fn create_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), APIError> {
	let order = state
		.engine
		.orders()
		.create(&actor, request)
		.await
		.map_err(api_error)?;
	Ok((
		StatusCode::CREATED,
		Json(CreateOrderResponse {
			order_id: order.id,
			order_no: order.order_no,
		}),
	))
}

/// Handles GET /api/orders/{id}.
pub async fn get_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.orders()
		.get(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles DELETE /api/orders/{id}: archives a finished order.
pub async fn archive_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<StatusCode, APIError> {
	state
		.engine
		.orders()
		.archive(id, &actor)
		.await
		.map_err(api_error)?;
	Ok(StatusCode::NO_CONTENT)
}

pub async fn get_logs(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<Vec<OrderStatusLog>>, APIError> {
	state
		.engine
		.orders()
		.logs(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Handles POST /api/orders/{id}/payment, reported by the payment callback.
pub async fn confirm_payment(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<Order>, APIError> {
	state
		.engine
		.orders()
		.confirm_payment(id, &actor, request)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn confirm_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	body: Option<Json<RemarkRequest>>,
) -> Result<Json<Order>, APIError> {
	let remark = remark_of(body);
	state
		.engine
		.orders()
		.confirm(id, &actor, &remark)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn register_shipment(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	Json(request): Json<ShipmentRequest>,
) -> Result<Json<Shipment>, APIError> {
	state
		.engine
		.orders()
		.register_shipment(id, &actor, request)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn get_shipment(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
) -> Result<Json<Shipment>, APIError> {
	state
		.engine
		.orders()
		.shipment(id, &actor)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn start_delivery(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	body: Option<Json<RemarkRequest>>,
) -> Result<Json<Order>, APIError> {
	let remark = remark_of(body);
	state
		.engine
		.orders()
		.start_delivery(id, &actor, &remark)
		.await
		.map(Json)
		.map_err(api_error)
}

pub async fn complete_order(
	State(state): State<AppState>,
	ActingParty(actor): ActingParty,
	Path(id): Path<u64>,
	body: Option<Json<RemarkRequest>>,
) -> Result<Json<Order>, APIError> {
	let remark = remark_of(body);
	state
		.engine
		.orders()
		.complete(id, &actor, &remark)
		.await
		.map(Json)
		.map_err(api_error)
}

/// Transitions that carry only an optional remark accept an empty body.
fn remark_of(body: Option<Json<RemarkRequest>>) -> String {
	body.map(|Json(request)| request.remark).unwrap_or_default()
}
