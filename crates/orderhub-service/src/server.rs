//! HTTP server for the order hub API.
//!
//! Builds the axum router over a shared [`OrderEngine`] and serves it on the
//! configured address. Request tracing, permissive CORS, a body size limit
//! and a request timeout are applied to every route.

use crate::apis::{cancel, catalog, markups, orders, webhooks};
use axum::{
	extract::DefaultBodyLimit,
	response::Json,
	routing::{get, post, put},
	Router,
};
use orderhub_config::ApiConfig;
use orderhub_core::OrderEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<OrderEngine>,
}

/// Starts the HTTP server and serves until the listener fails.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<OrderEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(AppState { engine }, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!(address = %bind_address, "Order hub API server starting");

	axum::serve(listener, app).await?;
	Ok(())
}

/// Route table of the API.
pub fn router(state: AppState, api_config: &ApiConfig) -> Router {
	let api = Router::new()
		.route("/orders", post(orders::create_order))
		.route(
			"/orders/{id}",
			get(orders::get_order).delete(orders::archive_order),
		)
		.route("/orders/{id}/logs", get(orders::get_logs))
		.route("/orders/{id}/payment", post(orders::confirm_payment))
		.route("/orders/{id}/confirm", post(orders::confirm_order))
		.route(
			"/orders/{id}/shipment",
			post(orders::register_shipment).get(orders::get_shipment),
		)
		.route("/orders/{id}/deliver", post(orders::start_delivery))
		.route("/orders/{id}/complete", post(orders::complete_order))
		.route("/orders/{id}/cancel", post(cancel::cancel_order))
		.route(
			"/orders/{id}/cancel-requests",
			post(cancel::submit_request).get(cancel::list_requests),
		)
		.route("/orders/{id}/restore", post(cancel::restore_order))
		.route("/cancel-requests", get(cancel::pending_requests))
		.route(
			"/cancel-requests/inconsistencies",
			get(cancel::inconsistencies),
		)
		.route("/cancel-requests/{id}/audit", post(cancel::audit_request))
		.route("/markups/calculate", post(markups::calculate))
		.route(
			"/markups",
			get(markups::list_rules).post(markups::create_rule),
		)
		.route(
			"/markups/{id}",
			get(markups::get_rule)
				.put(markups::update_rule)
				.delete(markups::delete_rule),
		)
		.route("/markups/{id}/toggle", post(markups::toggle_rule))
		.route(
			"/webhooks/endpoints/{kind}/{id}",
			put(webhooks::register_endpoint).get(webhooks::get_endpoint),
		)
		.route("/webhooks/logs", get(webhooks::list_tasks))
		.route("/webhooks/logs/{id}/retry", post(webhooks::retry_task))
		.route(
			"/catalog/skus/{id}",
			put(catalog::upsert_sku).get(catalog::get_sku),
		);

	Router::new()
		.route("/health", get(health))
		.nest("/api", api)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(TimeoutLayer::new(Duration::from_secs(
					api_config.timeout_seconds.max(1),
				)))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(state)
}

async fn health() -> Json<Value> {
	Json(json!({ "status": "ok" }))
}
