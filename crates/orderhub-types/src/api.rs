//! API types for the order hub HTTP surface.
//!
//! Request payloads are explicit per operation: every optional field maps to
//! one named, validated update. Errors are rendered as a structured
//! [`ErrorResponse`] with an HTTP status derived from the error kind.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AuditDecision, DeliverySnapshot};

/// One requested order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderItem {
	pub sku_id: u64,
	pub quantity: i64,
	/// Base price the client saw; rejected if it no longer matches the catalog.
	#[serde(default)]
	pub unit_price: Option<Decimal>,
	/// Marked-up price the client saw; rejected if it no longer matches.
	#[serde(default)]
	pub final_price: Option<Decimal>,
}

/// Request for submitting a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	pub supplier_id: u64,
	pub items: Vec<CreateOrderItem>,
	pub delivery: DeliverySnapshot,
}

/// Identity of a freshly created order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderResponse {
	pub order_id: u64,
	pub order_no: String,
}

/// Payment confirmation reported by the payment collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmPaymentRequest {
	pub method: String,
	pub reference: String,
}

/// Waybill registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentRequest {
	pub carrier: String,
	pub tracking_no: String,
}

/// Free-text reason attached to cancellation and cancel requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasonRequest {
	#[serde(default)]
	pub reason: String,
}

/// Admin resolution of a pending cancel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCancelRequest {
	pub decision: AuditDecision,
	#[serde(default)]
	pub remark: String,
}

/// Optional remark for operations that carry no other input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemarkRequest {
	#[serde(default)]
	pub remark: String,
}

/// Webhook endpoint registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterEndpointRequest {
	pub url: String,
	#[serde(default = "default_true")]
	pub enabled: bool,
}

fn default_true() -> bool {
	true
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed or missing input (400)
	BadRequest {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// Actor does not own or administer the target (403)
	Forbidden { error_type: String, message: String },
	/// Referenced entity does not exist (404)
	NotFound { error_type: String, message: String },
	/// Conflicting concurrent state, e.g. a pending cancel request (409)
	Conflict { error_type: String, message: String },
	/// Operation not legal from the current state (422)
	UnprocessableEntity {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
	},
	/// A dependency is unreachable (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::Forbidden { .. } => 403,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::UnprocessableEntity { .. } => 422,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error, message, details, retry_after) = match self {
			APIError::BadRequest {
				error_type,
				message,
				details,
			}
			| APIError::UnprocessableEntity {
				error_type,
				message,
				details,
			} => (error_type, message, details.clone(), None),
			APIError::Forbidden {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::Conflict {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message, None, None),
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => (error_type, message, None, *retry_after),
		};
		ErrorResponse {
			error: error.clone(),
			message: message.clone(),
			details,
			retry_after,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{} ({}): {}", response.error, self.status_code(), response.message)
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
