//! Request handlers for the order hub HTTP API.
//!
//! Every handler resolves the acting party from the `X-Actor-Kind` and
//! `X-Actor-Id` headers, delegates to the engine and converts engine errors
//! into structured [`APIError`] responses.

use axum::{extract::FromRequestParts, http::request::Parts};
use orderhub_core::EngineError;
use orderhub_types::{APIError, Actor, ActorKind};

pub mod cancel;
pub mod catalog;
pub mod markups;
pub mod orders;
pub mod webhooks;

pub const ACTOR_KIND_HEADER: &str = "x-actor-kind";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Suggested client back-off when a dependency is unavailable.
const TRANSIENT_RETRY_AFTER_SECONDS: u64 = 30;

/// The party performing the request.
#[derive(Debug, Clone, Copy)]
pub struct ActingParty(pub Actor);

impl<S> FromRequestParts<S> for ActingParty
where
	S: Send + Sync,
{
	type Rejection = APIError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let kind = header(parts, ACTOR_KIND_HEADER)?
			.parse::<ActorKind>()
			.map_err(bad_actor)?;
		let id = match kind {
			ActorKind::System => 0,
			ActorKind::Store | ActorKind::Supplier | ActorKind::Admin => {
				header(parts, ACTOR_ID_HEADER)?
					.parse::<u64>()
					.map_err(|e| bad_actor(format!("invalid {}: {}", ACTOR_ID_HEADER, e)))?
			},
		};
		Ok(ActingParty(Actor::new(kind, id)))
	}
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, APIError> {
	parts
		.headers
		.get(name)
		.ok_or_else(|| bad_actor(format!("missing {} header", name)))?
		.to_str()
		.map(str::trim)
		.map_err(|_| bad_actor(format!("{} header is not valid text", name)))
}

fn bad_actor(message: String) -> APIError {
	APIError::BadRequest {
		error_type: "INVALID_ACTOR".to_string(),
		message,
		details: None,
	}
}

/// Builds a 400 response for malformed path or query input.
pub fn bad_request(message: impl Into<String>) -> APIError {
	APIError::BadRequest {
		error_type: "VALIDATION_ERROR".to_string(),
		message: message.into(),
		details: None,
	}
}

/// Maps an engine error to its HTTP representation.
pub fn api_error(error: EngineError) -> APIError {
	match error {
		EngineError::Validation(message) => APIError::BadRequest {
			error_type: "VALIDATION_ERROR".to_string(),
			message,
			details: None,
		},
		EngineError::Unauthorized(message) => APIError::Forbidden {
			error_type: "UNAUTHORIZED".to_string(),
			message,
		},
		EngineError::NotFound(message) => APIError::NotFound {
			error_type: "NOT_FOUND".to_string(),
			message,
		},
		EngineError::Conflict(message) => APIError::Conflict {
			error_type: "CONFLICT".to_string(),
			message,
		},
		EngineError::InvalidState(message) => APIError::UnprocessableEntity {
			error_type: "INVALID_STATE".to_string(),
			message,
			details: None,
		},
		EngineError::TransientDependency(message) => APIError::ServiceUnavailable {
			error_type: "TRANSIENT_DEPENDENCY".to_string(),
			message,
			retry_after: Some(TRANSIENT_RETRY_AFTER_SECONDS),
		},
		EngineError::Storage(message) => {
			tracing::error!(error = %message, "Storage failure while serving request");
			APIError::InternalServerError {
				error_type: "STORAGE_ERROR".to_string(),
				message,
			}
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_engine_error_status_mapping() {
		let cases = [
			(EngineError::Validation("x".into()), 400),
			(EngineError::Unauthorized("x".into()), 403),
			(EngineError::NotFound("x".into()), 404),
			(EngineError::Conflict("x".into()), 409),
			(EngineError::InvalidState("x".into()), 422),
			(EngineError::TransientDependency("x".into()), 503),
			(EngineError::Storage("x".into()), 500),
		];
		for (error, status) in cases {
			assert_eq!(api_error(error).status_code(), status);
		}
	}

	#[tokio::test]
	async fn test_acting_party_from_headers() {
		let request = axum::http::Request::builder()
			.header(ACTOR_KIND_HEADER, "supplier")
			.header(ACTOR_ID_HEADER, "42")
			.body(())
			.unwrap();
		let (mut parts, _) = request.into_parts();
		let ActingParty(actor) = ActingParty::from_request_parts(&mut parts, &())
			.await
			.unwrap();
		assert_eq!(actor, Actor::Supplier(42));

		let request = axum::http::Request::builder()
			.header(ACTOR_KIND_HEADER, "system")
			.body(())
			.unwrap();
		let (mut parts, _) = request.into_parts();
		let ActingParty(actor) = ActingParty::from_request_parts(&mut parts, &())
			.await
			.unwrap();
		assert_eq!(actor, Actor::System);
	}

	#[tokio::test]
	async fn test_acting_party_rejects_missing_id() {
		let request = axum::http::Request::builder()
			.header(ACTOR_KIND_HEADER, "store")
			.body(())
			.unwrap();
		let (mut parts, _) = request.into_parts();
		let err = ActingParty::from_request_parts(&mut parts, &())
			.await
			.unwrap_err();
		assert_eq!(err.status_code(), 400);
	}
}
