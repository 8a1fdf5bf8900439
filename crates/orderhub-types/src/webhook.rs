//! Outbound notification types.
//!
//! A [`WebhookLog`] is a durable delivery task: created once per
//! (order, event, target) occurrence and mutated by the dispatcher until it
//! succeeds or exhausts its retries. Exhausted tasks are kept for audit.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum number of response-body characters kept on a task.
pub const RESPONSE_BODY_LIMIT: usize = 2000;

/// Notification-worthy order events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
	#[serde(rename = "order.created")]
	OrderCreated,
	#[serde(rename = "order.confirmed")]
	OrderConfirmed,
	#[serde(rename = "order.delivering")]
	OrderDelivering,
	#[serde(rename = "order.completed")]
	OrderCompleted,
	#[serde(rename = "order.cancelled")]
	OrderCancelled,
	#[serde(rename = "order.restored")]
	OrderRestored,
}

impl EventType {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventType::OrderCreated => "order.created",
			EventType::OrderConfirmed => "order.confirmed",
			EventType::OrderDelivering => "order.delivering",
			EventType::OrderCompleted => "order.completed",
			EventType::OrderCancelled => "order.cancelled",
			EventType::OrderRestored => "order.restored",
		}
	}
}

impl fmt::Display for EventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Kind of party that owns a webhook endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
	Store,
	Supplier,
}

impl TargetKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			TargetKind::Store => "store",
			TargetKind::Supplier => "supplier",
		}
	}
}

impl FromStr for TargetKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"store" => Ok(TargetKind::Store),
			"supplier" => Ok(TargetKind::Supplier),
			other => Err(format!("unknown webhook target kind '{}'", other)),
		}
	}
}

/// Destination registered by a store or supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
	pub target_kind: TargetKind,
	pub target_id: u64,
	pub url: String,
	pub enabled: bool,
	pub updated_at: DateTime<Utc>,
}

impl WebhookEndpoint {
	/// Only enabled endpoints with a destination receive tasks.
	pub fn accepts_deliveries(&self) -> bool {
		self.enabled && !self.url.trim().is_empty()
	}

	/// Storage key of the endpoint for a target.
	pub fn key_for(kind: TargetKind, id: u64) -> String {
		format!("{}:{}", kind.as_str(), id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
	Pending,
	Success,
	Failed,
}

impl FromStr for WebhookStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(WebhookStatus::Pending),
			"success" => Ok(WebhookStatus::Success),
			"failed" => Ok(WebhookStatus::Failed),
			other => Err(format!("unknown webhook status '{}'", other)),
		}
	}
}

/// Body sent to the destination. Receivers de-duplicate on `task_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
	pub task_id: Uuid,
	pub event_type: EventType,
	pub order_id: u64,
	pub order_no: String,
	/// Unix timestamp in seconds.
	pub timestamp: i64,
	pub payload: serde_json::Value,
}

/// One outbound delivery task and its attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookLog {
	pub id: u64,
	pub task_id: Uuid,
	pub target_kind: TargetKind,
	pub target_id: u64,
	pub event_type: EventType,
	pub order_id: u64,
	pub order_no: String,
	pub url: String,
	/// Snapshot of the request body, fixed at enqueue time.
	pub request_body: WebhookPayload,
	pub status: WebhookStatus,
	pub retry_count: u32,
	pub max_retry_count: u32,
	#[serde(default)]
	pub next_retry_at: Option<DateTime<Utc>>,
	/// Set while a worker holds the task.
	#[serde(default)]
	pub lease_expires_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub response_code: Option<u16>,
	#[serde(default)]
	pub response_body: Option<String>,
	#[serde(default)]
	pub duration_ms: Option<u64>,
	#[serde(default)]
	pub error_message: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl WebhookLog {
	/// Failed with no retries left, or with no retry that can ever be
	/// scheduled. Never picked up again automatically.
	pub fn is_exhausted(&self) -> bool {
		self.status == WebhookStatus::Failed
			&& (self.retry_count >= self.max_retry_count || self.next_retry_at.is_none())
	}

	/// When the task next becomes deliverable, ignoring any lease. `None`
	/// once it never will without an explicit requeue.
	pub fn due_at(&self) -> Option<DateTime<Utc>> {
		match self.status {
			WebhookStatus::Pending => Some(self.created_at),
			WebhookStatus::Failed if self.is_exhausted() => None,
			WebhookStatus::Failed => self.next_retry_at,
			WebhookStatus::Success => None,
		}
	}

	/// Whether a dispatcher may claim this task at `now`.
	pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
		if self.lease_expires_at.is_some_and(|lease| lease > now) {
			return false;
		}
		match self.status {
			WebhookStatus::Pending => true,
			WebhookStatus::Failed => {
				!self.is_exhausted() && self.next_retry_at.is_some_and(|at| at <= now)
			},
			WebhookStatus::Success => false,
		}
	}

	/// Records a 2xx response.
	pub fn record_success(
		&mut self,
		now: DateTime<Utc>,
		response_code: u16,
		response_body: &str,
		duration_ms: u64,
	) {
		self.status = WebhookStatus::Success;
		self.response_code = Some(response_code);
		self.response_body = Some(crate::truncate_chars(response_body, RESPONSE_BODY_LIMIT));
		self.duration_ms = Some(duration_ms);
		self.error_message = None;
		self.next_retry_at = None;
		self.lease_expires_at = None;
		self.updated_at = now;
	}

	/// Records a failed attempt and schedules the next one if retries remain.
	///
	/// A retry time past the representable range is never reached, so such a
	/// task is left unscheduled.
	pub fn record_failure(
		&mut self,
		now: DateTime<Utc>,
		retry_interval: Duration,
		response_code: Option<u16>,
		response_body: Option<&str>,
		error_message: String,
		duration_ms: u64,
	) {
		self.status = WebhookStatus::Failed;
		self.retry_count += 1;
		self.response_code = response_code;
		self.response_body =
			response_body.map(|body| crate::truncate_chars(body, RESPONSE_BODY_LIMIT));
		self.error_message = Some(error_message);
		self.duration_ms = Some(duration_ms);
		self.lease_expires_at = None;
		self.next_retry_at = if self.retry_count < self.max_retry_count {
			now.checked_add_signed(retry_interval)
		} else {
			None
		};
		self.updated_at = now;
	}

	/// Puts an exhausted task back in the queue.
	pub fn requeue(&mut self, now: DateTime<Utc>) {
		self.status = WebhookStatus::Pending;
		self.retry_count = 0;
		self.next_retry_at = None;
		self.lease_expires_at = None;
		self.updated_at = now;
	}
}
