//! Background dispatcher for webhook tasks.
//!
//! Each pass reads the due entries of the webhook queue, claims each task by
//! compare-and-swapping a lease onto it, and delivers the claimed tasks in
//! parallel up to a concurrency limit. A task whose worker crashed becomes
//! claimable again once its lease expires, and a worker whose lease was
//! taken over in the meantime has its result discarded.

use crate::engine::event_bus::EventBus;
use crate::webhook::outbox::sync_queue;
use chrono::{DateTime, Duration, Utc};
use orderhub_delivery::{DeliveryError, DeliveryRequest, DeliveryService};
use orderhub_storage::{StorageError, StorageService, Versioned};
use orderhub_types::{
	truncate_id, Clock, EngineEvent, StorageKey, WebhookEvent, WebhookLog,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Dispatcher tuning, derived from the `[webhook]` configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
	pub retry_interval: Duration,
	pub lease: Duration,
	pub max_concurrent: usize,
}

/// Outcome counts of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
	/// Tasks this pass won the claim for.
	pub claimed: usize,
	pub succeeded: usize,
	/// Failed attempts with retries left.
	pub failed: usize,
	/// Failed attempts that used up the last retry.
	pub exhausted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
	Succeeded,
	Failed,
	Exhausted,
}

impl DrainReport {
	fn record(&mut self, attempt: Attempt) {
		self.claimed += 1;
		match attempt {
			Attempt::Succeeded => self.succeeded += 1,
			Attempt::Failed => self.failed += 1,
			Attempt::Exhausted => self.exhausted += 1,
		}
	}
}

pub struct WebhookDispatcher {
	storage: Arc<StorageService>,
	delivery: Arc<DeliveryService>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
	settings: DispatchSettings,
	semaphore: Arc<Semaphore>,
}

impl WebhookDispatcher {
	pub fn new(
		storage: Arc<StorageService>,
		delivery: Arc<DeliveryService>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
		settings: DispatchSettings,
	) -> Self {
		let semaphore = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));
		Self {
			storage,
			delivery,
			event_bus,
			clock,
			settings,
			semaphore,
		}
	}

	/// Runs one pass over all due tasks and waits for it to finish.
	pub async fn drain_once(self: &Arc<Self>) -> Result<DrainReport, StorageError> {
		let now = self.clock.now();
		let mut due: Vec<u64> = self
			.storage
			.retrieve_all::<DateTime<Utc>>(StorageKey::WebhookQueue.as_str())
			.await?
			.into_iter()
			.filter(|(_, due_at)| *due_at <= now)
			.filter_map(|(id, _)| id.parse().ok())
			.collect();
		due.sort_unstable();

		let mut workers = JoinSet::new();
		for id in due {
			let permit = match self.semaphore.clone().acquire_owned().await {
				Ok(permit) => permit,
				Err(e) => {
					tracing::error!("Failed to acquire dispatcher permit: {}", e);
					break;
				},
			};
			let dispatcher = Arc::clone(self);
			workers.spawn(async move {
				let _permit = permit;
				dispatcher.process(id).await
			});
		}

		let mut report = DrainReport::default();
		while let Some(joined) = workers.join_next().await {
			match joined {
				Ok(Ok(Some(attempt))) => report.record(attempt),
				Ok(Ok(None)) => {},
				Ok(Err(e)) => tracing::warn!(error = %e, "Webhook task could not be processed"),
				Err(e) => tracing::error!(error = %e, "Webhook worker aborted"),
			}
		}

		if report.claimed > 0 {
			tracing::debug!(
				claimed = report.claimed,
				succeeded = report.succeeded,
				failed = report.failed,
				exhausted = report.exhausted,
				"Webhook drain pass finished"
			);
		}
		Ok(report)
	}

	/// Adds queue entries for deliverable tasks that lack one, such as tasks
	/// written before the queue existed. Returns how many were added.
	pub async fn rebuild_queue(&self) -> Result<usize, StorageError> {
		let mut added = 0;
		for (id, task) in self
			.storage
			.retrieve_all::<WebhookLog>(StorageKey::WebhookLogs.as_str())
			.await?
		{
			let Some(due) = task.due_at() else {
				continue;
			};
			if self
				.storage
				.insert_if_absent(StorageKey::WebhookQueue.as_str(), &id, &due)
				.await?
			{
				added += 1;
			}
		}
		if added > 0 {
			tracing::info!(added, "Rebuilt webhook queue entries");
		}
		Ok(added)
	}

	/// Claims a task by putting a lease on it. `None` if another worker won
	/// or the task is no longer due.
	async fn claim(&self, id: u64) -> Result<Option<WebhookLog>, StorageError> {
		let key = id.to_string();
		let current: Versioned<WebhookLog> = match self
			.storage
			.retrieve_versioned(StorageKey::WebhookLogs.as_str(), &key)
			.await
		{
			Ok(current) => current,
			Err(StorageError::NotFound) => {
				self.storage
					.remove(StorageKey::WebhookQueue.as_str(), &key)
					.await?;
				return Ok(None);
			},
			Err(e) => return Err(e),
		};

		if current.value.due_at().is_none() {
			// Stale entry left by an interrupted write.
			sync_queue(&self.storage, &current.value).await?;
			return Ok(None);
		}
		let now = self.clock.now();
		if !current.value.is_claimable(now) {
			return Ok(None);
		}
		let Some(lease_expires_at) = now.checked_add_signed(self.settings.lease) else {
			tracing::error!(task_id = id, "Webhook lease out of range; task not claimed");
			return Ok(None);
		};
		let mut claimed = current.value.clone();
		claimed.lease_expires_at = Some(lease_expires_at);
		claimed.updated_at = now;

		if self
			.storage
			.swap_versioned(StorageKey::WebhookLogs.as_str(), &key, &current, &claimed)
			.await?
		{
			Ok(Some(claimed))
		} else {
			Ok(None)
		}
	}

	async fn process(&self, id: u64) -> Result<Option<Attempt>, StorageError> {
		match self.claim(id).await? {
			Some(claimed) => self.deliver(claimed).await,
			None => Ok(None),
		}
	}

	/// Delivers a claimed task and records the outcome, unless the claim was
	/// lost to another worker in the meantime.
	async fn deliver(&self, claimed: WebhookLog) -> Result<Option<Attempt>, StorageError> {
		let mut task = claimed.clone();
		let started = Instant::now();
		let result = self.delivery.deliver(DeliveryRequest::from_task(&task)).await;
		let elapsed_ms = started.elapsed().as_millis() as u64;
		let now = self.clock.now();

		let attempt = match result {
			Ok(response) if response.is_success() => {
				task.record_success(now, response.status, &response.body, response.duration_ms);
				Attempt::Succeeded
			},
			Ok(response) => {
				task.record_failure(
					now,
					self.settings.retry_interval,
					Some(response.status),
					Some(&response.body),
					format!("HTTP {}", response.status),
					response.duration_ms,
				);
				attempt_after_failure(&task)
			},
			Err(e) => {
				let duration_ms = match e {
					DeliveryError::Timeout(ms) => ms,
					_ => elapsed_ms,
				};
				task.record_failure(
					now,
					self.settings.retry_interval,
					None,
					None,
					e.to_string(),
					duration_ms,
				);
				attempt_after_failure(&task)
			},
		};

		let task_ref = task.task_id.to_string();
		let recorded = self
			.storage
			.compare_and_swap(
				StorageKey::WebhookLogs.as_str(),
				&task.id.to_string(),
				Some(&claimed),
				&task,
			)
			.await?;
		if !recorded {
			tracing::warn!(
				task_id = %truncate_id(&task_ref),
				order_id = task.order_id,
				"Webhook task was claimed again before its result was recorded; result discarded"
			);
			return Ok(None);
		}
		sync_queue(&self.storage, &task).await?;

		match attempt {
			Attempt::Succeeded => {
				tracing::info!(
					task_id = %truncate_id(&task_ref),
					order_id = task.order_id,
					event_type = %task.event_type,
					"Webhook delivered"
				);
				self.event_bus.publish(EngineEvent::Webhook(WebhookEvent::Delivered {
					task_id: task.task_id,
					order_id: task.order_id,
				}));
			},
			Attempt::Failed | Attempt::Exhausted => {
				let exhausted = attempt == Attempt::Exhausted;
				if exhausted {
					tracing::error!(
						task_id = %truncate_id(&task_ref),
						order_id = task.order_id,
						retry_count = task.retry_count,
						error = task.error_message.as_deref().unwrap_or_default(),
						"Webhook retries exhausted"
					);
				} else {
					tracing::warn!(
						task_id = %truncate_id(&task_ref),
						order_id = task.order_id,
						retry_count = task.retry_count,
						error = task.error_message.as_deref().unwrap_or_default(),
						"Webhook attempt failed"
					);
				}
				self.event_bus.publish(EngineEvent::Webhook(WebhookEvent::Failed {
					task_id: task.task_id,
					order_id: task.order_id,
					retry_count: task.retry_count,
					exhausted,
				}));
			},
		}
		Ok(Some(attempt))
	}
}

fn attempt_after_failure(task: &WebhookLog) -> Attempt {
	if task.is_exhausted() {
		Attempt::Exhausted
	} else {
		Attempt::Failed
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::Utc;
	use mockall::mock;
	use orderhub_delivery::{DeliveryInterface, DeliveryResponse};
	use orderhub_storage::implementations::memory::MemoryStorage;
	use orderhub_types::{
		ConfigSchema, EventType, ManualClock, TargetKind, WebhookPayload, WebhookStatus,
	};
	use std::sync::atomic::{AtomicU32, Ordering};
	use uuid::Uuid;

	mock! {
		pub Transport {}

		#[async_trait]
		impl DeliveryInterface for Transport {
			fn config_schema(&self) -> Box<dyn ConfigSchema>;
			async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError>;
		}
	}

	fn response(status: u16) -> Result<DeliveryResponse, DeliveryError> {
		Ok(DeliveryResponse {
			status,
			body: format!("status {}", status),
			duration_ms: 3,
		})
	}

	struct Fixture {
		dispatcher: Arc<WebhookDispatcher>,
		storage: Arc<StorageService>,
		clock: ManualClock,
	}

	fn fixture(transport: MockTransport, max_concurrent: usize) -> Fixture {
		fixture_with(
			transport,
			DispatchSettings {
				retry_interval: Duration::minutes(5),
				lease: Duration::seconds(60),
				max_concurrent,
			},
		)
	}

	fn fixture_with(transport: MockTransport, settings: DispatchSettings) -> Fixture {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock = ManualClock::new(Utc::now());
		let delivery = Arc::new(DeliveryService::new(
			Box::new(transport),
			std::time::Duration::from_secs(5),
		));
		let dispatcher = Arc::new(WebhookDispatcher::new(
			storage.clone(),
			delivery,
			EventBus::default(),
			Arc::new(clock.clone()),
			settings,
		));
		Fixture {
			dispatcher,
			storage,
			clock,
		}
	}

	async fn seed(storage: &StorageService, id: u64, max_retry_count: u32) {
		let task = seed_unqueued(storage, id, max_retry_count).await;
		storage
			.store(StorageKey::WebhookQueue.as_str(), &id.to_string(), &task.created_at)
			.await
			.unwrap();
	}

	/// Stores a pending task created shortly before the fixture clock.
	async fn seed_unqueued(
		storage: &StorageService,
		id: u64,
		max_retry_count: u32,
	) -> WebhookLog {
		let now = Utc::now() - Duration::minutes(1);
		let task_id = Uuid::new_v4();
		let task = WebhookLog {
			id,
			task_id,
			target_kind: TargetKind::Store,
			target_id: 5,
			event_type: EventType::OrderCancelled,
			order_id: 9,
			order_no: "17000000000000009".into(),
			url: "http://store.example/hook".into(),
			request_body: WebhookPayload {
				task_id,
				event_type: EventType::OrderCancelled,
				order_id: 9,
				order_no: "17000000000000009".into(),
				timestamp: now.timestamp(),
				payload: serde_json::json!({}),
			},
			status: WebhookStatus::Pending,
			retry_count: 0,
			max_retry_count,
			next_retry_at: None,
			lease_expires_at: None,
			response_code: None,
			response_body: None,
			duration_ms: None,
			error_message: None,
			created_at: now,
			updated_at: now,
		};
		storage
			.store(StorageKey::WebhookLogs.as_str(), &id.to_string(), &task)
			.await
			.unwrap();
		task
	}

	async fn queued(storage: &StorageService, id: u64) -> bool {
		storage
			.exists(StorageKey::WebhookQueue.as_str(), &id.to_string())
			.await
			.unwrap()
	}

	async fn task(storage: &StorageService, id: u64) -> WebhookLog {
		storage
			.retrieve(StorageKey::WebhookLogs.as_str(), &id.to_string())
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn test_success_on_third_attempt() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = calls.clone();
		let mut transport = MockTransport::new();
		transport.expect_send().returning(move |request| {
			assert_eq!(request.body.task_id, request.task_id);
			match counter.fetch_add(1, Ordering::SeqCst) {
				0 | 1 => response(502),
				_ => response(200),
			}
		});
		let f = fixture(transport, 4);
		seed(&f.storage, 1, 3).await;

		let report = f.dispatcher.drain_once().await.unwrap();
		assert_eq!(report.failed, 1);
		let failed = task(&f.storage, 1).await;
		assert_eq!(failed.status, WebhookStatus::Failed);
		assert_eq!(failed.retry_count, 1);
		assert_eq!(failed.response_code, Some(502));
		assert!(failed.lease_expires_at.is_none());

		// Not due yet.
		assert_eq!(f.dispatcher.drain_once().await.unwrap().claimed, 0);

		f.clock.advance(Duration::minutes(5));
		assert_eq!(f.dispatcher.drain_once().await.unwrap().failed, 1);
		f.clock.advance(Duration::minutes(5));
		assert_eq!(f.dispatcher.drain_once().await.unwrap().succeeded, 1);

		let done = task(&f.storage, 1).await;
		assert_eq!(done.status, WebhookStatus::Success);
		assert_eq!(done.retry_count, 2);
		assert!(done.next_retry_at.is_none());
		assert_eq!(done.response_body.as_deref(), Some("status 200"));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
		assert!(!queued(&f.storage, 1).await);
	}

	#[tokio::test]
	async fn test_exhausted_task_is_never_retried() {
		let mut transport = MockTransport::new();
		transport
			.expect_send()
			.times(3)
			.returning(|_| Err(DeliveryError::Network("connection refused".into())));
		let f = fixture(transport, 1);
		seed(&f.storage, 1, 3).await;

		let mut exhausted = 0;
		for _ in 0..5 {
			exhausted += f.dispatcher.drain_once().await.unwrap().exhausted;
			f.clock.advance(Duration::minutes(5));
		}
		assert_eq!(exhausted, 1);

		let failed = task(&f.storage, 1).await;
		assert_eq!(failed.status, WebhookStatus::Failed);
		assert_eq!(failed.retry_count, 3);
		assert!(failed.next_retry_at.is_none());
		assert!(failed.is_exhausted());
		assert!(!queued(&f.storage, 1).await);
		assert!(failed
			.error_message
			.as_deref()
			.is_some_and(|e| e.contains("connection refused")));
	}

	#[tokio::test]
	async fn test_leased_task_is_not_claimed_again() {
		let mut transport = MockTransport::new();
		transport.expect_send().times(0);
		let f = fixture(transport, 2);
		seed(&f.storage, 1, 3).await;

		let mut leased = task(&f.storage, 1).await;
		leased.lease_expires_at = Some(f.clock.now() + Duration::seconds(30));
		f.storage
			.store(StorageKey::WebhookLogs.as_str(), "1", &leased)
			.await
			.unwrap();

		assert_eq!(f.dispatcher.drain_once().await.unwrap(), DrainReport::default());
	}

	#[tokio::test]
	async fn test_concurrent_drains_deliver_each_task_once() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = calls.clone();
		let mut transport = MockTransport::new();
		transport.expect_send().returning(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
			response(204)
		});
		let f = fixture(transport, 8);
		for id in 1..=6 {
			seed(&f.storage, id, 3).await;
		}

		let (a, b) = tokio::join!(f.dispatcher.drain_once(), f.dispatcher.drain_once());
		let delivered = a.unwrap().succeeded + b.unwrap().succeeded;
		assert_eq!(delivered, 6);
		assert_eq!(calls.load(Ordering::SeqCst), 6);
	}

	#[tokio::test]
	async fn test_result_of_a_superseded_claim_is_discarded() {
		let mut transport = MockTransport::new();
		transport.expect_send().times(2).returning(|_| response(200));
		let f = fixture(transport, 1);
		seed(&f.storage, 1, 3).await;

		let first = f.dispatcher.claim(1).await.unwrap().unwrap();
		f.clock.advance(Duration::seconds(61));
		let second = f.dispatcher.claim(1).await.unwrap().unwrap();
		assert!(second.lease_expires_at > first.lease_expires_at);

		assert_eq!(f.dispatcher.deliver(first).await.unwrap(), None);
		let stored = task(&f.storage, 1).await;
		assert_eq!(stored.status, WebhookStatus::Pending);
		assert_eq!(stored.lease_expires_at, second.lease_expires_at);

		assert_eq!(
			f.dispatcher.deliver(second).await.unwrap(),
			Some(Attempt::Succeeded)
		);
		assert_eq!(task(&f.storage, 1).await.status, WebhookStatus::Success);
	}

	#[tokio::test]
	async fn test_only_queued_tasks_are_scanned() {
		let mut transport = MockTransport::new();
		transport.expect_send().times(1).returning(|_| response(200));
		let f = fixture(transport, 2);
		seed_unqueued(&f.storage, 1, 3).await;

		assert_eq!(f.dispatcher.drain_once().await.unwrap().claimed, 0);
		assert_eq!(f.dispatcher.rebuild_queue().await.unwrap(), 1);
		assert_eq!(f.dispatcher.rebuild_queue().await.unwrap(), 0);
		assert_eq!(f.dispatcher.drain_once().await.unwrap().succeeded, 1);
		assert!(!queued(&f.storage, 1).await);
	}

	#[tokio::test]
	async fn test_stale_queue_entry_is_dropped() {
		let mut transport = MockTransport::new();
		transport.expect_send().times(0);
		let f = fixture(transport, 1);
		f.storage
			.store(
				StorageKey::WebhookQueue.as_str(),
				"7",
				&(Utc::now() - Duration::minutes(1)),
			)
			.await
			.unwrap();

		assert_eq!(f.dispatcher.drain_once().await.unwrap(), DrainReport::default());
		assert!(!queued(&f.storage, 7).await);
	}

	#[tokio::test]
	async fn test_unrepresentable_durations_do_not_panic() {
		let mut transport = MockTransport::new();
		transport.expect_send().times(0);
		let f = fixture_with(
			transport,
			DispatchSettings {
				retry_interval: Duration::minutes(5),
				lease: Duration::MAX,
				max_concurrent: 1,
			},
		);
		seed(&f.storage, 1, 3).await;
		assert_eq!(f.dispatcher.drain_once().await.unwrap().claimed, 0);
		assert!(task(&f.storage, 1).await.lease_expires_at.is_none());

		let mut transport = MockTransport::new();
		transport
			.expect_send()
			.times(1)
			.returning(|_| Err(DeliveryError::Network("connection refused".into())));
		let f = fixture_with(
			transport,
			DispatchSettings {
				retry_interval: Duration::MAX,
				lease: Duration::seconds(60),
				max_concurrent: 1,
			},
		);
		seed(&f.storage, 1, 3).await;
		let report = f.dispatcher.drain_once().await.unwrap();
		assert_eq!(report.exhausted, 1);
		let failed = task(&f.storage, 1).await;
		assert_eq!(failed.retry_count, 1);
		assert!(failed.is_exhausted());
		assert!(!queued(&f.storage, 1).await);
	}
}
