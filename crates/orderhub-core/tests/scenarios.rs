//! End-to-end order lifecycle scenarios against the in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use orderhub_config::builders::ConfigBuilder;
use orderhub_core::monitoring::AutoCompleteMonitor;
use orderhub_core::numbering::SequentialNumberGenerator;
use orderhub_core::state::is_valid_transition;
use orderhub_core::{EngineBuilder, EngineError, OrderEngine};
use orderhub_delivery::{DeliveryError, DeliveryInterface, DeliveryRequest, DeliveryResponse};
use orderhub_storage::implementations::memory::MemoryStorage;
use orderhub_types::{
	Actor, AuditCancelRequest, AuditDecision, CancelRequestStatus, CancellationEvent,
	ConfigSchema, ConfirmPaymentRequest, CreateMarkupRequest, CreateOrderItem, CreateOrderRequest,
	DeliverySnapshot, EngineEvent, EventType, ManualClock, MarkupKind, MarkupRequest, Order,
	OrderStatus, PaymentStatus, RegisterEndpointRequest, Schema, ShipmentRequest, SkuRecord,
	StorageKey, TargetKind, ValidationError, WebhookStatus,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const STORE: Actor = Actor::Store(10);
const SUPPLIER: Actor = Actor::Supplier(20);
const ADMIN: Actor = Actor::Admin(1);

/// Remembers what it was sent; accepts everything unless `failing` is set.
#[derive(Clone, Default)]
struct Recorder {
	sent: Arc<Mutex<Vec<DeliveryRequest>>>,
	failing: Arc<AtomicBool>,
}

struct NoSchema;

impl ConfigSchema for NoSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for Recorder {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(NoSchema)
	}

	async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DeliveryError> {
		self.sent.lock().unwrap().push(request);
		if self.failing.load(Ordering::SeqCst) {
			return Err(DeliveryError::Network("connection refused".into()));
		}
		Ok(DeliveryResponse {
			status: 200,
			body: "ok".into(),
			duration_ms: 1,
		})
	}
}

struct Hub {
	engine: OrderEngine,
	clock: ManualClock,
	recorder: Recorder,
}

fn start() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

async fn hub() -> Hub {
	let clock = ManualClock::new(start());
	let recorder = Recorder::default();
	let config = ConfigBuilder::new()
		.service_fee_rate(Decimal::new(3, 3))
		.cancel_threshold_minutes(60)
		.webhook_retry(3, 5)
		.build();
	let engine = EngineBuilder::new(config)
		.with_clock(Arc::new(clock.clone()))
		.with_number_generator(Arc::new(SequentialNumberGenerator::new("T", 1)))
		.build_with(Box::new(MemoryStorage::new()), Box::new(recorder.clone()));
	engine.initialize().await.unwrap();

	engine
		.catalog()
		.upsert_sku(
			&ADMIN,
			SkuRecord {
				id: 100,
				supplier_id: 20,
				name: "Jasmine rice 10kg".into(),
				category_id: Some(3),
				material_id: Some(7),
				base_price: Decimal::new(50000, 2),
				active: true,
			},
		)
		.await
		.unwrap();

	Hub {
		engine,
		clock,
		recorder,
	}
}

fn order_request(quantity: i64) -> CreateOrderRequest {
	CreateOrderRequest {
		supplier_id: 20,
		items: vec![CreateOrderItem {
			sku_id: 100,
			quantity,
			unit_price: None,
			final_price: None,
		}],
		delivery: DeliverySnapshot {
			contact_name: "Li".into(),
			contact_phone: "13800000000".into(),
			address: "12 Market Street".into(),
			remark: None,
		},
	}
}

async fn register(hub: &Hub, actor: Actor, kind: TargetKind, id: u64) {
	hub.engine
		.webhooks()
		.register_endpoint(
			&actor,
			kind,
			id,
			RegisterEndpointRequest {
				url: format!("http://{}.example/hook", kind.as_str()),
				enabled: true,
			},
		)
		.await
		.unwrap();
}

/// Creates an order and confirms its payment.
async fn paid_order(hub: &Hub) -> Order {
	let order = hub
		.engine
		.orders()
		.create(&STORE, order_request(2))
		.await
		.unwrap();
	hub.engine
		.orders()
		.confirm_payment(
			order.id,
			&Actor::System,
			ConfirmPaymentRequest {
				method: "wechat".into(),
				reference: "PAY-1".into(),
			},
		)
		.await
		.unwrap()
}

async fn assert_log_matches_status(hub: &Hub, order_id: u64) {
	let order = hub.engine.orders().get(order_id, &ADMIN).await.unwrap();
	let logs = hub.engine.orders().logs(order_id, &ADMIN).await.unwrap();
	assert_eq!(logs.last().map(|l| l.to_status), Some(order.status));
	assert_eq!(logs.first().and_then(|l| l.from_status), None);
	for pair in logs.windows(2) {
		assert_eq!(pair[1].from_status, Some(pair[0].to_status));
		assert!(is_valid_transition(pair[0].to_status, pair[1].to_status));
	}
}

#[tokio::test]
async fn test_order_total_includes_service_fee() {
	let hub = hub().await;
	let order = hub
		.engine
		.orders()
		.create(&STORE, order_request(2))
		.await
		.unwrap();

	assert_eq!(order.goods_amount, Decimal::new(100000, 2));
	assert_eq!(order.service_fee, Decimal::new(300, 2));
	assert_eq!(order.total_amount, Decimal::new(100300, 2));
	assert_eq!(order.supplier_amount, order.goods_amount);
	assert_eq!(order.status, OrderStatus::PendingPayment);
	assert_eq!(order.order_no, "T000001");
}

#[tokio::test]
async fn test_store_self_cancels_within_window() {
	let hub = hub().await;
	register(&hub, SUPPLIER, TargetKind::Supplier, 20).await;
	let order = paid_order(&hub).await;
	let tasks_before = hub.engine.webhooks().list_tasks(&ADMIN, None).await.unwrap().len();

	hub.clock.advance(Duration::minutes(30));
	let cancelled = hub
		.engine
		.cancellations()
		.cancel(order.id, &STORE, "ordered twice")
		.await
		.unwrap();
	assert_eq!(cancelled.status, OrderStatus::Cancelled);
	assert_eq!(cancelled.payment_status, PaymentStatus::RefundPending);

	let logs = hub.engine.orders().logs(order.id, &STORE).await.unwrap();
	let cancel_rows: Vec<_> = logs
		.iter()
		.filter(|l| l.to_status == OrderStatus::Cancelled)
		.collect();
	assert_eq!(cancel_rows.len(), 1);
	assert_eq!(cancel_rows[0].from_status, Some(OrderStatus::PendingConfirm));

	let tasks = hub.engine.webhooks().list_tasks(&ADMIN, None).await.unwrap();
	let cancelled_tasks: Vec<_> = tasks
		.iter()
		.filter(|t| t.event_type == EventType::OrderCancelled)
		.collect();
	assert_eq!(tasks.len(), tasks_before + 1);
	assert_eq!(cancelled_tasks.len(), 1);
	assert_eq!(cancelled_tasks[0].target_kind, TargetKind::Supplier);

	// Drain: created + cancelled reach the supplier.
	let report = hub.engine.dispatcher().drain_once().await.unwrap();
	assert_eq!(report.succeeded, tasks.len());
	let sent = hub.recorder.sent.lock().unwrap().clone();
	assert!(sent
		.iter()
		.any(|r| r.event_type == EventType::OrderCancelled && r.body.order_id == order.id));
	let delivered = hub
		.engine
		.webhooks()
		.list_tasks(&ADMIN, Some(WebhookStatus::Success))
		.await
		.unwrap();
	assert_eq!(delivered.len(), tasks.len());
}

#[tokio::test]
async fn test_late_cancel_goes_through_admin_approval() {
	let hub = hub().await;
	let order = paid_order(&hub).await;
	hub.clock.advance(Duration::minutes(90));

	let rejected = hub
		.engine
		.cancellations()
		.cancel(order.id, &STORE, "too late")
		.await;
	match rejected {
		Err(EngineError::InvalidState(message)) => assert!(message.contains("cancel-requests")),
		other => panic!("expected invalid state, got {:?}", other.map(|o| o.status)),
	}
	let unchanged = hub.engine.orders().get(order.id, &STORE).await.unwrap();
	assert_eq!(unchanged.status, OrderStatus::PendingConfirm);

	let request = hub
		.engine
		.cancellations()
		.submit_request(order.id, &STORE, "no longer needed")
		.await
		.unwrap();
	assert_eq!(request.status, CancelRequestStatus::Pending);

	let mut events = hub.engine.event_bus().subscribe();
	let approved = hub
		.engine
		.cancellations()
		.audit(
			request.id,
			&ADMIN,
			AuditCancelRequest {
				decision: AuditDecision::Approve,
				remark: "approved by ops".into(),
			},
		)
		.await
		.unwrap();
	assert_eq!(approved.status, CancelRequestStatus::Approved);
	assert_eq!(approved.admin_id, Some(1));

	let order = hub.engine.orders().get(order.id, &STORE).await.unwrap();
	assert_eq!(order.status, OrderStatus::Cancelled);
	assert_eq!(
		order.cancellation.as_ref().map(|c| c.reason.as_str()),
		Some("no longer needed")
	);

	let mut resolved = false;
	while let Ok(event) = events.try_recv() {
		if let EngineEvent::Cancellation(CancellationEvent::RequestResolved { status, .. }) = event {
			resolved = status == CancelRequestStatus::Approved;
		}
	}
	assert!(resolved);
	assert!(hub
		.engine
		.cancellations()
		.find_inconsistencies(&ADMIN)
		.await
		.unwrap()
		.is_empty());
	assert_log_matches_status(&hub, order.id).await;
}

#[tokio::test]
async fn test_request_inside_window_points_to_direct_cancel() {
	let hub = hub().await;
	let order = paid_order(&hub).await;
	hub.clock.advance(Duration::minutes(30));

	let early = hub
		.engine
		.cancellations()
		.submit_request(order.id, &STORE, "changed my mind")
		.await;
	match early {
		Err(EngineError::InvalidState(message)) => {
			assert!(message.contains(&format!("/api/orders/{}/cancel", order.id)))
		},
		other => panic!("expected invalid state, got {:?}", other.map(|r| r.status)),
	}
	assert!(hub
		.engine
		.cancellations()
		.list_requests(order.id, &STORE)
		.await
		.unwrap()
		.is_empty());

	hub.clock.advance(Duration::minutes(31));
	let request = hub
		.engine
		.cancellations()
		.submit_request(order.id, &STORE, "changed my mind")
		.await
		.unwrap();
	assert_eq!(request.status, CancelRequestStatus::Pending);
}

#[tokio::test]
async fn test_rejected_request_leaves_order_untouched() {
	let hub = hub().await;
	let order = paid_order(&hub).await;
	hub.engine.orders().confirm(order.id, &SUPPLIER, "").await.unwrap();
	let request = hub
		.engine
		.cancellations()
		.submit_request(order.id, &STORE, "wrong address")
		.await
		.unwrap();

	let rejected = hub
		.engine
		.cancellations()
		.audit(
			request.id,
			&ADMIN,
			AuditCancelRequest {
				decision: AuditDecision::Reject,
				remark: "already packed".into(),
			},
		)
		.await
		.unwrap();
	assert_eq!(rejected.status, CancelRequestStatus::Rejected);
	let order = hub.engine.orders().get(order.id, &STORE).await.unwrap();
	assert_eq!(order.status, OrderStatus::Confirmed);

	// A decided request cannot be audited again, and a new one may be filed.
	let again = hub
		.engine
		.cancellations()
		.audit(
			request.id,
			&ADMIN,
			AuditCancelRequest {
				decision: AuditDecision::Approve,
				remark: String::new(),
			},
		)
		.await;
	assert!(matches!(again, Err(EngineError::InvalidState(_))));
	assert!(hub
		.engine
		.cancellations()
		.submit_request(order.id, &STORE, "second try")
		.await
		.is_ok());
}

#[tokio::test]
async fn test_concurrent_requests_yield_one_pending() {
	let hub = hub().await;
	let order = paid_order(&hub).await;
	hub.engine.orders().confirm(order.id, &SUPPLIER, "").await.unwrap();

	let cancellations = hub.engine.cancellations().clone();
	let attempts = (0..8).map(|i| {
		let cancellations = cancellations.clone();
		async move {
			cancellations
				.submit_request(order.id, &STORE, &format!("attempt {}", i))
				.await
		}
	});
	let results = futures::future::join_all(attempts).await;

	let accepted = results.iter().filter(|r| r.is_ok()).count();
	let conflicts = results
		.iter()
		.filter(|r| matches!(r, Err(EngineError::Conflict(_))))
		.count();
	assert_eq!(accepted, 1);
	assert_eq!(conflicts, 7);

	let pending = hub
		.engine
		.cancellations()
		.list_requests(order.id, &STORE)
		.await
		.unwrap()
		.into_iter()
		.filter(|r| r.status == CancelRequestStatus::Pending)
		.count();
	assert_eq!(pending, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_confirm_and_cancel_leave_one_consistent_walk() {
	let hub = hub().await;
	register(&hub, STORE, TargetKind::Store, 10).await;
	let order = paid_order(&hub).await;

	let mut racers = tokio::task::JoinSet::new();
	for i in 0..16 {
		let orders = hub.engine.orders().clone();
		let cancellations = hub.engine.cancellations().clone();
		let order_id = order.id;
		racers.spawn(async move {
			if i % 2 == 0 {
				orders.confirm(order_id, &SUPPLIER, "in stock").await
			} else {
				cancellations.cancel(order_id, &ADMIN, "duplicate").await
			}
		});
	}
	let mut accepted = 0;
	while let Some(joined) = racers.join_next().await {
		match joined.unwrap() {
			Ok(_) => accepted += 1,
			Err(EngineError::InvalidState(_)) => {},
			Err(e) => panic!("unexpected error: {}", e),
		}
	}

	// Either cancel won outright, or confirm went first and one cancel followed.
	assert!((1..=2).contains(&accepted), "accepted {}", accepted);
	let logs = hub.engine.orders().logs(order.id, &ADMIN).await.unwrap();
	assert_eq!(logs.len(), 2 + accepted);
	assert_log_matches_status(&hub, order.id).await;
	let order = hub.engine.orders().get(order.id, &ADMIN).await.unwrap();
	assert_eq!(order.status, OrderStatus::Cancelled);

	let cancelled_tasks = hub
		.engine
		.webhooks()
		.list_tasks(&ADMIN, None)
		.await
		.unwrap()
		.into_iter()
		.filter(|t| t.event_type == EventType::OrderCancelled)
		.count();
	assert_eq!(cancelled_tasks, 1);
}

#[tokio::test]
async fn test_terminal_transition_closes_pending_request() {
	let hub = hub().await;
	let order = paid_order(&hub).await;
	hub.engine.orders().confirm(order.id, &SUPPLIER, "").await.unwrap();
	let request = hub
		.engine
		.cancellations()
		.submit_request(order.id, &STORE, "changed plans")
		.await
		.unwrap();

	hub.engine
		.cancellations()
		.cancel(order.id, &ADMIN, "customer called support")
		.await
		.unwrap();

	let closed = hub.engine.cancellations().get_request(request.id).await.unwrap();
	assert_eq!(closed.status, CancelRequestStatus::Approved);
	assert_eq!(
		closed.admin_remark.as_deref(),
		Some("closed automatically: order cancelled by admin 1")
	);
	assert!(hub
		.engine
		.cancellations()
		.find_inconsistencies(&ADMIN)
		.await
		.unwrap()
		.is_empty());
}

#[tokio::test]
async fn test_full_lifecycle_keeps_log_in_step() {
	let hub = hub().await;
	register(&hub, STORE, TargetKind::Store, 10).await;
	let order = paid_order(&hub).await;
	let orders = hub.engine.orders();

	orders.confirm(order.id, &SUPPLIER, "in stock").await.unwrap();
	assert_log_matches_status(&hub, order.id).await;

	let early = orders.start_delivery(order.id, &SUPPLIER, "").await;
	assert!(matches!(early, Err(EngineError::InvalidState(_))));

	orders
		.register_shipment(
			order.id,
			&SUPPLIER,
			ShipmentRequest {
				carrier: "SF Express".into(),
				tracking_no: "SF1234567890".into(),
			},
		)
		.await
		.unwrap();
	orders.start_delivery(order.id, &SUPPLIER, "").await.unwrap();
	assert_log_matches_status(&hub, order.id).await;

	let by_store = orders.complete(order.id, &STORE, "").await;
	assert!(matches!(by_store, Err(EngineError::Unauthorized(_))));

	// A grace period reaching before the earliest representable time never elapses.
	let endless = AutoCompleteMonitor::new(orders.clone(), Duration::MAX);
	assert_eq!(endless.sweep_once().await.unwrap(), 0);

	hub.clock.advance(Duration::days(7));
	let completed = hub.engine.auto_complete().sweep_once().await.unwrap();
	assert_eq!(completed, 1);

	let order = orders.get(order.id, &STORE).await.unwrap();
	assert_eq!(order.status, OrderStatus::Completed);
	let logs = orders.logs(order.id, &STORE).await.unwrap();
	assert_eq!(logs.len(), 5);
	assert_eq!(logs.last().map(|l| l.actor_id), Some(0));
	assert_log_matches_status(&hub, order.id).await;

	let reopened = orders.confirm(order.id, &SUPPLIER, "").await;
	assert!(matches!(reopened, Err(EngineError::InvalidState(_))));

	let events: Vec<EventType> = hub
		.engine
		.webhooks()
		.list_tasks(&ADMIN, None)
		.await
		.unwrap()
		.into_iter()
		.map(|t| t.event_type)
		.collect();
	assert_eq!(
		events,
		vec![
			EventType::OrderCreated,
			EventType::OrderConfirmed,
			EventType::OrderDelivering,
			EventType::OrderCompleted,
		]
	);

	orders.archive(order.id, &ADMIN).await.unwrap();
	assert!(matches!(
		orders.get(order.id, &STORE).await,
		Err(EngineError::NotFound(_))
	));
}

#[tokio::test]
async fn test_order_number_collision_is_retried() {
	let hub = hub().await;
	hub.engine
		.storage()
		.insert_if_absent(StorageKey::OrderNumbers.as_str(), "T000001", &999u64)
		.await
		.unwrap();

	let order = hub
		.engine
		.orders()
		.create(&STORE, order_request(1))
		.await
		.unwrap();
	assert_eq!(order.order_no, "T000002");
}

#[tokio::test]
async fn test_create_rejects_bad_input() {
	let hub = hub().await;
	let orders = hub.engine.orders();

	let mut empty = order_request(1);
	empty.items.clear();
	assert!(matches!(
		orders.create(&STORE, empty).await,
		Err(EngineError::Validation(_))
	));

	let mut unknown = order_request(1);
	unknown.items[0].sku_id = 404;
	assert!(matches!(
		orders.create(&STORE, unknown).await,
		Err(EngineError::NotFound(_))
	));

	assert!(matches!(
		orders.create(&STORE, order_request(0)).await,
		Err(EngineError::Validation(_))
	));

	let mut stale = order_request(1);
	stale.items[0].final_price = Some(Decimal::new(49000, 2));
	assert!(matches!(
		orders.create(&STORE, stale).await,
		Err(EngineError::Validation(_))
	));

	assert!(matches!(
		orders.create(&SUPPLIER, order_request(1)).await,
		Err(EngineError::Unauthorized(_))
	));
}

async fn markup_preview(create_material_first: bool) -> Decimal {
	let hub = hub().await;
	let store_rule = CreateMarkupRequest {
		name: "store 5%".into(),
		store_id: Some(10),
		supplier_id: None,
		category_id: None,
		material_id: None,
		kind: MarkupKind::Percentage,
		value: Decimal::new(5, 2),
		min_markup: Decimal::ZERO,
		max_markup: Decimal::ZERO,
		priority: 0,
		is_active: true,
		start_time: None,
		end_time: None,
		remark: None,
	};
	let material_rule = CreateMarkupRequest {
		name: "rice fixed".into(),
		store_id: None,
		material_id: Some(7),
		kind: MarkupKind::Fixed,
		value: Decimal::new(200, 2),
		..store_rule.clone()
	};
	let rules = if create_material_first {
		[material_rule, store_rule]
	} else {
		[store_rule, material_rule]
	};
	for rule in rules {
		hub.engine.markups().create(&ADMIN, rule).await.unwrap();
	}

	let quote = hub
		.engine
		.markups()
		.preview(&MarkupRequest {
			store_id: Some(10),
			supplier_id: Some(20),
			category_id: Some(3),
			material_id: Some(7),
			original_price: Decimal::new(10000, 2),
		})
		.unwrap();
	assert_eq!(quote.rule_name.as_deref(), Some("rice fixed"));
	assert_eq!(quote.final_price, quote.original_price + quote.markup_amount);
	quote.markup_amount
}

#[tokio::test]
async fn test_material_rule_wins_regardless_of_creation_order() {
	assert_eq!(markup_preview(true).await, Decimal::new(200, 2));
	assert_eq!(markup_preview(false).await, Decimal::new(200, 2));
}

#[tokio::test]
async fn test_order_items_snapshot_applied_rule() {
	let hub = hub().await;
	let rule = hub
		.engine
		.markups()
		.create(
			&ADMIN,
			CreateMarkupRequest {
				name: "supplier 10%".into(),
				store_id: None,
				supplier_id: Some(20),
				category_id: None,
				material_id: None,
				kind: MarkupKind::Percentage,
				value: Decimal::new(10, 2),
				min_markup: Decimal::ZERO,
				max_markup: Decimal::new(3000, 2),
				priority: 0,
				is_active: true,
				start_time: None,
				end_time: None,
				remark: None,
			},
		)
		.await
		.unwrap();

	let order = hub
		.engine
		.orders()
		.create(&STORE, order_request(2))
		.await
		.unwrap();
	let item = &order.items[0];
	assert_eq!(item.markup_amount, Decimal::new(3000, 2));
	assert_eq!(item.final_price, Decimal::new(53000, 2));
	assert_eq!(item.markup_rule_id, Some(rule.id));
	assert_eq!(order.markup_total, Decimal::new(6000, 2));
	assert_eq!(order.supplier_amount, Decimal::new(100000, 2));

	// Later rule changes do not touch the snapshot.
	hub.engine.markups().toggle(rule.id, &ADMIN).await.unwrap();
	let stored = hub.engine.orders().get(order.id, &ADMIN).await.unwrap();
	assert_eq!(stored.items[0].markup_amount, Decimal::new(3000, 2));
	hub.engine.markups().delete(rule.id, &ADMIN).await.unwrap();
}

#[tokio::test]
async fn test_exhausted_task_can_be_requeued() {
	let hub = hub().await;
	register(&hub, SUPPLIER, TargetKind::Supplier, 20).await;
	hub.recorder.failing.store(true, Ordering::SeqCst);
	hub.engine
		.orders()
		.create(&STORE, order_request(1))
		.await
		.unwrap();

	for _ in 0..2 {
		let report = hub.engine.dispatcher().drain_once().await.unwrap();
		assert_eq!(report.failed, 1);
		hub.clock.advance(Duration::minutes(6));
	}
	let report = hub.engine.dispatcher().drain_once().await.unwrap();
	assert_eq!(report.exhausted, 1);

	// Exhausted tasks stay put no matter how much time passes.
	hub.clock.advance(Duration::hours(1));
	let report = hub.engine.dispatcher().drain_once().await.unwrap();
	assert_eq!(report.claimed, 0);

	let exhausted = hub.engine.webhooks().list_exhausted(&ADMIN).await.unwrap();
	assert_eq!(exhausted.len(), 1);
	assert_eq!(exhausted[0].retry_count, 3);
	let task_id = exhausted[0].id;

	let err = hub
		.engine
		.webhooks()
		.requeue(task_id, &SUPPLIER)
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::Unauthorized(_)));

	let requeued = hub.engine.webhooks().requeue(task_id, &ADMIN).await.unwrap();
	assert_eq!(requeued.status, WebhookStatus::Pending);
	assert_eq!(requeued.retry_count, 0);

	let err = hub
		.engine
		.webhooks()
		.requeue(task_id, &ADMIN)
		.await
		.unwrap_err();
	assert!(matches!(err, EngineError::InvalidState(_)));

	hub.recorder.failing.store(false, Ordering::SeqCst);
	let report = hub.engine.dispatcher().drain_once().await.unwrap();
	assert_eq!(report.succeeded, 1);
	assert!(hub
		.engine
		.webhooks()
		.list_exhausted(&ADMIN)
		.await
		.unwrap()
		.is_empty());
}
