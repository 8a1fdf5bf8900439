//! Order handler for creation and forward progress.
//!
//! Prices every line through the markup engine at submission time and
//! snapshots the result on the order. Forward transitions (payment,
//! confirmation, delivery, completion) and archiving go through here.

use crate::catalog::CatalogService;
use crate::engine::event_bus::EventBus;
use crate::handlers::{ensure_readable, publish_outcome, require_admin, require_text};
use crate::numbering::OrderNumberGenerator;
use crate::state::{OrderStateMachine, Transition};
use crate::EngineError;
use chrono::Duration;
use orderhub_markup::MarkupService;
use orderhub_storage::{StorageService, Versioned};
use orderhub_types::{
	truncate_id, Actor, Clock, ConfirmPaymentRequest, CreateOrderRequest, EngineEvent, MarkupRequest,
	Order, OrderEvent, OrderItem, OrderStatus, OrderStatusLog, PaymentInfo, PaymentStatus,
	Shipment, ShipmentRequest, StorageKey,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

/// Attempts at finding an unused order number before giving up.
const MAX_ORDER_NO_ATTEMPTS: usize = 8;

pub struct OrderHandler {
	storage: Arc<StorageService>,
	state_machine: Arc<OrderStateMachine>,
	catalog: Arc<CatalogService>,
	markup: Arc<MarkupService>,
	numbers: Arc<dyn OrderNumberGenerator>,
	event_bus: EventBus,
	clock: Arc<dyn Clock>,
	service_fee_rate: Decimal,
}

impl OrderHandler {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		storage: Arc<StorageService>,
		state_machine: Arc<OrderStateMachine>,
		catalog: Arc<CatalogService>,
		markup: Arc<MarkupService>,
		numbers: Arc<dyn OrderNumberGenerator>,
		event_bus: EventBus,
		clock: Arc<dyn Clock>,
		service_fee_rate: Decimal,
	) -> Self {
		Self {
			storage,
			state_machine,
			catalog,
			markup,
			numbers,
			event_bus,
			clock,
			service_fee_rate,
		}
	}

	/// Submits a new order on behalf of a store.
	#[instrument(skip_all, fields(supplier_id = request.supplier_id))]
	pub async fn create(
		&self,
		actor: &Actor,
		request: CreateOrderRequest,
	) -> Result<Order, EngineError> {
		let store_id = match actor {
			Actor::Store(id) => *id,
			Actor::Supplier(_) | Actor::Admin(_) | Actor::System => {
				return Err(EngineError::Unauthorized("only stores can place orders".into()))
			},
		};
		if request.items.is_empty() {
			return Err(EngineError::Validation("order must contain at least one item".into()));
		}
		require_text("delivery.address", &request.delivery.address)?;

		let now = self.clock.now();
		let rules = self.markup.snapshot();
		let mut items = Vec::with_capacity(request.items.len());
		for line in &request.items {
			let quantity = u32::try_from(line.quantity)
				.ok()
				.filter(|q| *q > 0)
				.ok_or_else(|| {
					EngineError::Validation(format!(
						"quantity for sku {} must be a positive integer",
						line.sku_id
					))
				})?;
			let sku = self.catalog.get_sku(line.sku_id).await?;
			if !sku.active {
				return Err(EngineError::Validation(format!("sku {} is not available", sku.id)));
			}
			if sku.supplier_id != request.supplier_id {
				return Err(EngineError::Validation(format!(
					"sku {} does not belong to supplier {}",
					sku.id, request.supplier_id
				)));
			}

			let quote = rules.quote(
				&MarkupRequest {
					store_id: Some(store_id),
					supplier_id: Some(sku.supplier_id),
					category_id: sku.category_id,
					material_id: sku.material_id,
					original_price: sku.base_price,
				},
				now,
			);
			if line.unit_price.is_some_and(|p| p != sku.base_price) {
				return Err(EngineError::Validation(format!(
					"price of sku {} changed to {}",
					sku.id, sku.base_price
				)));
			}
			if line.final_price.is_some_and(|p| p != quote.final_price) {
				return Err(EngineError::Validation(format!(
					"final price of sku {} changed to {}",
					sku.id, quote.final_price
				)));
			}

			let mut item = OrderItem::new(sku.id, sku.name, quantity, sku.base_price, quote.markup_amount);
			item.markup_rule_id = quote.rule_id;
			item.markup_rule_name = quote.rule_name;
			items.push(item);
		}

		let order_id = self
			.storage
			.next_sequence(StorageKey::Orders.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		let order_no = self.reserve_order_no(order_id, now).await?;

		let mut order = Order {
			id: order_id,
			order_no: order_no.clone(),
			store_id,
			supplier_id: request.supplier_id,
			items,
			goods_amount: Decimal::ZERO,
			service_fee: Decimal::ZERO,
			markup_total: Decimal::ZERO,
			supplier_amount: Decimal::ZERO,
			total_amount: Decimal::ZERO,
			item_count: 0,
			status: OrderStatus::PendingPayment,
			payment_status: PaymentStatus::Unpaid,
			payment: None,
			delivery: request.delivery,
			cancellation: None,
			created_at: now,
			updated_at: now,
			confirmed_at: None,
			delivering_at: None,
			completed_at: None,
			restored_at: None,
			deleted_at: None,
		};
		order.recalculate(self.service_fee_rate);

		let outcome = match self.state_machine.create(order, *actor, "order created").await {
			Ok(outcome) => outcome,
			Err(e) => {
				if let Err(release) = self
					.storage
					.remove(StorageKey::OrderNumbers.as_str(), &order_no)
					.await
				{
					tracing::warn!(order_no = %order_no, error = %release, "Failed to release order number");
				}
				return Err(e.into());
			},
		};

		tracing::info!(
			order_id,
			order_no = %truncate_id(&order_no),
			total = %outcome.order.total_amount,
			"Order created"
		);
		publish_outcome(&self.event_bus, &outcome);
		Ok(outcome.order)
	}

	async fn reserve_order_no(
		&self,
		order_id: u64,
		now: chrono::DateTime<chrono::Utc>,
	) -> Result<String, EngineError> {
		for _ in 0..MAX_ORDER_NO_ATTEMPTS {
			let candidate = self.numbers.generate(now);
			let reserved = self
				.storage
				.insert_if_absent(StorageKey::OrderNumbers.as_str(), &candidate, &order_id)
				.await
				.map_err(|e| EngineError::Storage(e.to_string()))?;
			if reserved {
				return Ok(candidate);
			}
			tracing::warn!(order_no = %candidate, "Order number collision, regenerating");
		}
		Err(EngineError::Conflict(
			"could not allocate a unique order number".into(),
		))
	}

	pub async fn get(&self, order_id: u64, actor: &Actor) -> Result<Order, EngineError> {
		let order = self.state_machine.load(order_id).await?;
		ensure_readable(&order, actor)?;
		Ok(order)
	}

	/// Status log, oldest first.
	pub async fn logs(
		&self,
		order_id: u64,
		actor: &Actor,
	) -> Result<Vec<OrderStatusLog>, EngineError> {
		self.get(order_id, actor).await?;
		Ok(self.state_machine.logs(order_id).await?)
	}

	/// Records a successful payment reported by the payment collaborator.
	#[instrument(skip_all, fields(order_id = order_id))]
	pub async fn confirm_payment(
		&self,
		order_id: u64,
		actor: &Actor,
		request: ConfirmPaymentRequest,
	) -> Result<Order, EngineError> {
		require_text("method", &request.method)?;
		require_text("reference", &request.reference)?;
		let payment = PaymentInfo {
			method: request.method,
			reference: request.reference,
			paid_at: self.clock.now(),
		};
		let remark = format!("paid via {}", payment.method);
		let outcome = self
			.state_machine
			.transition(
				order_id,
				Transition::new(OrderStatus::PendingConfirm, *actor, remark).with_payment(payment),
			)
			.await?;
		publish_outcome(&self.event_bus, &outcome);
		self.event_bus
			.publish(EngineEvent::Order(OrderEvent::PaymentConfirmed { order_id }));
		Ok(outcome.order)
	}

	pub async fn confirm(
		&self,
		order_id: u64,
		actor: &Actor,
		remark: &str,
	) -> Result<Order, EngineError> {
		self.advance(order_id, actor, OrderStatus::Confirmed, remark, "order confirmed")
			.await
	}

	/// Registers or corrects the waybill of a confirmed order.
	pub async fn register_shipment(
		&self,
		order_id: u64,
		actor: &Actor,
		request: ShipmentRequest,
	) -> Result<Shipment, EngineError> {
		require_text("carrier", &request.carrier)?;
		require_text("tracking_no", &request.tracking_no)?;

		let _guard = self.state_machine.lock(order_id).await;
		let order = self.state_machine.load(order_id).await?;
		ensure_readable(&order, actor)?;
		match actor {
			Actor::Supplier(_) => {},
			Actor::Store(_) | Actor::Admin(_) | Actor::System => {
				return Err(EngineError::Unauthorized(
					"only the supplier can register a shipment".into(),
				))
			},
		}
		if !matches!(order.status, OrderStatus::Confirmed | OrderStatus::Delivering) {
			return Err(EngineError::InvalidState(format!(
				"cannot register a shipment for an order that is {}",
				order.status
			)));
		}

		let shipment = Shipment {
			order_id,
			carrier: request.carrier,
			tracking_no: request.tracking_no,
			created_at: self.clock.now(),
		};
		self.storage
			.store(StorageKey::Shipments.as_str(), &order_id.to_string(), &shipment)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		tracing::info!(order_id, carrier = %shipment.carrier, "Shipment registered");
		Ok(shipment)
	}

	pub async fn shipment(&self, order_id: u64, actor: &Actor) -> Result<Shipment, EngineError> {
		self.get(order_id, actor).await?;
		self.storage
			.find(StorageKey::Shipments.as_str(), &order_id.to_string())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.ok_or_else(|| EngineError::NotFound(format!("shipment for order {}", order_id)))
	}

	pub async fn start_delivery(
		&self,
		order_id: u64,
		actor: &Actor,
		remark: &str,
	) -> Result<Order, EngineError> {
		self.advance(order_id, actor, OrderStatus::Delivering, remark, "delivery started")
			.await
	}

	pub async fn complete(
		&self,
		order_id: u64,
		actor: &Actor,
		remark: &str,
	) -> Result<Order, EngineError> {
		self.advance(order_id, actor, OrderStatus::Completed, remark, "order completed")
			.await
	}

	async fn advance(
		&self,
		order_id: u64,
		actor: &Actor,
		to: OrderStatus,
		remark: &str,
		default_remark: &str,
	) -> Result<Order, EngineError> {
		let remark = if remark.trim().is_empty() {
			default_remark
		} else {
			remark
		};
		let outcome = self
			.state_machine
			.transition(order_id, Transition::new(to, *actor, remark))
			.await?;
		publish_outcome(&self.event_bus, &outcome);
		Ok(outcome.order)
	}

	/// Soft-deletes a terminal order. Administrators only.
	pub async fn archive(&self, order_id: u64, actor: &Actor) -> Result<Order, EngineError> {
		require_admin(actor)?;
		let _guard = self.state_machine.lock(order_id).await;
		let key = order_id.to_string();
		let current: Versioned<Order> = self
			.storage
			.retrieve_versioned(StorageKey::Orders.as_str(), &key)
			.await
			.map_err(|e| match e {
				orderhub_storage::StorageError::NotFound => {
					EngineError::NotFound(format!("order {}", order_id))
				},
				other => EngineError::Storage(other.to_string()),
			})?;
		if current.value.is_archived() {
			return Err(EngineError::NotFound(format!("order {}", order_id)));
		}
		if !current.value.status.is_terminal() {
			return Err(EngineError::InvalidState(format!(
				"only completed or cancelled orders can be archived; order is {}",
				current.value.status
			)));
		}

		let now = self.clock.now();
		let mut order = current.value.clone();
		order.deleted_at = Some(now);
		order.updated_at = now;
		let swapped = self
			.storage
			.swap_versioned(StorageKey::Orders.as_str(), &key, &current, &order)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;
		if !swapped {
			return Err(EngineError::Conflict(format!(
				"order {} was modified concurrently",
				order_id
			)));
		}
		tracing::info!(order_id, "Order archived");
		Ok(order)
	}

	/// Ids of delivering orders whose delivery started at least `grace` ago.
	pub async fn overdue_deliveries(&self, grace: Duration) -> Result<Vec<u64>, EngineError> {
		let Some(cutoff) = self.clock.now().checked_sub_signed(grace) else {
			return Ok(Vec::new());
		};
		let mut ids: Vec<u64> = self
			.storage
			.retrieve_all::<Order>(StorageKey::Orders.as_str())
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?
			.into_iter()
			.map(|(_, order)| order)
			.filter(|order| {
				order.status == OrderStatus::Delivering
					&& !order.is_archived()
					&& order.delivering_at.is_some_and(|at| at <= cutoff)
			})
			.map(|order| order.id)
			.collect();
		ids.sort_unstable();
		Ok(ids)
	}
}
