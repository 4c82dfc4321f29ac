//! Fulfillment coordinator: runs the order sagas over the three lifecycles.

use std::sync::Arc;

use common::{AggregateId, CustomerId};
use domain::{
    Address, Aggregate, CarrierClient, CommandHandler, CreateOrder, DeliveryLifecycle,
    DeliveryRequest, DeliveryStatus, DeliveryType, DomainError, ErrorCode, Order, OrderError,
    OrderLifecycle, OrderLineItem, OrderStatus, PaymentConfig, PaymentGateway, PaymentLifecycle,
    PaymentMethod, PaymentStatus, PaymentTransaction, PricingPolicy,
};
use event_bus::{EventBus, Idempotent};
use event_store::{EventQuery, EventStore, EventStoreExt};

use crate::aggregate::SagaInstance;
use crate::compensation::PaymentCompensation;
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::intervention::{InterventionKind, InterventionQueue};
use crate::log::{Halt, SagaLog};
use crate::reactor::FulfillmentReactor;
use crate::steps::{self, compensation_for};
use crate::sweep::{ReconciliationSweep, SweepConfig};

/// A customer's order as submitted for fulfillment.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub items: Vec<OrderLineItem>,
    pub shipping_address: Address,
    pub delivery_type: DeliveryType,
    pub payment_method: PaymentMethod,
}

impl PlaceOrder {
    pub fn new(
        customer_id: CustomerId,
        items: Vec<OrderLineItem>,
        shipping_address: Address,
        delivery_type: DeliveryType,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            order_id: AggregateId::new(),
            customer_id,
            items,
            shipping_address,
            delivery_type,
            payment_method,
        }
    }
}

/// What a completed fulfillment saga produced.
#[derive(Debug, Clone)]
pub struct FulfillmentOutcome {
    pub saga_id: AggregateId,
    pub order: Order,
    pub transaction: PaymentTransaction,
    pub delivery: DeliveryRequest,
}

/// Lifecycle collaborators and tunables for a coordinator.
pub struct CoordinatorDeps {
    pub gateway: Arc<dyn PaymentGateway>,
    pub carrier: Arc<dyn CarrierClient>,
    pub pricing: PricingPolicy,
    pub payment: PaymentConfig,
    pub interventions: InterventionQueue,
}

/// Orchestrates orders, payments and deliveries.
///
/// Each public operation runs as an event-sourced saga: every step is
/// recorded, and a non-retryable failure compensates the completed steps in
/// reverse. A retryable failure suspends the saga instead and leaves the
/// order where a retry can pick it up. Events published by the lifecycles
/// drive the rest of the flow through [`FulfillmentReactor`].
pub struct OrderFulfillmentCoordinator<S: EventStore + Clone> {
    bus: EventBus,
    sagas: CommandHandler<S, SagaInstance>,
    orders: Arc<OrderLifecycle<S>>,
    payments: Arc<PaymentLifecycle<S>>,
    deliveries: Arc<DeliveryLifecycle<S>>,
    interventions: InterventionQueue,
}

impl<S: EventStore + Clone + 'static> OrderFulfillmentCoordinator<S> {
    pub fn new(store: S, bus: EventBus, deps: CoordinatorDeps) -> Self {
        let payments = Arc::new(PaymentLifecycle::new(
            store.clone(),
            bus.clone(),
            deps.gateway,
            deps.payment,
        ));
        let refunds = Arc::new(PaymentCompensation::new(payments.clone()));
        let orders = Arc::new(OrderLifecycle::new(
            store.clone(),
            bus.clone(),
            deps.pricing,
            refunds,
        ));
        let deliveries = Arc::new(DeliveryLifecycle::new(
            store.clone(),
            bus.clone(),
            deps.carrier,
        ));

        Self {
            bus,
            sagas: CommandHandler::new(store),
            orders,
            payments,
            deliveries,
            interventions: deps.interventions,
        }
    }

    /// Subscribes the event reactor. Call once, before replaying the store.
    pub async fn start(&self) {
        let reactor = FulfillmentReactor::new(self.orders.clone(), self.interventions.clone());
        self.bus.subscribe(Arc::new(Idempotent::new(reactor))).await;
    }

    pub fn orders(&self) -> &Arc<OrderLifecycle<S>> {
        &self.orders
    }

    pub fn payments(&self) -> &Arc<PaymentLifecycle<S>> {
        &self.payments
    }

    pub fn deliveries(&self) -> &Arc<DeliveryLifecycle<S>> {
        &self.deliveries
    }

    pub fn interventions(&self) -> &InterventionQueue {
        &self.interventions
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn sweep(&self, config: SweepConfig) -> ReconciliationSweep<S> {
        ReconciliationSweep::new(
            self.orders.clone(),
            self.payments.clone(),
            self.deliveries.clone(),
            self.interventions.clone(),
            config,
        )
    }

    /// Creates, confirms, pays for and schedules delivery of an order.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn place_order(&self, request: PlaceOrder) -> Result<FulfillmentOutcome> {
        let mut log =
            SagaLog::start(self.sagas.store(), steps::ORDER_FULFILLMENT, request.order_id).await?;

        let cmd = CreateOrder::new(
            request.customer_id,
            request.items,
            request.shipping_address,
            request.delivery_type,
        )
        .with_order_id(request.order_id);
        let method = request.payment_method;

        let run = async {
            log.step(steps::STEP_CREATE_ORDER, self.orders.create(cmd), |_| {
                SagaEvent::step_completed(steps::STEP_CREATE_ORDER)
            })
            .await?;
            let outcome = self.pay_and_schedule(&mut log, method, true).await?;
            Ok::<_, Halt>(outcome)
        };
        let result = run.await;
        self.conclude(log, result).await
    }

    /// Charges again for a CONFIRMED order whose last attempt failed with a
    /// retryable reason, then finishes fulfillment.
    #[tracing::instrument(skip(self, method))]
    pub async fn retry_payment(
        &self,
        order_id: AggregateId,
        method: PaymentMethod,
    ) -> Result<FulfillmentOutcome> {
        let order = self.orders.get(order_id).await?;
        if order.status() != OrderStatus::Confirmed {
            return Err(SagaError::OrderNotReady {
                order_id,
                status: order.status(),
                expected: OrderStatus::Confirmed.as_str(),
            });
        }

        let mut log = SagaLog::start(self.sagas.store(), steps::PAYMENT_RETRY, order_id).await?;
        let run = async {
            log.step(
                steps::STEP_VERIFY_ORDER,
                self.expect_status(order_id, OrderStatus::Confirmed),
                |_| SagaEvent::step_completed(steps::STEP_VERIFY_ORDER),
            )
            .await?;
            let outcome = self.pay_and_schedule(&mut log, method, false).await?;
            Ok::<_, Halt>(outcome)
        };
        let result = run.await;
        self.conclude(log, result).await
    }

    /// Cancels an order on the customer's behalf.
    ///
    /// A pending delivery is cancelled first so nothing ships while the
    /// payment is being returned. If the refund fails the order stays PAID.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: AggregateId, reason: &str) -> Result<Order> {
        let order = self.orders.get(order_id).await?;
        if !matches!(
            order.status(),
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Paid
        ) {
            return Err(SagaError::OrderNotReady {
                order_id,
                status: order.status(),
                expected: "PENDING, CONFIRMED or PAID",
            });
        }

        let mut log =
            SagaLog::start(self.sagas.store(), steps::ORDER_CANCELLATION, order_id).await?;
        let run = async {
            let active = self
                .deliveries
                .active_delivery_for_order(order_id)
                .await
                .map_err(|error| Halt::Step {
                    step: steps::STEP_CANCEL_DELIVERY,
                    error,
                })?;
            if let Some(delivery) = active {
                if let Some(delivery_id) = delivery.id() {
                    log.step(
                        steps::STEP_CANCEL_DELIVERY,
                        self.deliveries.cancel(delivery_id),
                        |_| SagaEvent::step_completed(steps::STEP_CANCEL_DELIVERY),
                    )
                    .await?;
                }
            }

            if order.status() == OrderStatus::Paid {
                log.step(
                    steps::STEP_REFUND_PAYMENT,
                    self.payments.refund_remaining_for_order(order_id, reason),
                    |_| SagaEvent::step_completed(steps::STEP_REFUND_PAYMENT),
                )
                .await?;
            }

            let cancelled = log
                .step(
                    steps::STEP_CANCEL_ORDER,
                    self.orders.cancel(order_id, reason),
                    |_| SagaEvent::step_completed(steps::STEP_CANCEL_ORDER),
                )
                .await?;
            Ok::<_, Halt>(cancelled.aggregate)
        };
        let result = run.await;
        self.conclude(log, result).await
    }

    /// Returns the full payment of a PAID, SHIPPED or DELIVERED order and
    /// records the order as REFUNDED.
    #[tracing::instrument(skip(self))]
    pub async fn refund_order(&self, order_id: AggregateId, reason: &str) -> Result<Order> {
        let order = self.orders.get(order_id).await?;
        if !order.status().can_transition_to(OrderStatus::Refunded) {
            return Err(SagaError::OrderNotReady {
                order_id,
                status: order.status(),
                expected: "PAID, SHIPPED or DELIVERED",
            });
        }

        let mut log = SagaLog::start(self.sagas.store(), steps::ORDER_REFUND, order_id).await?;
        let run = async {
            log.step(
                steps::STEP_REFUND_PAYMENT,
                self.payments.refund_remaining_for_order(order_id, reason),
                |_| SagaEvent::step_completed(steps::STEP_REFUND_PAYMENT),
            )
            .await?;
            let refunded = log
                .step(
                    steps::STEP_RECORD_REFUND,
                    self.orders.refund(order_id, reason),
                    |_| SagaEvent::step_completed(steps::STEP_RECORD_REFUND),
                )
                .await?;
            Ok::<_, Halt>(refunded.aggregate)
        };
        let result = run.await;
        self.conclude(log, result).await
    }

    pub async fn get_saga(&self, saga_id: AggregateId) -> Result<SagaInstance> {
        self.sagas
            .load_existing(saga_id)
            .await?
            .ok_or(SagaError::SagaNotFound(saga_id))
    }

    /// Every saga run for an order, oldest first.
    pub async fn sagas_for_order(&self, order_id: AggregateId) -> Result<Vec<SagaInstance>> {
        let query =
            EventQuery::for_aggregate_type(SagaInstance::aggregate_type()).order_id(order_id);
        let ids = self.sagas.store().aggregate_ids(query).await?;

        let mut sagas = Vec::with_capacity(ids.len());
        for id in ids {
            sagas.push(self.get_saga(id).await?);
        }
        Ok(sagas)
    }

    /// Confirm (first attempt only), capture, mark paid, schedule delivery.
    async fn pay_and_schedule(
        &self,
        log: &mut SagaLog<'_, S>,
        method: PaymentMethod,
        confirm: bool,
    ) -> std::result::Result<FulfillmentOutcome, Halt> {
        let order_id = log.order_id();

        let order = if confirm {
            log.step(steps::STEP_CONFIRM_ORDER, self.orders.confirm(order_id), |_| {
                SagaEvent::step_completed(steps::STEP_CONFIRM_ORDER)
            })
            .await?
            .aggregate
        } else {
            self.orders.get(order_id).await.map_err(|error| Halt::Step {
                step: steps::STEP_VERIFY_ORDER,
                error,
            })?
        };

        let transaction = log
            .step(
                steps::STEP_CAPTURE_PAYMENT,
                self.capture(&order, method),
                |tx: &PaymentTransaction| match tx.id() {
                    Some(id) => SagaEvent::payment_captured(steps::STEP_CAPTURE_PAYMENT, id),
                    None => SagaEvent::step_completed(steps::STEP_CAPTURE_PAYMENT),
                },
            )
            .await?;

        let payment_ref = transaction.gateway_transaction_id().unwrap_or_default().to_string();
        let paid = log
            .step(
                steps::STEP_MARK_PAID,
                self.orders.mark_paid(order_id, &payment_ref),
                |_| SagaEvent::step_completed(steps::STEP_MARK_PAID),
            )
            .await?
            .aggregate;

        let delivery = log
            .step(
                steps::STEP_SCHEDULE_DELIVERY,
                self.schedule_delivery(&paid),
                |delivery: &DeliveryRequest| match delivery.id() {
                    Some(id) => SagaEvent::delivery_scheduled(steps::STEP_SCHEDULE_DELIVERY, id),
                    None => SagaEvent::step_completed(steps::STEP_SCHEDULE_DELIVERY),
                },
            )
            .await?;

        Ok(FulfillmentOutcome {
            saga_id: log.saga_id(),
            order: paid,
            transaction,
            delivery,
        })
    }

    /// Captures the order total. A FAILED transaction becomes the step's
    /// error so the saga can decide between suspending and compensating.
    async fn capture(
        &self,
        order: &Order,
        method: PaymentMethod,
    ) -> std::result::Result<PaymentTransaction, DomainError> {
        let (order_id, customer_id) = owner_of(order)?;
        let tx = self
            .payments
            .capture(order_id, customer_id, order.total_amount(), method)
            .await?;

        match (tx.status(), tx.failure()) {
            (PaymentStatus::Success, _) => Ok(tx),
            (_, Some(failure)) => Err(failure.to_error().into()),
            (status, None) => Err(DomainError::Internal(format!(
                "capture finished in {status}"
            ))),
        }
    }

    async fn schedule_delivery(
        &self,
        order: &Order,
    ) -> std::result::Result<DeliveryRequest, DomainError> {
        let (order_id, customer_id) = owner_of(order)?;
        let address = order
            .shipping_address()
            .cloned()
            .ok_or(DomainError::Internal(format!("order {order_id} has no shipping address")))?;

        // a sweep repair may already have scheduled it
        if let Some(existing) = self.deliveries.active_delivery_for_order(order_id).await? {
            tracing::info!(%order_id, delivery_id = ?existing.id(), "adopting existing delivery");
            return Ok(existing);
        }

        match self
            .deliveries
            .create(order_id, customer_id, address, order.delivery_type())
            .await
        {
            Ok(created) => Ok(created.aggregate),
            Err(err) if err.code() == ErrorCode::DuplicateActiveEntity => self
                .deliveries
                .active_delivery_for_order(order_id)
                .await?
                .ok_or(err),
            Err(err) => Err(err),
        }
    }

    async fn expect_status(
        &self,
        order_id: AggregateId,
        expected: OrderStatus,
    ) -> std::result::Result<Order, DomainError> {
        let order = self.orders.get(order_id).await?;
        if order.status() != expected {
            return Err(OrderError::InvalidState {
                from: order.status(),
                to: expected,
            }
            .into());
        }
        Ok(order)
    }

    /// Records the end of a run and turns a halt into the caller's error.
    async fn conclude<T>(
        &self,
        mut log: SagaLog<'_, S>,
        result: std::result::Result<T, Halt>,
    ) -> Result<T> {
        let (step, error) = match result {
            Ok(value) => {
                log.record(SagaEvent::saga_completed()).await?;
                return Ok(value);
            }
            Err(Halt::Log(err)) => return Err(err),
            Err(Halt::Step { step, error }) => (step, error),
        };

        if error.is_retryable() {
            log.record(SagaEvent::saga_suspended(format!("{step}: {error}")))
                .await?;
        } else {
            self.compensate(&mut log, step).await?;
            log.record(SagaEvent::saga_failed(format!("{step}: {error}")))
                .await?;
        }

        Err(SagaError::StepFailed {
            saga_id: log.saga_id(),
            order_id: log.order_id(),
            step,
            source: error,
        })
    }

    /// Reverses completed steps, newest first. A compensation that fails is
    /// recorded and handed to an operator; the rest still run.
    async fn compensate(&self, log: &mut SagaLog<'_, S>, failed_step: &str) -> Result<()> {
        let pending: Vec<&'static str> = log
            .saga()
            .completed_steps()
            .iter()
            .rev()
            .filter_map(|step| compensation_for(step))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        log.record(SagaEvent::compensation_started(failed_step))
            .await?;
        let reason = format!("{} failed at {failed_step}", log.saga().saga_type());

        for step in pending {
            let outcome = self.run_compensation(log, step, &reason).await;
            match outcome {
                Ok(()) => {
                    log.record(SagaEvent::compensation_step_completed(step))
                        .await?;
                }
                Err(error) => {
                    log.record(SagaEvent::compensation_step_failed(step, &error))
                        .await?;
                    self.interventions
                        .raise(
                            InterventionKind::CompensationFailed,
                            log.order_id(),
                            log.saga_id(),
                            format!("{step}: {error}"),
                        )
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn run_compensation(
        &self,
        log: &SagaLog<'_, S>,
        step: &str,
        reason: &str,
    ) -> std::result::Result<(), DomainError> {
        let order_id = log.order_id();
        match step {
            steps::STEP_CANCEL_ORDER => {
                let order = self.orders.get(order_id).await?;
                if order.status() != OrderStatus::Cancelled {
                    self.orders.cancel(order_id, reason).await?;
                }
            }
            steps::STEP_REFUND_PAYMENT => {
                let refunded = self
                    .payments
                    .refund_remaining_for_order(order_id, reason)
                    .await?;
                tracing::info!(%order_id, %refunded, "capture compensated");
            }
            steps::STEP_CANCEL_DELIVERY => {
                if let Some(delivery_id) = log.saga().delivery_id() {
                    let delivery = self.deliveries.get(delivery_id).await?;
                    if delivery.status() != DeliveryStatus::Cancelled {
                        self.deliveries.cancel(delivery_id).await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn owner_of(order: &Order) -> std::result::Result<(AggregateId, CustomerId), DomainError> {
    match (order.id(), order.customer_id()) {
        (Some(order_id), Some(customer_id)) => Ok((order_id, customer_id)),
        _ => Err(DomainError::Internal("order has not been created".into())),
    }
}
