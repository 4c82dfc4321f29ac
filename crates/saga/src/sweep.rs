//! Periodic repair of fulfillment steps lost to a crash.

use std::sync::Arc;
use std::time::Duration;

use domain::{
    Aggregate, DeliveryLifecycle, DomainError, ErrorCode, Order, OrderLifecycle, OrderStatus,
    PaymentLifecycle, PaymentStatus,
};
use event_store::EventStore;

use crate::intervention::{InterventionKind, InterventionQueue};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How long a transaction may sit in PROCESSING before it is flagged.
    pub stale_after: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub payments_marked: usize,
    pub deliveries_created: usize,
    pub stale_payments_flagged: usize,
    pub unconfirmed_refunds_flagged: usize,
    pub errors: usize,
}

impl ReconciliationReport {
    pub fn repairs(&self) -> usize {
        self.payments_marked + self.deliveries_created
    }
}

/// Finds orders whose fulfillment stopped between two steps and finishes
/// the missing step.
///
/// - CONFIRMED orders with a successful capture are marked paid.
/// - PAID orders without an active delivery get one.
/// - Captures stuck in PROCESSING are handed to an operator, never resolved
///   here, since the gateway outcome is unknown.
/// - Refund reservations that were never confirmed go to an operator too.
pub struct ReconciliationSweep<S: EventStore> {
    orders: Arc<OrderLifecycle<S>>,
    payments: Arc<PaymentLifecycle<S>>,
    deliveries: Arc<DeliveryLifecycle<S>>,
    interventions: InterventionQueue,
    config: SweepConfig,
}

impl<S: EventStore> ReconciliationSweep<S> {
    pub fn new(
        orders: Arc<OrderLifecycle<S>>,
        payments: Arc<PaymentLifecycle<S>>,
        deliveries: Arc<DeliveryLifecycle<S>>,
        interventions: InterventionQueue,
        config: SweepConfig,
    ) -> Self {
        Self {
            orders,
            payments,
            deliveries,
            interventions,
            config,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ReconciliationReport, DomainError> {
        let mut report = ReconciliationReport::default();

        for order in self.orders.orders_with_status(OrderStatus::Confirmed).await? {
            match self.finish_payment(&order).await {
                Ok(true) => report.payments_marked += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(order_id = ?order.id(), error = %err, "could not mark order paid");
                    report.errors += 1;
                }
            }
        }

        for order in self.orders.orders_with_status(OrderStatus::Paid).await? {
            match self.finish_delivery(&order).await {
                Ok(true) => report.deliveries_created += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(order_id = ?order.id(), error = %err, "could not schedule delivery");
                    report.errors += 1;
                }
            }
        }

        for tx in self.payments.stale_processing(self.config.stale_after).await? {
            let (Some(transaction_id), Some(order_id)) = (tx.id(), tx.order_id()) else {
                continue;
            };
            let raised = self
                .interventions
                .raise(
                    InterventionKind::StuckPayment,
                    order_id,
                    transaction_id,
                    format!(
                        "capture of {} processing since {:?}",
                        tx.amount(),
                        tx.processing_started_at()
                    ),
                )
                .await;
            if raised {
                report.stale_payments_flagged += 1;
            }
        }

        for tx in self.payments.unconfirmed_refunds(self.config.stale_after).await? {
            let (Some(transaction_id), Some(order_id), Some(pending)) =
                (tx.id(), tx.order_id(), tx.pending_refund())
            else {
                continue;
            };
            let raised = self
                .interventions
                .raise(
                    InterventionKind::UnconfirmedRefund,
                    order_id,
                    transaction_id,
                    format!(
                        "refund of {} requested at {} never confirmed",
                        pending.amount, pending.requested_at
                    ),
                )
                .await;
            if raised {
                report.unconfirmed_refunds_flagged += 1;
            }
        }

        if report.repairs() > 0 || report.errors > 0 {
            tracing::info!(?report, "reconciliation sweep finished");
        }
        Ok(report)
    }

    async fn finish_payment(&self, order: &Order) -> Result<bool, DomainError> {
        let Some(order_id) = order.id() else {
            return Ok(false);
        };
        let captured = self
            .payments
            .transactions_for_order(order_id)
            .await?
            .into_iter()
            .find(|tx| tx.status() == PaymentStatus::Success);
        let Some(payment_ref) = captured
            .as_ref()
            .and_then(|tx| tx.gateway_transaction_id())
        else {
            return Ok(false);
        };

        let result = self.orders.mark_paid(order_id, payment_ref).await?;
        if result.is_noop() {
            return Ok(false);
        }
        tracing::info!(%order_id, "order marked paid from captured payment");
        metrics::counter!("reconciliation_repairs_total", "kind" => "mark_paid").increment(1);
        Ok(true)
    }

    async fn finish_delivery(&self, order: &Order) -> Result<bool, DomainError> {
        let (Some(order_id), Some(customer_id), Some(address)) =
            (order.id(), order.customer_id(), order.shipping_address())
        else {
            return Ok(false);
        };
        if self
            .deliveries
            .active_delivery_for_order(order_id)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        match self
            .deliveries
            .create(order_id, customer_id, address.clone(), order.delivery_type())
            .await
        {
            Ok(_) => {
                tracing::info!(%order_id, "missing delivery created");
                metrics::counter!("reconciliation_repairs_total", "kind" => "create_delivery")
                    .increment(1);
                Ok(true)
            }
            Err(err) if err.code() == ErrorCode::DuplicateActiveEntity => Ok(false),
            Err(err) => Err(err),
        }
    }
}
