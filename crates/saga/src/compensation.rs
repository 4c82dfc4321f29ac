//! Refund port backed by the payment lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{DomainError, Money, PaymentLifecycle, RefundPort};
use event_store::EventStore;

/// Lets the order lifecycle request a refund without owning payments.
pub struct PaymentCompensation<S: EventStore> {
    payments: Arc<PaymentLifecycle<S>>,
}

impl<S: EventStore> PaymentCompensation<S> {
    pub fn new(payments: Arc<PaymentLifecycle<S>>) -> Self {
        Self { payments }
    }
}

#[async_trait]
impl<S: EventStore> RefundPort for PaymentCompensation<S> {
    async fn refund_order(&self, order_id: AggregateId, reason: &str) -> Result<Money, DomainError> {
        self.payments
            .refund_remaining_for_order(order_id, reason)
            .await
    }
}
