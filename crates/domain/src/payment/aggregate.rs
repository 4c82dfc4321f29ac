//! PaymentTransaction aggregate.

use chrono::{DateTime, Utc};
use common::{AggregateId, CustomerId};
use event_store::Version;

use crate::aggregate::Aggregate;
use crate::value_objects::Money;

use super::events::{
    PaymentCancelledData, PaymentDetails, PaymentFailedData, PaymentInitiatedData,
    PaymentProcessingData, PaymentRefundAbandonedData, PaymentRefundRequestedData,
    PaymentRefundedData, PaymentSucceededData,
};
use super::{
    FailureReason, GatewayDecline, GatewayReceipt, PaymentError, PaymentEvent, PaymentMethod,
    PaymentStatus,
};

/// Request to open a transaction for an order.
#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub transaction_id: AggregateId,
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub amount: Money,
    pub method: PaymentMethod,
}

/// Recorded when the gateway declines or does not answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailure {
    pub reason: FailureReason,
    pub message: String,
    pub retryable: bool,
}

impl PaymentFailure {
    pub fn to_error(&self) -> PaymentError {
        PaymentError::GatewayFailure {
            reason: self.reason,
            message: self.message.clone(),
        }
    }
}

/// A refund reserved on the transaction but not yet confirmed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRefund {
    pub amount: Money,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentTransaction {
    id: Option<AggregateId>,
    version: Version,
    order_id: Option<AggregateId>,
    customer_id: Option<CustomerId>,
    amount: Money,
    method: Option<PaymentMethod>,
    status: PaymentStatus,
    failure: Option<PaymentFailure>,
    gateway_transaction_id: Option<String>,
    initiated_at: Option<DateTime<Utc>>,
    processing_started_at: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    refunded_amount: Money,
    refund_count: u32,
    pending_refund: Option<PendingRefund>,
}

impl Aggregate for PaymentTransaction {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "PaymentTransaction"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PaymentEvent::PaymentInitiated(data) => {
                self.id = Some(data.details.transaction_id);
                self.order_id = Some(data.details.order_id);
                self.customer_id = Some(data.details.customer_id);
                self.amount = data.details.amount;
                self.method = Some(data.method);
                self.status = PaymentStatus::Pending;
                self.initiated_at = Some(data.initiated_at);
            }
            PaymentEvent::PaymentProcessingStarted(data) => {
                self.status = PaymentStatus::Processing;
                self.processing_started_at = Some(data.started_at);
            }
            PaymentEvent::PaymentSucceeded(data) => {
                self.status = PaymentStatus::Success;
                self.gateway_transaction_id = Some(data.gateway_transaction_id);
                self.processed_at = Some(data.processed_at);
            }
            PaymentEvent::PaymentFailed(data) => {
                self.status = PaymentStatus::Failed;
                self.failure = Some(PaymentFailure {
                    reason: data.reason,
                    message: data.message,
                    retryable: data.retryable,
                });
                self.processed_at = Some(data.failed_at);
            }
            PaymentEvent::PaymentRefundRequested(data) => {
                self.pending_refund = Some(PendingRefund {
                    amount: data.refund_amount,
                    reason: data.reason,
                    requested_at: data.requested_at,
                });
            }
            PaymentEvent::PaymentRefundAbandoned(_) => {
                self.pending_refund = None;
            }
            PaymentEvent::PaymentRefunded(data) => {
                self.pending_refund = None;
                self.refunded_amount = data.total_refunded;
                self.refund_count += 1;
                if data.fully_refunded {
                    self.status = PaymentStatus::Refunded;
                }
            }
            PaymentEvent::PaymentCancelled(_) => {
                self.status = PaymentStatus::Cancelled;
            }
        }
    }
}

// Query methods
impl PaymentTransaction {
    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn method(&self) -> Option<&PaymentMethod> {
        self.method.as_ref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&PaymentFailure> {
        self.failure.as_ref()
    }

    pub fn gateway_transaction_id(&self) -> Option<&str> {
        self.gateway_transaction_id.as_deref()
    }

    pub fn initiated_at(&self) -> Option<DateTime<Utc>> {
        self.initiated_at
    }

    pub fn processing_started_at(&self) -> Option<DateTime<Utc>> {
        self.processing_started_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn refund_count(&self) -> u32 {
        self.refund_count
    }

    pub fn pending_refund(&self) -> Option<&PendingRefund> {
        self.pending_refund.as_ref()
    }

    /// Captured amount not yet returned. Zero unless the capture succeeded.
    pub fn refundable_amount(&self) -> Money {
        match self.status {
            PaymentStatus::Success => self.amount - self.refunded_amount,
            _ => Money::zero(),
        }
    }
}

// Command methods (return events)
impl PaymentTransaction {
    /// Opens the transaction and hands it to the gateway in one step.
    pub fn initiate(&self, cmd: &InitiatePayment) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyInitiated);
        }
        if !cmd.amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount: cmd.amount });
        }

        let details = PaymentDetails {
            transaction_id: cmd.transaction_id,
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            amount: cmd.amount,
        };
        let now = Utc::now();
        Ok(vec![
            PaymentEvent::PaymentInitiated(PaymentInitiatedData {
                details: details.clone(),
                method: cmd.method.clone(),
                initiated_at: now,
            }),
            PaymentEvent::PaymentProcessingStarted(PaymentProcessingData {
                details,
                started_at: now,
            }),
        ])
    }

    /// Records the gateway outcome. Returns no events when the transaction
    /// has left PROCESSING in the meantime, so a late answer is dropped.
    pub fn settle(
        &self,
        outcome: &Result<GatewayReceipt, GatewayDecline>,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        let details = self.details()?;
        if self.status != PaymentStatus::Processing {
            return Ok(vec![]);
        }

        let now = Utc::now();
        let event = match outcome {
            Ok(receipt) => PaymentEvent::PaymentSucceeded(PaymentSucceededData {
                details,
                gateway_transaction_id: receipt.gateway_ref.clone(),
                processed_at: now,
            }),
            Err(decline) => PaymentEvent::PaymentFailed(PaymentFailedData {
                details,
                reason: decline.reason,
                message: decline.message.clone(),
                retryable: decline.reason.retryable(),
                failed_at: now,
            }),
        };
        Ok(vec![event])
    }

    /// Validates a refund without recording it. Returns the gateway reference
    /// of the original charge.
    pub fn check_refund(&self, amount: Money) -> Result<&str, PaymentError> {
        self.details()?;
        if self.status != PaymentStatus::Success {
            return Err(PaymentError::InvalidState {
                from: self.status,
                to: PaymentStatus::Refunded,
            });
        }
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount });
        }
        if let Some(pending) = &self.pending_refund {
            return Err(PaymentError::RefundInProgress {
                amount: pending.amount,
            });
        }
        let available = self.refundable_amount();
        if amount > available {
            return Err(PaymentError::InsufficientRefundAmount {
                requested: amount,
                available,
            });
        }
        self.gateway_transaction_id
            .as_deref()
            .ok_or(PaymentError::NotInitiated)
    }

    /// Reserves `amount` so no other refund can claim it while the gateway
    /// is being asked to send it.
    pub fn request_refund(
        &self,
        amount: Money,
        reason: &str,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.check_refund(amount)?;
        Ok(vec![PaymentEvent::PaymentRefundRequested(
            PaymentRefundRequestedData {
                details: self.details()?,
                refund_amount: amount,
                reason: reason.to_string(),
                requested_at: Utc::now(),
            },
        )])
    }

    /// Records the gateway's confirmation of the pending refund.
    pub fn complete_refund(
        &self,
        gateway_refund_id: &str,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        let pending = self
            .pending_refund
            .as_ref()
            .ok_or(PaymentError::NoRefundRequested)?;

        let total_refunded = self.refunded_amount + pending.amount;
        Ok(vec![PaymentEvent::PaymentRefunded(PaymentRefundedData {
            details: self.details()?,
            refund_amount: pending.amount,
            total_refunded,
            reason: pending.reason.clone(),
            gateway_refund_id: gateway_refund_id.to_string(),
            fully_refunded: total_refunded == self.amount,
            refunded_at: Utc::now(),
        })])
    }

    /// Releases the pending refund after the gateway refused it.
    pub fn abandon_refund(&self, message: &str) -> Result<Vec<PaymentEvent>, PaymentError> {
        let pending = self
            .pending_refund
            .as_ref()
            .ok_or(PaymentError::NoRefundRequested)?;
        Ok(vec![PaymentEvent::PaymentRefundAbandoned(
            PaymentRefundAbandonedData {
                details: self.details()?,
                refund_amount: pending.amount,
                message: message.to_string(),
                abandoned_at: Utc::now(),
            },
        )])
    }

    pub fn cancel(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        let details = self.details()?;
        if !self.status.can_transition_to(PaymentStatus::Cancelled) {
            return Err(PaymentError::InvalidState {
                from: self.status,
                to: PaymentStatus::Cancelled,
            });
        }
        Ok(vec![PaymentEvent::PaymentCancelled(PaymentCancelledData {
            details,
            cancelled_at: Utc::now(),
        })])
    }

    fn details(&self) -> Result<PaymentDetails, PaymentError> {
        match (self.id, self.order_id, self.customer_id) {
            (Some(transaction_id), Some(order_id), Some(customer_id)) => Ok(PaymentDetails {
                transaction_id,
                order_id,
                customer_id,
                amount: self.amount,
            }),
            _ => Err(PaymentError::NotInitiated),
        }
    }
}
