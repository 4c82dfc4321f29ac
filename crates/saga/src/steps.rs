//! Saga types, step names and their compensations.

pub const ORDER_FULFILLMENT: &str = "OrderFulfillment";
pub const PAYMENT_RETRY: &str = "PaymentRetry";
pub const ORDER_CANCELLATION: &str = "OrderCancellation";
pub const ORDER_REFUND: &str = "OrderRefund";

pub const STEP_CREATE_ORDER: &str = "create_order";
pub const STEP_VERIFY_ORDER: &str = "verify_order";
pub const STEP_CONFIRM_ORDER: &str = "confirm_order";
pub const STEP_CAPTURE_PAYMENT: &str = "capture_payment";
pub const STEP_MARK_PAID: &str = "mark_paid";
pub const STEP_SCHEDULE_DELIVERY: &str = "schedule_delivery";
pub const STEP_CANCEL_DELIVERY: &str = "cancel_delivery";
pub const STEP_REFUND_PAYMENT: &str = "refund_payment";
pub const STEP_CANCEL_ORDER: &str = "cancel_order";
pub const STEP_RECORD_REFUND: &str = "record_refund";

/// The action that reverses a completed step, if it has one.
pub fn compensation_for(step: &str) -> Option<&'static str> {
    match step {
        STEP_CREATE_ORDER | STEP_VERIFY_ORDER => Some(STEP_CANCEL_ORDER),
        STEP_CAPTURE_PAYMENT => Some(STEP_REFUND_PAYMENT),
        STEP_SCHEDULE_DELIVERY => Some(STEP_CANCEL_DELIVERY),
        _ => None,
    }
}
