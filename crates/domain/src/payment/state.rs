//! Payment state machine and failure taxonomy.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// ```text
/// PENDING ──► PROCESSING ──► SUCCESS ──► REFUNDED
///    │            │    └───► FAILED
///    └────────────┴────────► CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Success,
    Failed,
    Refunded,
    Cancelled,
}

static TRANSITIONS: LazyLock<HashMap<PaymentStatus, HashSet<PaymentStatus>>> =
    LazyLock::new(|| {
        use PaymentStatus::*;
        HashMap::from([
            (Pending, HashSet::from([Processing, Cancelled])),
            (Processing, HashSet::from([Success, Failed, Cancelled])),
            (Success, HashSet::from([Refunded])),
            (Failed, HashSet::new()),
            (Refunded, HashSet::new()),
            (Cancelled, HashSet::new()),
        ])
    });

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 6] = [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Success,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
        PaymentStatus::Cancelled,
    ];

    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        TRANSITIONS.get(self).is_some_and(|next| next.contains(&to))
    }

    pub fn is_terminal(&self) -> bool {
        TRANSITIONS.get(self).is_none_or(|next| next.is_empty())
    }

    /// PENDING, PROCESSING and SUCCESS block a second capture for the order.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a capture failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    InsufficientFunds,
    InvalidCard,
    ExpiredCard,
    CardDeclined,
    InvalidCvv,
    GatewayError,
    NetworkError,
    Timeout,
    FraudDetected,
    CardBlocked,
    LimitExceeded,
    SystemError,
    Unknown,
}

impl FailureReason {
    /// Whether the same order may be charged again. Only transient faults
    /// and balance or limit declines qualify.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::GatewayError
                | FailureReason::NetworkError
                | FailureReason::Timeout
                | FailureReason::SystemError
                | FailureReason::InsufficientFunds
                | FailureReason::LimitExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientFunds => "INSUFFICIENT_FUNDS",
            FailureReason::InvalidCard => "INVALID_CARD",
            FailureReason::ExpiredCard => "EXPIRED_CARD",
            FailureReason::CardDeclined => "CARD_DECLINED",
            FailureReason::InvalidCvv => "INVALID_CVV",
            FailureReason::GatewayError => "GATEWAY_ERROR",
            FailureReason::NetworkError => "NETWORK_ERROR",
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::FraudDetected => "FRAUD_DETECTED",
            FailureReason::CardBlocked => "CARD_BLOCKED",
            FailureReason::LimitExceeded => "LIMIT_EXCEEDED",
            FailureReason::SystemError => "SYSTEM_ERROR",
            FailureReason::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;
    use proptest::prelude::*;

    const ALLOWED: [(PaymentStatus, PaymentStatus); 6] = [
        (Pending, Processing),
        (Pending, Cancelled),
        (Processing, Success),
        (Processing, Failed),
        (Processing, Cancelled),
        (Success, Refunded),
    ];

    proptest! {
        #[test]
        fn table_matches_allowed_edges(
            from in proptest::sample::select(PaymentStatus::ALL.to_vec()),
            to in proptest::sample::select(PaymentStatus::ALL.to_vec()),
        ) {
            prop_assert_eq!(from.can_transition_to(to), ALLOWED.contains(&(from, to)));
        }
    }

    #[test]
    fn active_statuses() {
        let active: Vec<_> = PaymentStatus::ALL.into_iter().filter(|s| s.is_active()).collect();
        assert_eq!(active, [Pending, Processing, Success]);
    }

    #[test]
    fn transient_failures_are_retryable() {
        for reason in [
            FailureReason::NetworkError,
            FailureReason::Timeout,
            FailureReason::GatewayError,
        ] {
            assert!(reason.retryable(), "{reason} should be retryable");
        }
        for reason in [
            FailureReason::FraudDetected,
            FailureReason::CardBlocked,
            FailureReason::InvalidCard,
            FailureReason::ExpiredCard,
        ] {
            assert!(!reason.retryable(), "{reason} should be final");
        }
    }
}
