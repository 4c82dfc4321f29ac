//! Order state machine.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// ```text
/// PENDING ──► CONFIRMED ──► PAID ──► SHIPPED ──► DELIVERED
///    │            │          │
///    └────────────┴──────────┴──► CANCELLED
///
/// PAID | SHIPPED | DELIVERED ──► REFUNDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    /// Accepted and awaiting payment capture.
    Confirmed,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

static TRANSITIONS: LazyLock<HashMap<OrderStatus, HashSet<OrderStatus>>> = LazyLock::new(|| {
    use OrderStatus::*;
    HashMap::from([
        (Pending, HashSet::from([Confirmed, Cancelled])),
        (Confirmed, HashSet::from([Paid, Cancelled])),
        (Paid, HashSet::from([Shipped, Cancelled, Refunded])),
        (Shipped, HashSet::from([Delivered, Refunded])),
        (Delivered, HashSet::from([Refunded])),
        (Cancelled, HashSet::new()),
        (Refunded, HashSet::new()),
    ])
});

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        TRANSITIONS.get(self).is_some_and(|next| next.contains(&to))
    }

    /// DELIVERED, CANCELLED and REFUNDED end the fulfilment flow.
    /// A delivered order can still be refunded.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use OrderStatus::*;

    const ALLOWED: [(OrderStatus, OrderStatus); 10] = [
        (Pending, Confirmed),
        (Confirmed, Paid),
        (Paid, Shipped),
        (Shipped, Delivered),
        (Pending, Cancelled),
        (Confirmed, Cancelled),
        (Paid, Cancelled),
        (Paid, Refunded),
        (Shipped, Refunded),
        (Delivered, Refunded),
    ];

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        proptest::sample::select(OrderStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn table_matches_allowed_edges(from in any_status(), to in any_status()) {
            prop_assert_eq!(from.can_transition_to(to), ALLOWED.contains(&(from, to)));
        }
    }

    #[test]
    fn cancel_not_allowed_after_shipping() {
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
    }

    #[test]
    fn display_uses_upper_snake() {
        assert_eq!(Confirmed.to_string(), "CONFIRMED");
        assert_eq!(serde_json::to_string(&Refunded).unwrap(), "\"REFUNDED\"");
    }
}
