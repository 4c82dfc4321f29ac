//! Delivery state machine and service levels.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Money;

/// ```text
/// PENDING ──► IN_TRANSIT ──► OUT_FOR_DELIVERY ──► DELIVERED
///    │          ▲    │             │   └────────► RETURNED
///    │          │    ▼             │
///    │          └─ FAILED ◄────────┘
///    ▼               │
/// CANCELLED ◄────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    InTransit,
    OutForDelivery,
    Delivered,
    Failed,
    Cancelled,
    Returned,
}

static TRANSITIONS: LazyLock<HashMap<DeliveryStatus, HashSet<DeliveryStatus>>> =
    LazyLock::new(|| {
        use DeliveryStatus::*;
        HashMap::from([
            (Pending, HashSet::from([InTransit, Cancelled])),
            (InTransit, HashSet::from([OutForDelivery, Failed])),
            (OutForDelivery, HashSet::from([Delivered, Failed, Returned])),
            (Failed, HashSet::from([InTransit, Cancelled])),
            (Delivered, HashSet::new()),
            (Cancelled, HashSet::new()),
            (Returned, HashSet::new()),
        ])
    });

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 7] = [
        DeliveryStatus::Pending,
        DeliveryStatus::InTransit,
        DeliveryStatus::OutForDelivery,
        DeliveryStatus::Delivered,
        DeliveryStatus::Failed,
        DeliveryStatus::Cancelled,
        DeliveryStatus::Returned,
    ];

    pub fn can_transition_to(&self, to: DeliveryStatus) -> bool {
        TRANSITIONS.get(self).is_some_and(|next| next.contains(&to))
    }

    /// DELIVERED, CANCELLED and RETURNED. FAILED can still be restarted.
    pub fn is_completed(&self) -> bool {
        TRANSITIONS.get(self).is_none_or(|next| next.is_empty())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Cancelled => "CANCELLED",
            DeliveryStatus::Returned => "RETURNED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service level chosen at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryType {
    SameDay,
    NextDay,
    Express,
    #[default]
    Standard,
}

impl DeliveryType {
    /// Calendar days from dispatch to the promised date.
    pub fn sla_days(&self) -> u64 {
        match self {
            DeliveryType::SameDay => 0,
            DeliveryType::NextDay => 1,
            DeliveryType::Express => 2,
            DeliveryType::Standard => 5,
        }
    }

    pub fn shipping_fee(&self) -> Money {
        match self {
            DeliveryType::SameDay => Money::from_cents(2_499),
            DeliveryType::NextDay => Money::from_cents(1_499),
            DeliveryType::Express => Money::from_cents(999),
            DeliveryType::Standard => Money::from_cents(499),
        }
    }

    pub fn estimated_delivery_date(&self, from: DateTime<Utc>) -> NaiveDate {
        let day = from.date_naive();
        day.checked_add_days(Days::new(self.sla_days()))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryType::SameDay => "SAME_DAY",
            DeliveryType::NextDay => "NEXT_DAY",
            DeliveryType::Express => "EXPRESS",
            DeliveryType::Standard => "STANDARD",
        }
    }
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryStatus::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    const ALLOWED: [(DeliveryStatus, DeliveryStatus); 9] = [
        (Pending, InTransit),
        (Pending, Cancelled),
        (InTransit, OutForDelivery),
        (InTransit, Failed),
        (OutForDelivery, Delivered),
        (OutForDelivery, Failed),
        (OutForDelivery, Returned),
        (Failed, InTransit),
        (Failed, Cancelled),
    ];

    proptest! {
        #[test]
        fn table_matches_allowed_edges(
            from in proptest::sample::select(DeliveryStatus::ALL.to_vec()),
            to in proptest::sample::select(DeliveryStatus::ALL.to_vec()),
        ) {
            prop_assert_eq!(from.can_transition_to(to), ALLOWED.contains(&(from, to)));
        }
    }

    #[test]
    fn completed_statuses() {
        let completed: Vec<_> = DeliveryStatus::ALL
            .into_iter()
            .filter(|s| s.is_completed())
            .collect();
        assert_eq!(completed, [Delivered, Cancelled, Returned]);
    }

    #[test]
    fn pending_cannot_jump_to_delivered() {
        assert!(!Pending.can_transition_to(Delivered));
    }

    #[test]
    fn sla_offsets() {
        let now = Utc.with_ymd_and_hms(2024, 3, 30, 18, 0, 0).unwrap();
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();

        assert_eq!(DeliveryType::SameDay.estimated_delivery_date(now), day(2024, 3, 30));
        assert_eq!(DeliveryType::NextDay.estimated_delivery_date(now), day(2024, 3, 31));
        assert_eq!(DeliveryType::Express.estimated_delivery_date(now), day(2024, 4, 1));
        assert_eq!(DeliveryType::Standard.estimated_delivery_date(now), day(2024, 4, 4));
    }

    #[test]
    fn faster_service_costs_more() {
        assert!(DeliveryType::SameDay.shipping_fee() > DeliveryType::NextDay.shipping_fee());
        assert!(DeliveryType::Express.shipping_fee() > DeliveryType::Standard.shipping_fee());
    }
}
