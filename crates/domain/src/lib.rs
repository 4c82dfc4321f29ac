//! Domain layer for order fulfillment.
//!
//! Three independently owned lifecycles, each an event-sourced aggregate
//! guarded by an explicit transition table:
//! - [`order`]: PENDING → CONFIRMED → PAID → SHIPPED → DELIVERED
//! - [`payment`]: PENDING → PROCESSING → SUCCESS/FAILED, refunds, cancellation
//! - [`delivery`]: PENDING → IN_TRANSIT → OUT_FOR_DELIVERY → DELIVERED, with failure and restart
//!
//! Mutations on one entity are serialized through [`EntityLocks`]; events are
//! published on the [`event_bus::EventBus`] only after the append commits.

pub mod aggregate;
pub mod command;
pub mod delivery;
pub mod error;
pub mod locks;
pub mod order;
pub mod payment;
pub mod value_objects;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{CommandHandler, CommandResult};
pub use common::{AggregateId, CustomerId};
pub use delivery::{
    CarrierClient, CreateDelivery, DeliveryAction, DeliveryError, DeliveryEvent, DeliveryLifecycle,
    DeliveryRequest, DeliveryStatus, DeliveryType, InMemoryCarrier,
};
pub use error::{DomainError, ErrorCode};
pub use locks::{EntityGuard, EntityLocks};
pub use order::{
    CreateOrder, Order, OrderError, OrderEvent, OrderLifecycle, OrderLineItem, OrderStatus,
    OrderTotals, PricingPolicy, ProductId, RefundPort,
};
pub use payment::{
    ChargeRequest, FailureReason, GatewayDecline, GatewayReceipt, InMemoryPaymentGateway,
    PaymentConfig, PaymentError, PaymentEvent, PaymentFailure, PaymentGateway, PaymentLifecycle,
    PaymentMethod, PaymentStatus, PaymentTransaction,
};
pub use value_objects::{Address, Money};
