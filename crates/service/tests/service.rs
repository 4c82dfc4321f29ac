//! Startup, replay and shutdown of the assembled service.

use std::time::Duration;

use common::CustomerId;
use domain::{
    Address, Aggregate, DeliveryType, Money, OrderLineItem, OrderStatus, PaymentMethod,
};
use saga::PlaceOrder;
use service::{App, Config};

fn request() -> PlaceOrder {
    PlaceOrder::new(
        CustomerId::new(),
        vec![OrderLineItem::new("SKU-100", 3, Money::from_cents(1_200))],
        Address::new("9 Harbour Rd", "Portsmouth", "PO1 2AB", "GB"),
        DeliveryType::Express,
        PaymentMethod::card("tok_amex"),
    )
}

#[tokio::test]
async fn tax_rate_from_config_reaches_orders() {
    let app = App::build(Config {
        tax_rate_bps: 1_000,
        ..Config::default()
    });
    app.start().await.unwrap();

    let outcome = app.coordinator().place_order(request()).await.unwrap();

    // 3600 subtotal, 999 express fee, 360 tax
    assert_eq!(outcome.order.total_amount(), Money::from_cents(4_959));
    app.shutdown().await;
}

#[tokio::test]
async fn startup_replay_catches_up_on_earlier_events() {
    let app = App::build(Config::default());
    let outcome = app.coordinator().place_order(request()).await.unwrap();
    let order_id = outcome.order.id().unwrap();
    app.coordinator()
        .cancel_order(order_id, "customer request")
        .await
        .unwrap();

    let replayed = app.start().await.unwrap();
    app.coordinator().bus().quiesce().await;

    assert!(replayed > 0);
    assert_eq!(app.audit().count_of("OrderCancelled").await, 1);
    assert_eq!(app.audit().count_of("PaymentRefunded").await, 1);
    assert_eq!(
        app.coordinator().orders().get(order_id).await.unwrap().status(),
        OrderStatus::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn sweeper_stops_on_shutdown() {
    let app = App::build(Config {
        sweep_interval: Duration::from_secs(5),
        ..Config::default()
    });
    app.start().await.unwrap();
    let sweeper = app.spawn_sweeper();

    tokio::time::sleep(Duration::from_secs(12)).await;
    app.shutdown().await;

    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper exits after shutdown")
        .unwrap();
}
