//! Payment lifecycle: the only writer of PaymentTransaction state.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, CustomerId};
use event_bus::EventBus;
use event_store::{EventQuery, EventStore, EventStoreExt};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::locks::EntityLocks;
use crate::value_objects::Money;

use super::{
    ChargeRequest, FailureReason, GatewayDecline, GatewayReceipt, InitiatePayment, PaymentError,
    PaymentGateway, PaymentMethod, PaymentStatus, PaymentTransaction,
};

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Upper bound on a single gateway charge.
    pub gateway_timeout: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

pub struct PaymentLifecycle<S: EventStore> {
    handler: CommandHandler<S, PaymentTransaction>,
    bus: EventBus,
    gateway: Arc<dyn PaymentGateway>,
    /// Serializes the one-active-payment check per order.
    order_locks: EntityLocks,
    config: PaymentConfig,
}

impl<S: EventStore> PaymentLifecycle<S> {
    pub fn new(
        store: S,
        bus: EventBus,
        gateway: Arc<dyn PaymentGateway>,
        config: PaymentConfig,
    ) -> Self {
        Self {
            handler: CommandHandler::new(store),
            bus,
            gateway,
            order_locks: EntityLocks::new(),
            config,
        }
    }

    /// Charges `amount` for an order.
    ///
    /// A gateway decline is not an error here: the transaction comes back
    /// FAILED with its reason recorded. Errors are reserved for rejected
    /// requests, such as a second capture while one is still active.
    #[tracing::instrument(skip(self, method))]
    pub async fn capture(
        &self,
        order_id: AggregateId,
        customer_id: CustomerId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<PaymentTransaction, DomainError> {
        let cmd = InitiatePayment {
            transaction_id: AggregateId::new(),
            order_id,
            customer_id,
            amount,
            method,
        };

        let order_guard = self.order_locks.lock(order_id).await;
        if let Some(transaction_id) = self
            .active_transaction(order_id)
            .await?
            .and_then(|active| active.id())
        {
            return Err(PaymentError::DuplicateActivePayment {
                order_id,
                transaction_id,
            }
            .into());
        }
        let initiated = self
            .handler
            .execute(cmd.transaction_id, |tx| tx.initiate(&cmd))
            .await?;
        drop(order_guard);
        self.publish(initiated).await;

        let request = ChargeRequest {
            transaction_id: cmd.transaction_id,
            order_id,
            amount,
            method: cmd.method.clone(),
        };
        let gateway = Arc::clone(&self.gateway);
        let in_flight = request.clone();
        let mut charge = tokio::spawn(async move { gateway.charge(&in_flight).await });

        let outcome = match tokio::time::timeout(self.config.gateway_timeout, &mut charge).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(GatewayDecline::new(
                FailureReason::SystemError,
                format!("gateway call aborted: {join_error}"),
            )),
            Err(_) => {
                self.void_if_captured_late(charge, request);
                Err(GatewayDecline::new(
                    FailureReason::Timeout,
                    format!(
                        "no gateway answer within {}ms",
                        self.config.gateway_timeout.as_millis()
                    ),
                ))
            }
        };

        let settled = self
            .handler
            .execute_existing(cmd.transaction_id, |tx| tx.settle(&outcome))
            .await?;

        if settled.is_noop() {
            tracing::warn!(
                transaction_id = %cmd.transaction_id,
                status = %settled.aggregate.status(),
                "gateway result discarded, transaction already settled elsewhere"
            );
            metrics::counter!("payment_results_discarded_total").increment(1);
        } else {
            let outcome = settled.aggregate.status().as_str();
            metrics::counter!("payment_captures_total", "outcome" => outcome).increment(1);
        }

        Ok(self.publish(settled).await.aggregate)
    }

    /// Waits out a charge that missed the timeout. The transaction is already
    /// FAILED and may be retried, so a charge that lands anyway is refunded.
    fn void_if_captured_late(
        &self,
        charge: tokio::task::JoinHandle<Result<GatewayReceipt, GatewayDecline>>,
        request: ChargeRequest,
    ) {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let Ok(Ok(receipt)) = charge.await else {
                return;
            };
            match gateway.refund(&receipt.gateway_ref, request.amount).await {
                Ok(_) => {
                    tracing::warn!(
                        transaction_id = %request.transaction_id,
                        order_id = %request.order_id,
                        gateway_ref = %receipt.gateway_ref,
                        "late capture voided"
                    );
                    metrics::counter!("payment_late_captures_total", "voided" => "true").increment(1);
                }
                Err(decline) => {
                    tracing::error!(
                        transaction_id = %request.transaction_id,
                        order_id = %request.order_id,
                        gateway_ref = %receipt.gateway_ref,
                        error = %decline,
                        "late capture could not be voided"
                    );
                    metrics::counter!("payment_late_captures_total", "voided" => "false").increment(1);
                }
            }
        });
    }

    /// Returns part or all of a successful capture.
    ///
    /// The refund is reserved in the store before the gateway is called and
    /// confirmed afterwards. If the confirmation cannot be written the
    /// reservation stays, so the money is never sent twice; the transaction
    /// then shows up in [`Self::unconfirmed_refunds`].
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        transaction_id: AggregateId,
        amount: Money,
        reason: &str,
    ) -> Result<CommandResult<PaymentTransaction>, DomainError> {
        let guard = self.handler.lock(transaction_id).await;
        let requested = self
            .handler
            .execute_existing_locked(&guard, transaction_id, |tx| {
                tx.request_refund(amount, reason)
            })
            .await?;
        let charge_ref = requested
            .aggregate
            .gateway_transaction_id()
            .ok_or(PaymentError::NotInitiated)?
            .to_string();
        self.publish(requested).await;

        let receipt = match self.gateway.refund(&charge_ref, amount).await {
            Ok(receipt) => receipt,
            Err(decline) => {
                let abandoned = self
                    .handler
                    .execute_existing_locked(&guard, transaction_id, |tx| {
                        tx.abandon_refund(&decline.message)
                    })
                    .await;
                match abandoned {
                    Ok(result) => {
                        self.publish(result).await;
                    }
                    Err(err) => tracing::error!(
                        %transaction_id,
                        error = %err,
                        "refused refund could not be released"
                    ),
                }
                return Err(PaymentError::from(decline).into());
            }
        };

        let completed = self
            .handler
            .execute_existing_locked(&guard, transaction_id, |tx| {
                tx.complete_refund(&receipt.gateway_ref)
            })
            .await;
        drop(guard);

        match completed {
            Ok(result) => {
                metrics::counter!("payment_refunds_total").increment(1);
                Ok(self.publish(result).await)
            }
            Err(err) => {
                tracing::error!(
                    %transaction_id,
                    %amount,
                    gateway_refund_id = %receipt.gateway_ref,
                    error = %err,
                    "refund sent but not recorded, left pending"
                );
                metrics::counter!("payment_refunds_unrecorded_total").increment(1);
                Err(PaymentError::RefundUnrecorded {
                    amount,
                    gateway_refund_id: receipt.gateway_ref,
                }
                .into())
            }
        }
    }

    /// Refunds whatever is still refundable on every captured transaction of
    /// the order. Returns zero when there is nothing to return.
    #[tracing::instrument(skip(self))]
    pub async fn refund_remaining_for_order(
        &self,
        order_id: AggregateId,
        reason: &str,
    ) -> Result<Money, DomainError> {
        let mut refunded = Money::zero();
        for tx in self.transactions_for_order(order_id).await? {
            let remaining = tx.refundable_amount();
            let Some(id) = tx.id() else { continue };
            if remaining.is_positive() {
                self.refund(id, remaining, reason).await?;
                refunded += remaining;
            }
        }
        Ok(refunded)
    }

    /// Cancels a PENDING or PROCESSING transaction. An in-flight gateway
    /// call is left to finish; its answer is then discarded.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        transaction_id: AggregateId,
    ) -> Result<CommandResult<PaymentTransaction>, DomainError> {
        let result = self
            .handler
            .execute_existing(transaction_id, |tx| tx.cancel())
            .await?;
        Ok(self.publish(result).await)
    }

    pub async fn get(&self, transaction_id: AggregateId) -> Result<PaymentTransaction, DomainError> {
        self.handler.get(transaction_id).await
    }

    /// Every transaction recorded for an order, oldest first.
    pub async fn transactions_for_order(
        &self,
        order_id: AggregateId,
    ) -> Result<Vec<PaymentTransaction>, DomainError> {
        let query = EventQuery::for_aggregate_type(PaymentTransaction::aggregate_type())
            .order_id(order_id);
        self.load_all(query).await
    }

    /// The PENDING, PROCESSING or SUCCESS transaction of an order, if any.
    pub async fn active_transaction(
        &self,
        order_id: AggregateId,
    ) -> Result<Option<PaymentTransaction>, DomainError> {
        Ok(self
            .transactions_for_order(order_id)
            .await?
            .into_iter()
            .find(|tx| tx.status().is_active()))
    }

    /// Transactions that entered PROCESSING more than `older_than` ago and
    /// never heard back.
    pub async fn stale_processing(
        &self,
        older_than: Duration,
    ) -> Result<Vec<PaymentTransaction>, DomainError> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| DomainError::Internal(e.to_string()))?;
        let cutoff = chrono::Utc::now() - older_than;

        let query = EventQuery::for_aggregate_type(PaymentTransaction::aggregate_type());
        Ok(self
            .load_all(query)
            .await?
            .into_iter()
            .filter(|tx| {
                tx.status() == PaymentStatus::Processing
                    && tx.processing_started_at().is_some_and(|at| at < cutoff)
            })
            .collect())
    }

    /// Transactions holding a refund reservation older than `older_than`.
    /// The gateway may or may not have sent the money.
    pub async fn unconfirmed_refunds(
        &self,
        older_than: Duration,
    ) -> Result<Vec<PaymentTransaction>, DomainError> {
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| DomainError::Internal(e.to_string()))?;
        let cutoff = chrono::Utc::now() - older_than;

        let query = EventQuery::for_aggregate_type(PaymentTransaction::aggregate_type())
            .event_type("PaymentRefundRequested");
        Ok(self
            .load_all(query)
            .await?
            .into_iter()
            .filter(|tx| {
                tx.pending_refund()
                    .is_some_and(|pending| pending.requested_at < cutoff)
            })
            .collect())
    }

    async fn load_all(&self, query: EventQuery) -> Result<Vec<PaymentTransaction>, DomainError> {
        let ids = self.handler.store().aggregate_ids(query).await?;
        let mut transactions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.handler.load_existing(id).await? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }

    async fn publish(
        &self,
        result: CommandResult<PaymentTransaction>,
    ) -> CommandResult<PaymentTransaction> {
        if result.is_noop() {
            return result;
        }

        tracing::info!(
            transaction_id = ?result.aggregate.id(),
            order_id = ?result.aggregate.order_id(),
            status = %result.aggregate.status(),
            version = %result.new_version,
            "payment transitioned"
        );
        self.bus.publish_envelopes(&result.envelopes).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use event_bus::RecordingSubscriber;
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::payment::InMemoryPaymentGateway;

    struct Fixture {
        payments: Arc<PaymentLifecycle<InMemoryEventStore>>,
        gateway: InMemoryPaymentGateway,
        bus: EventBus,
        recorder: Arc<RecordingSubscriber>,
    }

    async fn fixture() -> Fixture {
        let gateway = InMemoryPaymentGateway::new();
        let bus = EventBus::default();
        let recorder = Arc::new(RecordingSubscriber::new());
        bus.subscribe(recorder.clone()).await;
        let payments = Arc::new(PaymentLifecycle::new(
            InMemoryEventStore::new(),
            bus.clone(),
            Arc::new(gateway.clone()),
            PaymentConfig::default(),
        ));
        Fixture {
            payments,
            gateway,
            bus,
            recorder,
        }
    }

    async fn capture(f: &Fixture, order_id: AggregateId, cents: i64) -> PaymentTransaction {
        f.payments
            .capture(
                order_id,
                CustomerId::new(),
                Money::from_cents(cents),
                PaymentMethod::card("tok_visa"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_capture_emits_one_success_event() {
        let f = fixture().await;
        let order_id = AggregateId::new();

        let tx = capture(&f, order_id, 2_500).await;
        assert_eq!(tx.status(), PaymentStatus::Success);

        f.bus.quiesce().await;
        assert_eq!(f.recorder.count_of("PaymentSucceeded").await, 1);
        let succeeded = f
            .recorder
            .events()
            .await
            .into_iter()
            .find(|e| e.event_type == "PaymentSucceeded")
            .unwrap();
        assert_eq!(succeeded.order_id, Some(order_id));
        assert_eq!(succeeded.payload["data"]["amount"], 2_500);
    }

    #[tokio::test]
    async fn second_capture_while_active_is_rejected() {
        let f = fixture().await;
        let order_id = AggregateId::new();
        let first = capture(&f, order_id, 1_000).await;

        let err = f
            .payments
            .capture(order_id, CustomerId::new(), Money::from_cents(1_000), PaymentMethod::card("tok"))
            .await
            .unwrap_err();

        match err {
            DomainError::Payment(PaymentError::DuplicateActivePayment { transaction_id, .. }) => {
                assert_eq!(Some(transaction_id), first.id());
            }
            other => panic!("expected duplicate payment, got {other}"),
        }
        assert_eq!(f.gateway.charge_count().await, 1);
    }

    #[tokio::test]
    async fn failed_attempt_allows_a_retry() {
        let f = fixture().await;
        let order_id = AggregateId::new();
        f.gateway.decline_next(FailureReason::NetworkError).await;

        let failed = capture(&f, order_id, 1_000).await;
        assert_eq!(failed.status(), PaymentStatus::Failed);
        assert!(failed.failure().unwrap().retryable);

        let retried = capture(&f, order_id, 1_000).await;
        assert_eq!(retried.status(), PaymentStatus::Success);
        assert_eq!(f.payments.transactions_for_order(order_id).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out_as_retryable_failure() {
        let f = fixture().await;
        f.gateway.set_delay(Some(Duration::from_secs(30))).await;

        let tx = capture(&f, AggregateId::new(), 1_000).await;

        assert_eq!(tx.status(), PaymentStatus::Failed);
        let failure = tx.failure().unwrap();
        assert_eq!(failure.reason, FailureReason::Timeout);
        assert!(failure.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn charge_landing_after_timeout_is_voided() {
        let f = fixture().await;
        let order_id = AggregateId::new();
        f.gateway.set_delay(Some(Duration::from_secs(30))).await;

        let timed_out = capture(&f, order_id, 1_000).await;
        assert_eq!(timed_out.status(), PaymentStatus::Failed);

        // the abandoned call completes at the gateway later on
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.gateway.charge_count().await, 1);
        assert_eq!(f.gateway.refunded_total().await.cents(), 1_000);

        f.gateway.set_delay(None).await;
        let retried = capture(&f, order_id, 1_000).await;
        assert_eq!(retried.status(), PaymentStatus::Success);
        assert_eq!(f.gateway.charge_count().await, 2);
        assert_eq!(f.gateway.refunded_total().await.cents(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_gateway_call_discards_the_result() {
        let f = fixture().await;
        f.gateway.set_delay(Some(Duration::from_secs(1))).await;
        let order_id = AggregateId::new();

        let in_flight = {
            let payments = f.payments.clone();
            tokio::spawn(async move {
                payments
                    .capture(order_id, CustomerId::new(), Money::from_cents(900), PaymentMethod::card("tok"))
                    .await
            })
        };

        let tx_id = loop {
            if let Some(tx) = f.payments.active_transaction(order_id).await.unwrap() {
                break tx.id().unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        f.payments.cancel(tx_id).await.unwrap();

        let settled = in_flight.await.unwrap().unwrap();
        assert_eq!(settled.status(), PaymentStatus::Cancelled);
        assert!(settled.gateway_transaction_id().is_none());

        f.bus.quiesce().await;
        assert_eq!(f.recorder.count_of("PaymentSucceeded").await, 0);
        assert_eq!(f.recorder.count_of("PaymentCancelled").await, 1);
    }

    #[tokio::test]
    async fn refund_beyond_balance_leaves_state_unchanged() {
        let f = fixture().await;
        let tx = capture(&f, AggregateId::new(), 1_000).await;
        let id = tx.id().unwrap();

        f.payments.refund(id, Money::from_cents(700), "partial").await.unwrap();
        let err = f
            .payments
            .refund(id, Money::from_cents(400), "too much")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DomainError::Payment(PaymentError::InsufficientRefundAmount { .. })
        ));
        let tx = f.payments.get(id).await.unwrap();
        assert_eq!(tx.refunded_amount().cents(), 700);
        assert_eq!(tx.status(), PaymentStatus::Success);
        assert_eq!(f.gateway.refunded_total().await.cents(), 700);
    }

    #[tokio::test]
    async fn gateway_refund_failure_releases_the_reservation() {
        let f = fixture().await;
        let tx = capture(&f, AggregateId::new(), 1_000).await;
        f.gateway.fail_next_refund(FailureReason::GatewayError).await;

        let err = f
            .payments
            .refund(tx.id().unwrap(), Money::from_cents(1_000), "cancel")
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        let tx = f.payments.get(tx.id().unwrap()).await.unwrap();
        assert_eq!(tx.status(), PaymentStatus::Success);
        assert_eq!(tx.refund_count(), 0);
        assert!(tx.pending_refund().is_none());

        f.bus.quiesce().await;
        assert_eq!(f.recorder.count_of("PaymentRefundAbandoned").await, 1);
        assert_eq!(f.recorder.count_of("PaymentRefunded").await, 0);
    }

    /// Rejects appends of one event type with a version conflict.
    #[derive(Clone, Default)]
    struct ConflictingStore {
        inner: InMemoryEventStore,
        reject: Arc<std::sync::Mutex<Option<&'static str>>>,
    }

    impl ConflictingStore {
        fn reject(&self, event_type: Option<&'static str>) {
            if let Ok(mut slot) = self.reject.lock() {
                *slot = event_type;
            }
        }
    }

    #[async_trait::async_trait]
    impl EventStore for ConflictingStore {
        async fn append(
            &self,
            events: Vec<event_store::EventEnvelope>,
            options: event_store::AppendOptions,
        ) -> event_store::Result<event_store::Version> {
            let rejected = *self.reject.lock().unwrap();
            let hit = events
                .iter()
                .find(|e| Some(e.event_type.as_str()) == rejected);
            if let Some(event) = hit {
                return Err(event_store::EventStoreError::ConcurrencyConflict {
                    aggregate_id: event.aggregate_id,
                    expected: event.version,
                    actual: event.version.next(),
                });
            }
            self.inner.append(events, options).await
        }

        async fn get_events_for_aggregate(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Vec<event_store::EventEnvelope>> {
            self.inner.get_events_for_aggregate(aggregate_id).await
        }

        async fn query_events(
            &self,
            query: EventQuery,
        ) -> event_store::Result<Vec<event_store::EventEnvelope>> {
            self.inner.query_events(query).await
        }

        async fn stream_all_events(&self) -> event_store::Result<event_store::EventStream> {
            self.inner.stream_all_events().await
        }

        async fn get_aggregate_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<event_store::Version>> {
            self.inner.get_aggregate_version(aggregate_id).await
        }
    }

    #[tokio::test]
    async fn unrecorded_refund_is_never_sent_twice() {
        let store = ConflictingStore::default();
        let gateway = InMemoryPaymentGateway::new();
        let payments = PaymentLifecycle::new(
            store.clone(),
            EventBus::default(),
            Arc::new(gateway.clone()),
            PaymentConfig::default(),
        );
        let order_id = AggregateId::new();
        let tx = payments
            .capture(
                order_id,
                CustomerId::new(),
                Money::from_cents(1_000),
                PaymentMethod::card("tok_visa"),
            )
            .await
            .unwrap();
        let id = tx.id().unwrap();

        store.reject(Some("PaymentRefunded"));
        let err = payments
            .refund(id, Money::from_cents(1_000), "cancel")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Payment(PaymentError::RefundUnrecorded { .. })
        ));
        assert_eq!(gateway.refunded_total().await.cents(), 1_000);

        let pending = payments.get(id).await.unwrap();
        assert_eq!(pending.status(), PaymentStatus::Success);
        assert_eq!(pending.pending_refund().map(|p| p.amount.cents()), Some(1_000));

        // a retry finds the reservation instead of refunding again
        store.reject(None);
        let retry = payments
            .refund_remaining_for_order(order_id, "cancel")
            .await
            .unwrap_err();
        assert!(matches!(
            retry,
            DomainError::Payment(PaymentError::RefundInProgress { .. })
        ));
        assert_eq!(gateway.refunded_total().await.cents(), 1_000);

        let flagged = payments.unconfirmed_refunds(Duration::ZERO).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id(), Some(id));
    }

    #[tokio::test]
    async fn refund_remaining_for_order_is_idempotent() {
        let f = fixture().await;
        let order_id = AggregateId::new();
        let tx = capture(&f, order_id, 1_000).await;
        f.payments
            .refund(tx.id().unwrap(), Money::from_cents(250), "partial")
            .await
            .unwrap();

        let refunded = f.payments.refund_remaining_for_order(order_id, "cancel").await.unwrap();
        assert_eq!(refunded.cents(), 750);

        let again = f.payments.refund_remaining_for_order(order_id, "cancel").await.unwrap();
        assert!(again.is_zero());
        assert_eq!(
            f.payments.get(tx.id().unwrap()).await.unwrap().status(),
            PaymentStatus::Refunded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_processing_finds_unanswered_transactions() {
        let f = fixture().await;
        f.gateway.set_delay(Some(Duration::from_secs(5))).await;
        let order_id = AggregateId::new();

        let payments = f.payments.clone();
        let in_flight = tokio::spawn(async move {
            payments
                .capture(order_id, CustomerId::new(), Money::from_cents(100), PaymentMethod::card("tok"))
                .await
        });
        while f.payments.active_transaction(order_id).await.unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let stale = f.payments.stale_processing(Duration::ZERO).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].order_id(), Some(order_id));

        in_flight.await.unwrap().unwrap();
        assert!(f.payments.stale_processing(Duration::ZERO).await.unwrap().is_empty());
    }
}
