//! Payment gateway capability.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::value_objects::Money;

use super::FailureReason;

/// How the customer pays. Passed through to the gateway untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentMethod {
    Card { token: String },
    Wallet { provider: String, token: String },
    BankTransfer { reference: String },
}

impl PaymentMethod {
    pub fn card(token: impl Into<String>) -> Self {
        PaymentMethod::Card {
            token: token.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub transaction_id: AggregateId,
    pub order_id: AggregateId,
    pub amount: Money,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    /// The gateway's own id for the charge or refund.
    pub gateway_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {message}")]
pub struct GatewayDecline {
    pub reason: FailureReason,
    pub message: String,
}

impl GatewayDecline {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// External payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayReceipt, GatewayDecline>;

    /// Returns `amount` of an earlier charge identified by `gateway_ref`.
    async fn refund(&self, gateway_ref: &str, amount: Money)
    -> Result<GatewayReceipt, GatewayDecline>;
}

#[derive(Debug, Default)]
struct GatewayState {
    charge_script: VecDeque<FailureReason>,
    refund_script: VecDeque<FailureReason>,
    delay: Option<Duration>,
    charges: Vec<ChargeRequest>,
    refunds: Vec<(String, Money)>,
    next_ref: u32,
}

/// Scripted gateway: approves everything unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines the next charge with `reason`. Calls queue up.
    pub async fn decline_next(&self, reason: FailureReason) {
        self.state.lock().await.charge_script.push_back(reason);
    }

    /// Fails the next refund with `reason`. Calls queue up.
    pub async fn fail_next_refund(&self, reason: FailureReason) {
        self.state.lock().await.refund_script.push_back(reason);
    }

    /// Delays every charge response, simulating a slow processor.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.delay = delay;
    }

    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }

    pub async fn refunds(&self) -> Vec<(String, Money)> {
        self.state.lock().await.refunds.clone()
    }

    pub async fn refunded_total(&self) -> Money {
        self.state.lock().await.refunds.iter().map(|(_, m)| *m).sum()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: &ChargeRequest) -> Result<GatewayReceipt, GatewayDecline> {
        let delay = self.state.lock().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.charges.push(request.clone());
        if let Some(reason) = state.charge_script.pop_front() {
            return Err(GatewayDecline::new(reason, "declined by scripted gateway"));
        }

        state.next_ref += 1;
        Ok(GatewayReceipt {
            gateway_ref: format!("CH-{:06}", state.next_ref),
        })
    }

    async fn refund(
        &self,
        gateway_ref: &str,
        amount: Money,
    ) -> Result<GatewayReceipt, GatewayDecline> {
        let mut state = self.state.lock().await;
        if let Some(reason) = state.refund_script.pop_front() {
            return Err(GatewayDecline::new(reason, "refund rejected by scripted gateway"));
        }

        state.refunds.push((gateway_ref.to_string(), amount));
        state.next_ref += 1;
        Ok(GatewayReceipt {
            gateway_ref: format!("RF-{:06}", state.next_ref),
        })
    }
}
