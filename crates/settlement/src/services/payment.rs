//! Payment gateway trait and in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form key/value pairs attached to provider objects.
pub type Metadata = BTreeMap<String, String>;

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    Transient,
    Permanent,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayErrorKind::Transient => write!(f, "transient"),
            GatewayErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A failure reported by (or while talking to) the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} gateway error: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GatewayErrorKind::Transient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPayment,
    Processing,
    Succeeded,
    Canceled,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::RequiresPayment => "requires_payment",
            PaymentIntentStatus::Processing => "processing",
            PaymentIntentStatus::Succeeded => "succeeded",
            PaymentIntentStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentIntentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub id: String,
    pub amount: Money,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRefund {
    pub id: String,
    pub payment_reference: String,
    pub amount: Money,
}

/// The payment provider operations the settlement pipeline relies on.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent the buyer then pays client-side.
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
        metadata: Metadata,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    /// Moves money from the platform balance to a seller account.
    ///
    /// A repeated call with the same `idempotency_key` returns the transfer
    /// the first successful call created instead of moving money again.
    async fn create_transfer(
        &self,
        amount: Money,
        currency: &str,
        destination: &str,
        idempotency_key: &str,
        metadata: Metadata,
    ) -> Result<Transfer, GatewayError>;

    /// Refunds (part of) a captured payment.
    async fn create_refund(
        &self,
        payment_reference: &str,
        amount: Money,
    ) -> Result<ProviderRefund, GatewayError>;
}

/// Runs a gateway call under `limit`; expiry is a transient failure.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::new(
            GatewayErrorKind::Transient,
            format!("timed out after {}ms", limit.as_millis()),
        )),
    }
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    intents: HashMap<String, PaymentIntent>,
    transfers: Vec<Transfer>,
    transfer_keys: HashMap<String, Transfer>,
    refunds: Vec<ProviderRefund>,
    next_id: u32,
    fail_on_payment_intent: Option<GatewayErrorKind>,
    fail_on_transfer: Option<GatewayErrorKind>,
    fail_on_refund: Option<GatewayErrorKind>,
    latency: Duration,
}

impl InMemoryGatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{:04}", self.next_id)
    }
}

/// In-memory payment gateway for tests and the default server.
///
/// Intents start in `RequiresPayment`; [`succeed_payment_intent`] plays the
/// part of the buyer paying.
///
/// [`succeed_payment_intent`]: InMemoryPaymentGateway::succeed_payment_intent
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every payment intent creation fail with `kind`, or succeed again with `None`.
    pub fn set_fail_on_payment_intent(&self, kind: Option<GatewayErrorKind>) {
        self.state().fail_on_payment_intent = kind;
    }

    pub fn set_fail_on_transfer(&self, kind: Option<GatewayErrorKind>) {
        self.state().fail_on_transfer = kind;
    }

    pub fn set_fail_on_refund(&self, kind: Option<GatewayErrorKind>) {
        self.state().fail_on_refund = kind;
    }

    /// Delays every intent and transfer call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Marks an intent as paid by the buyer. Returns false if it is unknown.
    pub fn succeed_payment_intent(&self, id: &str) -> bool {
        match self.state().intents.get_mut(id) {
            Some(intent) => {
                intent.status = PaymentIntentStatus::Succeeded;
                true
            }
            None => false,
        }
    }

    pub fn payment_intent_count(&self) -> usize {
        self.state().intents.len()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state().transfers.clone()
    }

    pub fn refunds(&self) -> Vec<ProviderRefund> {
        self.state().refunds.clone()
    }

    async fn simulate_latency(&self) {
        let latency = self.state().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_payment_intent(
        &self,
        amount: Money,
        currency: &str,
        _metadata: Metadata,
    ) -> Result<PaymentIntent, GatewayError> {
        self.simulate_latency().await;
        let mut state = self.state();

        if let Some(kind) = state.fail_on_payment_intent {
            return Err(GatewayError::new(kind, "payment intent declined"));
        }

        let id = state.next_id("pi");
        let intent = PaymentIntent {
            client_secret: format!("{id}_secret"),
            id: id.clone(),
            amount,
            currency: currency.to_string(),
            status: PaymentIntentStatus::RequiresPayment,
        };
        state.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        self.state().intents.get(id).cloned().ok_or_else(|| {
            GatewayError::new(
                GatewayErrorKind::Permanent,
                format!("no such payment intent: {id}"),
            )
        })
    }

    async fn create_transfer(
        &self,
        amount: Money,
        _currency: &str,
        destination: &str,
        idempotency_key: &str,
        _metadata: Metadata,
    ) -> Result<Transfer, GatewayError> {
        self.simulate_latency().await;
        let mut state = self.state();

        if let Some(kind) = state.fail_on_transfer {
            return Err(GatewayError::new(kind, "transfer rejected"));
        }
        if let Some(existing) = state.transfer_keys.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let transfer = Transfer {
            id: state.next_id("tr"),
            amount,
            destination: destination.to_string(),
        };
        state.transfers.push(transfer.clone());
        state
            .transfer_keys
            .insert(idempotency_key.to_string(), transfer.clone());
        Ok(transfer)
    }

    async fn create_refund(
        &self,
        payment_reference: &str,
        amount: Money,
    ) -> Result<ProviderRefund, GatewayError> {
        let mut state = self.state();

        if let Some(kind) = state.fail_on_refund {
            return Err(GatewayError::new(kind, "refund rejected"));
        }
        let captured = state
            .intents
            .get(payment_reference)
            .filter(|intent| intent.status == PaymentIntentStatus::Succeeded)
            .map(|intent| intent.amount);
        let refunded: Money = state
            .refunds
            .iter()
            .filter(|refund| refund.payment_reference == payment_reference)
            .map(|refund| refund.amount)
            .sum();
        match captured {
            Some(captured) if refunded + amount <= captured => {}
            Some(_) => {
                return Err(GatewayError::new(
                    GatewayErrorKind::Permanent,
                    "refund exceeds captured amount",
                ));
            }
            None => {
                return Err(GatewayError::new(
                    GatewayErrorKind::Permanent,
                    format!("no captured payment for {payment_reference}"),
                ));
            }
        }

        let refund = ProviderRefund {
            id: state.next_id("re"),
            payment_reference: payment_reference.to_string(),
            amount,
        };
        state.refunds.push(refund.clone());
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_intent_lifecycle() {
        let gateway = InMemoryPaymentGateway::new();

        let intent = gateway
            .create_payment_intent(Money::from_cents(5000), "usd", Metadata::new())
            .await
            .unwrap();
        assert_eq!(intent.id, "pi_0001");
        assert_eq!(intent.client_secret, "pi_0001_secret");
        assert_eq!(intent.status, PaymentIntentStatus::RequiresPayment);

        assert!(gateway.succeed_payment_intent(&intent.id));
        let retrieved = gateway.retrieve_payment_intent(&intent.id).await.unwrap();
        assert_eq!(retrieved.status, PaymentIntentStatus::Succeeded);
        assert_eq!(retrieved.amount, Money::from_cents(5000));
    }

    #[tokio::test]
    async fn test_injected_failures_carry_kind() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_on_payment_intent(Some(GatewayErrorKind::Permanent));
        gateway.set_fail_on_transfer(Some(GatewayErrorKind::Transient));

        let err = gateway
            .create_payment_intent(Money::from_cents(100), "usd", Metadata::new())
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        let err = gateway
            .create_transfer(Money::from_cents(100), "usd", "acct_1", "payout-1", Metadata::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(gateway.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_is_idempotent_per_key() {
        let gateway = InMemoryPaymentGateway::new();
        let amount = Money::from_cents(900);

        let first = gateway
            .create_transfer(amount, "usd", "acct_1", "payout-1", Metadata::new())
            .await
            .unwrap();
        let replay = gateway
            .create_transfer(amount, "usd", "acct_1", "payout-1", Metadata::new())
            .await
            .unwrap();
        let other = gateway
            .create_transfer(amount, "usd", "acct_1", "payout-2", Metadata::new())
            .await
            .unwrap();

        assert_eq!(first, replay);
        assert_ne!(first.id, other.id);
        assert_eq!(gateway.transfers().len(), 2);
    }

    #[tokio::test]
    async fn test_refund_requires_captured_payment() {
        let gateway = InMemoryPaymentGateway::new();
        let intent = gateway
            .create_payment_intent(Money::from_cents(1000), "usd", Metadata::new())
            .await
            .unwrap();

        assert!(gateway
            .create_refund(&intent.id, Money::from_cents(500))
            .await
            .is_err());

        gateway.succeed_payment_intent(&intent.id);
        assert!(gateway
            .create_refund(&intent.id, Money::from_cents(1500))
            .await
            .is_err());

        let refund = gateway
            .create_refund(&intent.id, Money::from_cents(500))
            .await
            .unwrap();
        assert_eq!(refund.amount, Money::from_cents(500));
        assert_eq!(gateway.refunds().len(), 1);

        assert!(gateway
            .create_refund(&intent.id, Money::from_cents(501))
            .await
            .is_err());
        gateway
            .create_refund(&intent.id, Money::from_cents(500))
            .await
            .unwrap();
        assert_eq!(gateway.refunds().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_latency(Duration::from_secs(30));

        let err = with_timeout(
            Duration::from_secs(1),
            gateway.create_payment_intent(Money::from_cents(100), "usd", Metadata::new()),
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
        assert!(err.message.contains("timed out"));
        assert_eq!(gateway.payment_intent_count(), 0);
    }
}
