//! Buyer refund requests and their admin review.

use common::{BuyerId, OrderId, RefundId};
use domain::{Money, OrderError, Refund, refunded_total};
use store::{SettlementStore, StoreError, Versioned};

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use crate::services::{PaymentGateway, with_timeout};

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub order_id: OrderId,
    pub buyer_id: BuyerId,
    /// Defaults to what is left of the order total.
    pub amount: Option<Money>,
    pub reason: String,
    pub evidence: Vec<String>,
}

pub struct RefundWorkflow<S, G> {
    store: S,
    gateway: G,
    config: SettlementConfig,
}

impl<S, G> RefundWorkflow<S, G>
where
    S: SettlementStore,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, config: SettlementConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub async fn get_refund(&self, refund_id: RefundId) -> Result<Versioned<Refund>> {
        self.store
            .get_refund(refund_id)
            .await?
            .ok_or(SettlementError::RefundNotFound(refund_id))
    }

    pub async fn refunds_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Refund>>> {
        Ok(self.store.refunds_for_order(order_id).await?)
    }

    /// Opens a refund request against a delivered or completed order.
    ///
    /// The amount is capped at the order total minus approved refunds.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn request(&self, request: RefundRequest) -> Result<Versioned<Refund>> {
        let order = self
            .store
            .get_order(request.order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(request.order_id))?;
        let refunded = self.refunded_on(request.order_id).await?;

        let refund = Refund::request(
            &order.value,
            refunded,
            request.buyer_id,
            request.amount,
            request.reason,
            request.evidence,
        )?;

        let version = match self.store.insert_refund(&refund).await {
            Ok(version) => version,
            Err(StoreError::RefundAlreadyPending(order_id)) => {
                tracing::warn!("refund already pending for order");
                return Err(SettlementError::RefundAlreadyPending(order_id));
            }
            Err(e) => return Err(e.into()),
        };

        metrics::counter!("refunds_total", "outcome" => "requested").increment(1);
        tracing::info!(
            refund_id = %refund.id(),
            amount = refund.amount().cents(),
            "refund requested"
        );
        Ok(Versioned::new(refund, version))
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_review(&self, refund_id: RefundId, admin: String) -> Result<Versioned<Refund>> {
        let Versioned { value: mut refund, version } = self.get_refund(refund_id).await?;
        refund.start_review(admin)?;
        let version = self.store.update_refund(&refund, version).await?;
        Ok(Versioned::new(refund, version))
    }

    /// Refunds the buyer through the provider.
    ///
    /// The remaining refundable balance is checked again first, so an
    /// approval never pushes refunds past the order total. A provider
    /// failure moves the refund to `failed` with the error recorded; the
    /// order itself is never touched.
    #[tracing::instrument(skip(self))]
    pub async fn approve(&self, refund_id: RefundId, admin: String) -> Result<Versioned<Refund>> {
        let Versioned { value: mut refund, version } = self.get_refund(refund_id).await?;
        refund.ensure_approvable()?;

        let order = self
            .store
            .get_order(refund.order_id())
            .await?
            .ok_or(SettlementError::OrderNotFound(refund.order_id()))?;
        let payment_reference = order
            .value
            .payment_intent_id()
            .ok_or(OrderError::PaymentIntentMissing)?
            .to_string();
        let refunded = self.refunded_on(refund.order_id()).await?;
        if let Err(e) = refund.ensure_within(order.value.total() - refunded) {
            tracing::warn!(
                amount = refund.amount().cents(),
                refunded = refunded.cents(),
                error = %e,
                "refund exceeds remaining balance"
            );
            return Err(e.into());
        }

        // Claim the version so a racing approval fails before reaching the provider.
        let version = self.store.update_refund(&refund, version).await?;

        let result = with_timeout(
            self.config.gateway_timeout,
            self.gateway
                .create_refund(&payment_reference, refund.amount()),
        )
        .await;

        match result {
            Ok(provider_refund) => {
                refund.approve(provider_refund.id, admin)?;
                tracing::info!(
                    order_id = %refund.order_id(),
                    amount = refund.amount().cents(),
                    "refund approved"
                );
            }
            Err(e) => {
                refund.mark_failed(e.to_string(), admin)?;
                tracing::error!(
                    order_id = %refund.order_id(),
                    amount = refund.amount().cents(),
                    error = %e,
                    "provider refund failed"
                );
            }
        }
        metrics::counter!("refunds_total", "outcome" => refund.status().as_str()).increment(1);

        let version = self.store.update_refund(&refund, version).await?;
        Ok(Versioned::new(refund, version))
    }

    #[tracing::instrument(skip(self))]
    pub async fn reject(
        &self,
        refund_id: RefundId,
        admin: String,
        note: Option<String>,
    ) -> Result<Versioned<Refund>> {
        let Versioned { value: mut refund, version } = self.get_refund(refund_id).await?;
        refund.reject(admin, note)?;
        let version = self.store.update_refund(&refund, version).await?;
        metrics::counter!("refunds_total", "outcome" => "rejected").increment(1);
        Ok(Versioned::new(refund, version))
    }

    async fn refunded_on(&self, order_id: OrderId) -> Result<Money> {
        let refunds = self.store.refunds_for_order(order_id).await?;
        Ok(refunded_total(refunds.iter().map(|refund| &refund.value)))
    }
}
