//! Post-checkout order lifecycle.

use common::{BuyerId, OrderId, SellerId};
use domain::{Actor, Cancellation, Order, OrderError, Payout, WalletCredit};
use store::{SettlementStore, Versioned};

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use crate::payout::PayoutProcessor;
use crate::services::{
    InventoryReservationService, PaymentGateway, PaymentIntentStatus, Reservation, with_timeout,
};

/// A completed order and the payouts its completion created.
#[derive(Debug, Clone)]
pub struct CompletedOrder {
    pub order: Versioned<Order>,
    pub payouts: Vec<Versioned<Payout>>,
}

/// Applies status transitions to stored orders.
///
/// Each transition loads the order, applies the move on the aggregate and
/// writes it back with a compare-and-set, so two racing transitions on the
/// same order never both succeed. Side effects (wallet credits, restocks,
/// payout creation) run only after the new status is stored.
pub struct OrderTransitionService<S, G> {
    store: S,
    gateway: G,
    inventory: InventoryReservationService<S>,
    payouts: PayoutProcessor<S, G>,
    config: SettlementConfig,
}

impl<S, G> OrderTransitionService<S, G>
where
    S: SettlementStore,
    G: PaymentGateway + Clone,
{
    pub fn new(store: S, gateway: G, config: SettlementConfig) -> Self {
        Self {
            inventory: InventoryReservationService::new(store.clone(), config.compensation_retry),
            payouts: PayoutProcessor::new(store.clone(), gateway.clone(), config.clone()),
            store,
            gateway,
            config,
        }
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Versioned<Order>> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }

    /// Marks the order paid once the provider reports its intent succeeded.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_payment(&self, order_id: OrderId) -> Result<Versioned<Order>> {
        let Versioned { value: mut order, version } = self.get_order(order_id).await?;
        let intent_id = order
            .payment_intent_id()
            .ok_or(OrderError::PaymentIntentMissing)?
            .to_string();

        let intent = with_timeout(
            self.config.gateway_timeout,
            self.gateway.retrieve_payment_intent(&intent_id),
        )
        .await?;
        if intent.status != PaymentIntentStatus::Succeeded {
            tracing::warn!(status = intent.status.as_str(), "payment not captured yet");
            return Err(SettlementError::PaymentNotSucceeded {
                status: intent.status.as_str().to_string(),
            });
        }

        order.mark_paid(&intent.id)?;
        let version = self.store.update_order(&order, version).await?;
        tracing::info!(total = order.total().cents(), "order paid");
        Ok(Versioned::new(order, version))
    }

    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, order_id: OrderId, seller_id: SellerId) -> Result<Versioned<Order>> {
        self.transition(order_id, |order| order.confirm(seller_id)).await
    }

    /// Seller declines; stock goes back and a paid order is credited.
    #[tracing::instrument(skip(self, reason))]
    pub async fn reject(
        &self,
        order_id: OrderId,
        seller_id: SellerId,
        reason: String,
    ) -> Result<Versioned<Order>> {
        let Versioned { value: mut order, version } = self.get_order(order_id).await?;
        let effects = order.reject(seller_id, reason)?;
        let version = self.store.update_order(&order, version).await?;
        tracing::info!("order rejected by seller");

        self.settle_cancellation(&order, effects, "order rejected by seller")
            .await?;
        Ok(Versioned::new(order, version))
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship(
        &self,
        order_id: OrderId,
        seller_id: SellerId,
        tracking_number: Option<String>,
    ) -> Result<Versioned<Order>> {
        self.transition(order_id, |order| order.ship(seller_id, tracking_number))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver(&self, order_id: OrderId, seller_id: SellerId) -> Result<Versioned<Order>> {
        self.transition(order_id, |order| order.mark_delivered(seller_id))
            .await
    }

    /// Buyer confirms receipt; completes the order and creates its payouts.
    #[tracing::instrument(skip(self))]
    pub async fn receive(&self, order_id: OrderId, buyer_id: BuyerId) -> Result<CompletedOrder> {
        let order = self
            .transition(order_id, |order| order.confirm_receipt(buyer_id))
            .await?;

        let payouts = self.payouts.create_for(&order.value).await.map_err(|e| {
            tracing::error!(
                total = order.value.total().cents(),
                error = %e,
                "order completed but payout creation failed"
            );
            e
        })?;
        Ok(CompletedOrder { order, payouts })
    }

    /// Cancels from any pre-terminal status.
    ///
    /// Money captured by the provider is credited to the buyer's wallet in
    /// full; stock is restored if the goods never left the seller.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        order_id: OrderId,
        actor: Actor,
        reason: String,
    ) -> Result<Versioned<Order>> {
        let Versioned { value: mut order, version } = self.get_order(order_id).await?;
        let effects = order.cancel(&actor, reason)?;
        let version = self.store.update_order(&order, version).await?;
        tracing::info!(actor = %actor, "order cancelled");

        self.settle_cancellation(&order, effects, "order cancelled").await?;
        Ok(Versioned::new(order, version))
    }

    async fn transition<F>(&self, order_id: OrderId, apply: F) -> Result<Versioned<Order>>
    where
        F: FnOnce(&mut Order) -> std::result::Result<(), OrderError>,
    {
        let Versioned { value: mut order, version } = self.get_order(order_id).await?;
        apply(&mut order)?;
        let version = self.store.update_order(&order, version).await?;
        tracing::info!(status = %order.status(), "order transitioned");
        Ok(Versioned::new(order, version))
    }

    async fn settle_cancellation(
        &self,
        order: &Order,
        effects: Cancellation,
        reason: &str,
    ) -> Result<()> {
        if let Some(amount) = effects.wallet_credit {
            self.store
                .credit(WalletCredit::new(order.buyer_id(), order.id(), amount, reason))
                .await
                .map_err(|e| {
                    tracing::error!(
                        order_id = %order.id(),
                        buyer_id = %order.buyer_id(),
                        amount = amount.cents(),
                        error = %e,
                        "wallet credit failed, manual reconciliation needed"
                    );
                    e
                })?;
            tracing::info!(amount = amount.cents(), "buyer wallet credited");
        }

        if effects.restock {
            self.inventory.release(&Reservation::for_order(order)).await?;
        }
        Ok(())
    }
}
