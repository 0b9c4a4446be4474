//! Checkout orchestration.

use std::time::Instant;

use common::BuyerId;
use domain::{LineItem, Money, NewOrder, Order, OrderSource, ProductId, ShippingAddress};
use store::{SettlementStore, Version, Versioned};

use crate::config::SettlementConfig;
use crate::error::{Result, SettlementError};
use crate::saga::{CheckoutSaga, Compensation, CompletedStep};
use crate::services::{
    InventoryReservationService, Metadata, PaymentGateway, PaymentIntent, ReservationLine,
    with_timeout,
};

/// What the buyer is checking out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutSource {
    /// "Buy now" on a single product.
    Product { product_id: ProductId, quantity: u32 },
    /// Everything in the buyer's persisted cart.
    Cart,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub buyer_id: BuyerId,
    pub source: CheckoutSource,
    pub shipping_address: ShippingAddress,
    /// Falls back to the configured default currency.
    pub currency: Option<String>,
}

/// A placed order awaiting the buyer's payment.
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    pub order: Versioned<Order>,
    /// Handed to the buyer's client to pay the intent.
    pub client_secret: String,
}

/// Runs the checkout saga.
///
/// Steps: build line items, validate them against the catalog, reserve
/// stock, persist the order, then request a payment intent. A failure after
/// the reservation undoes the completed steps, so the caller either gets a
/// `pending_payment` order with a payment intent or no side effects at all.
pub struct CheckoutOrchestrator<S, G> {
    store: S,
    gateway: G,
    inventory: InventoryReservationService<S>,
    config: SettlementConfig,
}

impl<S, G> CheckoutOrchestrator<S, G>
where
    S: SettlementStore,
    G: PaymentGateway,
{
    pub fn new(store: S, gateway: G, config: SettlementConfig) -> Self {
        let inventory = InventoryReservationService::new(store.clone(), config.compensation_retry);
        Self {
            store,
            gateway,
            inventory,
            config,
        }
    }

    #[tracing::instrument(skip(self, request), fields(buyer_id = %request.buyer_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_total").increment(1);
        let started = Instant::now();

        let result = self.run(request).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!("checkout_failed_total", "reason" => e.kind_label()).increment(1);
            tracing::warn!(error = %e, "checkout failed");
        }
        result
    }

    async fn run(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        let buyer_id = request.buyer_id;
        let (source, lines) = self.build_lines(&request).await?;
        let items = self.price_lines(&lines).await?;

        let subtotal: Money = items.iter().map(LineItem::total_price).sum();
        let mut order = Order::place(NewOrder {
            buyer_id,
            items,
            shipping: self.config.shipping.fee_for(subtotal),
            currency: request
                .currency
                .unwrap_or_else(|| self.config.currency.clone()),
            shipping_address: request.shipping_address,
            source,
        })?;
        let mut saga = CheckoutSaga::new(order.id());

        tracing::info!(order_id = %order.id(), step = "reserve_stock", "checkout step started");
        let reservation = self.inventory.reserve(order.id(), &lines).await?;
        saga.record(CompletedStep::StockReserved(reservation))?;

        tracing::info!(order_id = %order.id(), step = "persist_order", "checkout step started");
        let version = match self.store.insert_order(&order).await {
            Ok(version) => version,
            Err(e) => return Err(self.compensate(&mut saga, e.into()).await),
        };
        saga.record(CompletedStep::OrderPersisted(order.id()))?;

        tracing::info!(
            order_id = %order.id(),
            step = "request_payment_intent",
            "checkout step started"
        );
        let intent = match self.request_payment_intent(&order).await {
            Ok(intent) => intent,
            Err(e) => return Err(self.compensate(&mut saga, e).await),
        };
        saga.record(CompletedStep::PaymentIntentCreated {
            payment_intent_id: intent.id.clone(),
        })?;

        let version = match self.attach_intent(&mut order, &intent, version).await {
            Ok(version) => version,
            Err(e) => return Err(self.compensate(&mut saga, e).await),
        };

        if source == OrderSource::Cart {
            if let Err(e) = self.store.clear_cart(buyer_id).await {
                tracing::warn!(
                    order_id = %order.id(),
                    error = %e,
                    "failed to clear cart after checkout"
                );
            }
        }

        saga.commit()?;
        tracing::info!(
            order_id = %order.id(),
            total = order.total().cents(),
            currency = order.currency(),
            "checkout completed"
        );

        Ok(CheckoutReceipt {
            client_secret: intent.client_secret,
            order: Versioned::new(order, version),
        })
    }

    /// Resolves the requested lines, merging repeated products.
    async fn build_lines(&self, request: &CheckoutRequest) -> Result<(OrderSource, Vec<ReservationLine>)> {
        let (source, requested) = match &request.source {
            CheckoutSource::Product {
                product_id,
                quantity,
            } => (
                OrderSource::Product,
                vec![ReservationLine::new(product_id.clone(), *quantity)],
            ),
            CheckoutSource::Cart => {
                let cart = self.store.get_cart(request.buyer_id).await?;
                if cart.is_empty() {
                    return Err(SettlementError::EmptyCart);
                }
                let lines = cart
                    .into_iter()
                    .map(|item| ReservationLine::new(item.product_id, item.quantity))
                    .collect();
                (OrderSource::Cart, lines)
            }
        };

        let mut merged: Vec<ReservationLine> = Vec::with_capacity(requested.len());
        for line in requested {
            if line.quantity == 0 {
                return Err(SettlementError::InvalidQuantity {
                    product_id: line.product_id,
                    quantity: 0,
                });
            }
            match merged.iter_mut().find(|m| m.product_id == line.product_id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
                None => merged.push(line),
            }
        }
        Ok((source, merged))
    }

    /// Snapshots current prices and checks stock without mutating anything.
    async fn price_lines(&self, lines: &[ReservationLine]) -> Result<Vec<LineItem>> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .store
                .get_product(&line.product_id)
                .await?
                .ok_or_else(|| SettlementError::ProductNotFound(line.product_id.clone()))?;

            if !product.has_stock_for(line.quantity) {
                return Err(SettlementError::InsufficientStock {
                    product_id: product.id,
                    available: product.stock,
                    requested: line.quantity,
                });
            }

            items.push(LineItem::new(
                product.id,
                product.seller_id,
                product.name,
                line.quantity,
                product.price,
            ));
        }
        Ok(items)
    }

    async fn request_payment_intent(&self, order: &Order) -> Result<PaymentIntent> {
        let metadata = Metadata::from([
            ("order_id".to_string(), order.id().to_string()),
            ("buyer_id".to_string(), order.buyer_id().to_string()),
        ]);
        with_timeout(
            self.config.gateway_timeout,
            self.gateway
                .create_payment_intent(order.total(), order.currency(), metadata),
        )
        .await
        .map_err(|e| SettlementError::PaymentIntentFailed {
            transient: e.is_transient(),
            details: e.message,
        })
    }

    async fn attach_intent(
        &self,
        order: &mut Order,
        intent: &PaymentIntent,
        expected: Version,
    ) -> Result<Version> {
        order.attach_payment_intent(&intent.id, &intent.client_secret)?;
        Ok(self.store.update_order(order, expected).await?)
    }

    /// Undoes the saga's completed steps, most recent first.
    ///
    /// Returns the error to surface: the first compensation failure if any,
    /// otherwise `cause`.
    async fn compensate(&self, saga: &mut CheckoutSaga, cause: SettlementError) -> SettlementError {
        let compensations = match saga.begin_compensation(cause.to_string()) {
            Ok(compensations) => compensations,
            Err(e) => return e,
        };
        metrics::counter!("checkout_compensations_total").increment(1);
        tracing::warn!(order_id = %saga.order_id(), error = %cause, "compensating checkout");

        let mut failure = None;
        for compensation in compensations {
            match compensation {
                Compensation::DeleteOrder(order_id) => {
                    if let Err(e) = self.store.delete_order(order_id).await {
                        tracing::error!(
                            order_id = %order_id,
                            error = %e,
                            "failed to delete order during compensation"
                        );
                        failure.get_or_insert(SettlementError::Store(e));
                    }
                }
                Compensation::ReleaseStock(reservation) => {
                    if let Err(e) = self.inventory.release(&reservation).await {
                        failure.get_or_insert(e);
                    }
                }
            }
        }

        if let Err(e) = saga.finish_compensation() {
            tracing::error!(order_id = %saga.order_id(), error = %e, "saga left compensating");
        }
        failure.unwrap_or(cause)
    }
}
