//! All-or-nothing stock reservation on top of the catalog store.

use common::OrderId;
use domain::{Order, ProductId};
use store::{CatalogStore, StoreError};

use crate::config::RetryPolicy;
use crate::error::{Result, SettlementError};

/// A product and the quantity to take from (or give back to) its stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl ReservationLine {
    pub fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Stock taken for one order and not yet given back.
///
/// Lines hold distinct products, so `order_id` plus product identifies a
/// release and makes giving the stock back idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    order_id: OrderId,
    lines: Vec<ReservationLine>,
}

impl Reservation {
    pub fn new(order_id: OrderId, lines: Vec<ReservationLine>) -> Self {
        Self { order_id, lines }
    }

    /// Builds the reservation an order's line items stand for.
    pub fn for_order(order: &Order) -> Self {
        Self::new(
            order.id(),
            order
                .items()
                .iter()
                .map(|item| ReservationLine::new(item.product_id.clone(), item.quantity))
                .collect(),
        )
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn lines(&self) -> &[ReservationLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn release_key(&self, line: &ReservationLine) -> String {
        format!("{}:{}", self.order_id, line.product_id)
    }
}

/// Decrements stock for every line or for none.
///
/// Lines are decremented one at a time with the store's conditional
/// decrement. When one does not match, the lines already taken are given
/// back in reverse before the shortfall is reported.
#[derive(Debug, Clone)]
pub struct InventoryReservationService<C> {
    catalog: C,
    retry: RetryPolicy,
}

impl<C: CatalogStore> InventoryReservationService<C> {
    pub fn new(catalog: C, retry: RetryPolicy) -> Self {
        Self { catalog, retry }
    }

    #[tracing::instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn reserve(
        &self,
        order_id: OrderId,
        lines: &[ReservationLine],
    ) -> Result<Reservation> {
        let mut taken: Vec<ReservationLine> = Vec::with_capacity(lines.len());

        for line in lines {
            match self
                .catalog
                .decrement_stock_if_available(&line.product_id, line.quantity)
                .await
            {
                Ok(true) => taken.push(line.clone()),
                Ok(false) => {
                    metrics::counter!("inventory_reservation_conflicts_total").increment(1);
                    tracing::warn!(
                        product_id = %line.product_id,
                        requested = line.quantity,
                        "stock decrement did not match, releasing taken lines"
                    );
                    self.release(&Reservation::new(order_id, taken)).await?;

                    let available = self
                        .catalog
                        .get_product(&line.product_id)
                        .await?
                        .map(|product| product.stock)
                        .unwrap_or(0);
                    return Err(SettlementError::InsufficientStock {
                        product_id: line.product_id.clone(),
                        available,
                        requested: line.quantity,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        product_id = %line.product_id,
                        error = %e,
                        "stock decrement failed, releasing taken lines"
                    );
                    self.release(&Reservation::new(order_id, taken)).await?;
                    return Err(e.into());
                }
            }
        }

        Ok(Reservation::new(order_id, taken))
    }

    /// Gives reserved stock back, most recent line first.
    ///
    /// Each line is released under its own key, so retrying after an
    /// ambiguous store failure or releasing the same reservation twice
    /// never adds stock twice. Every line is attempted even if an earlier
    /// one exhausted its retry budget; the first such failure is returned.
    #[tracing::instrument(
        skip(self, reservation),
        fields(order_id = %reservation.order_id(), lines = reservation.lines().len())
    )]
    pub async fn release(&self, reservation: &Reservation) -> Result<()> {
        let mut first_failure = None;

        for line in reservation.lines().iter().rev() {
            let key = reservation.release_key(line);
            if let Err(e) = self.release_with_retry(&key, line).await {
                tracing::error!(
                    product_id = %line.product_id,
                    quantity = line.quantity,
                    error = %e,
                    "stock release exhausted its retry budget, manual reconciliation needed"
                );
                first_failure.get_or_insert(SettlementError::CompensationFailed {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    reason: e.to_string(),
                });
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn release_with_retry(
        &self,
        key: &str,
        line: &ReservationLine,
    ) -> std::result::Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self
                .catalog
                .release_stock(key, &line.product_id, line.quantity)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::debug!(release_key = key, "stock already released");
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        product_id = %line.product_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "stock release failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use common::SellerId;
    use domain::{Money, Product};
    use store::InMemoryStore;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    async fn store_with(products: &[(&str, u32)]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for (id, stock) in products {
            store
                .upsert_product(Product::new(
                    *id,
                    SellerId::new(),
                    *id,
                    Money::from_cents(100),
                    *stock,
                ))
                .await;
        }
        store
    }

    fn line(id: &str, quantity: u32) -> ReservationLine {
        ReservationLine::new(ProductId::new(id), quantity)
    }

    #[tokio::test]
    async fn test_reserve_all_lines() {
        let store = store_with(&[("A", 5), ("B", 2)]).await;
        let service = InventoryReservationService::new(store.clone(), fast_retry(3));

        let reservation = service
            .reserve(OrderId::new(), &[line("A", 3), line("B", 2)])
            .await
            .unwrap();

        assert_eq!(reservation.lines().len(), 2);
        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(2));
        assert_eq!(store.stock_of(&ProductId::new("B")).await, Some(0));
    }

    #[tokio::test]
    async fn test_shortfall_gives_back_taken_lines() {
        let store = store_with(&[("A", 5), ("B", 1)]).await;
        let service = InventoryReservationService::new(store.clone(), fast_retry(3));

        let result = service
            .reserve(OrderId::new(), &[line("A", 3), line("B", 2)])
            .await;

        assert!(matches!(
            result,
            Err(SettlementError::InsufficientStock { ref product_id, available: 1, requested: 2 })
                if product_id.as_str() == "B"
        ));
        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(5));
        assert_eq!(store.stock_of(&ProductId::new("B")).await, Some(1));
    }

    #[tokio::test]
    async fn test_release_retries_transient_failures() {
        let store = store_with(&[("A", 5)]).await;
        let service = InventoryReservationService::new(store.clone(), fast_retry(3));
        let reservation = service.reserve(OrderId::new(), &[line("A", 2)]).await.unwrap();

        store.fail_next_stock_increments(2);
        service.release(&reservation).await.unwrap();

        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(5));
    }

    #[tokio::test]
    async fn test_release_reports_exhausted_budget() {
        let store = store_with(&[("A", 5), ("B", 5)]).await;
        let service = InventoryReservationService::new(store.clone(), fast_retry(2));
        let reservation = service
            .reserve(OrderId::new(), &[line("A", 1), line("B", 1)])
            .await
            .unwrap();

        // B is released first and burns both failures
        store.fail_next_stock_increments(2);
        let result = service.release(&reservation).await;

        assert!(matches!(
            result,
            Err(SettlementError::CompensationFailed { ref product_id, quantity: 1, .. })
                if product_id.as_str() == "B"
        ));
        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(5));
        assert_eq!(store.stock_of(&ProductId::new("B")).await, Some(4));
    }

    #[tokio::test]
    async fn test_release_after_lost_acknowledgement_adds_stock_once() {
        let store = store_with(&[("A", 5)]).await;
        let service = InventoryReservationService::new(store.clone(), fast_retry(3));
        let reservation = service.reserve(OrderId::new(), &[line("A", 2)]).await.unwrap();

        // The first release commits but reports a failure, so it is retried.
        store.lose_next_release_acks(1);
        service.release(&reservation).await.unwrap();
        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(5));

        service.release(&reservation).await.unwrap();
        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(5));
    }

    #[tokio::test]
    async fn test_releases_of_different_orders_are_independent() {
        let store = store_with(&[("A", 4)]).await;
        let service = InventoryReservationService::new(store.clone(), fast_retry(3));
        let first = service.reserve(OrderId::new(), &[line("A", 1)]).await.unwrap();
        let second = service.reserve(OrderId::new(), &[line("A", 1)]).await.unwrap();
        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(2));

        service.release(&first).await.unwrap();
        service.release(&second).await.unwrap();

        assert_eq!(store.stock_of(&ProductId::new("A")).await, Some(4));
    }
}
