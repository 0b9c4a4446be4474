use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, PayoutId, RefundId, SellerId};
use domain::{CartItem, Order, Payout, PayoutStatus, Product, ProductId, Refund, WalletCredit};
use tokio::sync::RwLock;

use crate::{
    CartStore, CatalogStore, OrderStore, PayoutStore, RefundStore, Result, SellerAccountStore,
    StoreError, Version, Versioned, WalletStore,
};

#[derive(Debug, Default)]
struct FaultInjection {
    stock_increment_failures: AtomicU32,
    lost_release_acks: AtomicU32,
    fail_order_updates: AtomicBool,
    fail_payout_updates: AtomicBool,
    payout_updates_before_failure: AtomicU32,
    fail_cart_clear: AtomicBool,
}

/// Consumes one unit of an injected fault budget.
fn take(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory store implementation for testing and the default server.
///
/// Every collection sits behind its own `RwLock`; conditional updates run
/// inside a single write section, which gives them the same atomicity as
/// the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    stock_releases: Arc<RwLock<HashSet<String>>>,
    carts: Arc<RwLock<HashMap<BuyerId, Vec<CartItem>>>>,
    orders: Arc<RwLock<HashMap<OrderId, Versioned<Order>>>>,
    payouts: Arc<RwLock<HashMap<PayoutId, Versioned<Payout>>>>,
    refunds: Arc<RwLock<HashMap<RefundId, Versioned<Refund>>>>,
    wallet: Arc<RwLock<Vec<WalletCredit>>>,
    payout_destinations: Arc<RwLock<HashMap<SellerId, String>>>,
    faults: Arc<FaultInjection>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product);
    }

    /// Returns a product's current stock, if it exists.
    pub async fn stock_of(&self, id: &ProductId) -> Option<u32> {
        self.products.read().await.get(id).map(|p| p.stock)
    }

    /// Replaces a buyer's cart.
    pub async fn set_cart(&self, buyer_id: BuyerId, items: Vec<CartItem>) {
        self.carts.write().await.insert(buyer_id, items);
    }

    /// Configures where a seller's payouts are transferred to.
    pub async fn set_payout_destination(&self, seller_id: SellerId, destination: impl Into<String>) {
        self.payout_destinations
            .write()
            .await
            .insert(seller_id, destination.into());
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// Makes the next `count` stock releases fail before touching stock.
    pub fn fail_next_stock_increments(&self, count: u32) {
        self.faults
            .stock_increment_failures
            .store(count, Ordering::SeqCst);
    }

    /// Applies the next `count` stock releases but reports them as failed,
    /// like a connection dropped after commit.
    pub fn lose_next_release_acks(&self, count: u32) {
        self.faults.lost_release_acks.store(count, Ordering::SeqCst);
    }

    /// Configures order updates to fail.
    pub fn set_fail_order_updates(&self, fail: bool) {
        self.faults.fail_order_updates.store(fail, Ordering::SeqCst);
    }

    /// Configures payout updates to fail once `allowed` more have gone
    /// through. `None` lets every update through again.
    pub fn fail_payout_updates_after(&self, allowed: Option<u32>) {
        self.faults
            .payout_updates_before_failure
            .store(allowed.unwrap_or(0), Ordering::SeqCst);
        self.faults
            .fail_payout_updates
            .store(allowed.is_some(), Ordering::SeqCst);
    }

    /// Configures cart clearing to fail.
    pub fn set_fail_cart_clear(&self, fail: bool) {
        self.faults.fail_cart_clear.store(fail, Ordering::SeqCst);
    }

    fn payout_update_fails(&self) -> bool {
        self.faults.fail_payout_updates.load(Ordering::SeqCst)
            && !take(&self.faults.payout_updates_before_failure)
    }
}

fn check_version(
    entity: &'static str,
    id: impl ToString,
    current: Option<Version>,
    expected: Version,
) -> Result<()> {
    match current {
        None => Err(StoreError::NotFound {
            entity,
            id: id.to_string(),
        }),
        Some(actual) if actual != expected => Err(StoreError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        }),
        Some(_) => Ok(()),
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn decrement_stock_if_available(&self, id: &ProductId, quantity: u32) -> Result<bool> {
        let mut products = self.products.write().await;
        match products.get_mut(id) {
            Some(product) if product.stock >= quantity => {
                product.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stock(
        &self,
        release_key: &str,
        id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        if take(&self.faults.stock_increment_failures) {
            return Err(StoreError::Unavailable(format!(
                "stock release for {id} rejected"
            )));
        }

        {
            let mut releases = self.stock_releases.write().await;
            if releases.contains(release_key) {
                return Ok(false);
            }
            let mut products = self.products.write().await;
            let product = products.get_mut(id).ok_or_else(|| StoreError::NotFound {
                entity: "product",
                id: id.to_string(),
            })?;
            product.stock = product.stock.saturating_add(quantity);
            releases.insert(release_key.to_string());
        }

        if take(&self.faults.lost_release_acks) {
            return Err(StoreError::Unavailable(format!(
                "connection lost after releasing {id}"
            )));
        }
        Ok(true)
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_cart(&self, buyer_id: BuyerId) -> Result<Vec<CartItem>> {
        Ok(self
            .carts
            .read()
            .await
            .get(&buyer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear_cart(&self, buyer_id: BuyerId) -> Result<()> {
        if self.faults.fail_cart_clear.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("cart clear rejected".to_string()));
        }
        self.carts.write().await.remove(&buyer_id);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id()) {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: order.id().to_string(),
            });
        }
        orders.insert(order.id(), Versioned::new(order.clone(), Version::first()));
        Ok(Version::first())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version> {
        if self.faults.fail_order_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("order update rejected".to_string()));
        }

        let mut orders = self.orders.write().await;
        let current = orders.get(&order.id()).map(|o| o.version);
        check_version("order", order.id(), current, expected)?;

        let next = expected.next();
        orders.insert(order.id(), Versioned::new(order.clone(), next));
        Ok(next)
    }

    async fn delete_order(&self, id: OrderId) -> Result<bool> {
        Ok(self.orders.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl PayoutStore for InMemoryStore {
    async fn insert_payout(&self, payout: &Payout) -> Result<Version> {
        let mut payouts = self.payouts.write().await;
        let duplicate = payouts.values().any(|p| {
            p.value.order_id() == payout.order_id() && p.value.seller_id() == payout.seller_id()
        });
        if duplicate {
            return Err(StoreError::DuplicatePayout {
                order_id: payout.order_id(),
                seller_id: payout.seller_id(),
            });
        }
        payouts.insert(payout.id(), Versioned::new(payout.clone(), Version::first()));
        Ok(Version::first())
    }

    async fn get_payout(&self, id: PayoutId) -> Result<Option<Versioned<Payout>>> {
        Ok(self.payouts.read().await.get(&id).cloned())
    }

    async fn update_payout(&self, payout: &Payout, expected: Version) -> Result<Version> {
        if self.payout_update_fails() {
            return Err(StoreError::Unavailable(format!(
                "payout update for {} rejected",
                payout.id()
            )));
        }

        let mut payouts = self.payouts.write().await;
        let current = payouts.get(&payout.id()).map(|p| p.version);
        check_version("payout", payout.id(), current, expected)?;

        let next = expected.next();
        payouts.insert(payout.id(), Versioned::new(payout.clone(), next));
        Ok(next)
    }

    async fn payouts_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Payout>>> {
        let payouts = self.payouts.read().await;
        let mut found: Vec<_> = payouts
            .values()
            .filter(|p| p.value.order_id() == order_id)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.value.created_at());
        Ok(found)
    }

    async fn due_payouts(&self, limit: usize) -> Result<Vec<Versioned<Payout>>> {
        let payouts = self.payouts.read().await;
        let mut due: Vec<_> = payouts
            .values()
            .filter(|p| p.value.status().can_process())
            .cloned()
            .collect();
        due.sort_by_key(|p| p.value.updated_at());
        due.truncate(limit);
        Ok(due)
    }

    async fn stale_processing_payouts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Versioned<Payout>>> {
        let payouts = self.payouts.read().await;
        let mut stale: Vec<_> = payouts
            .values()
            .filter(|p| {
                p.value.status() == PayoutStatus::Processing && p.value.updated_at() <= cutoff
            })
            .cloned()
            .collect();
        stale.sort_by_key(|p| p.value.updated_at());
        stale.truncate(limit);
        Ok(stale)
    }
}

#[async_trait]
impl RefundStore for InMemoryStore {
    async fn insert_refund(&self, refund: &Refund) -> Result<Version> {
        let mut refunds = self.refunds.write().await;
        let open = refunds
            .values()
            .any(|r| r.value.order_id() == refund.order_id() && r.value.status().is_open());
        if open {
            return Err(StoreError::RefundAlreadyPending(refund.order_id()));
        }
        refunds.insert(refund.id(), Versioned::new(refund.clone(), Version::first()));
        Ok(Version::first())
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<Versioned<Refund>>> {
        Ok(self.refunds.read().await.get(&id).cloned())
    }

    async fn update_refund(&self, refund: &Refund, expected: Version) -> Result<Version> {
        let mut refunds = self.refunds.write().await;
        let current = refunds.get(&refund.id()).map(|r| r.version);
        check_version("refund", refund.id(), current, expected)?;

        let next = expected.next();
        refunds.insert(refund.id(), Versioned::new(refund.clone(), next));
        Ok(next)
    }

    async fn refunds_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Refund>>> {
        let refunds = self.refunds.read().await;
        let mut found: Vec<_> = refunds
            .values()
            .filter(|r| r.value.order_id() == order_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.value.created_at());
        Ok(found)
    }
}

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn credit(&self, credit: WalletCredit) -> Result<()> {
        self.wallet.write().await.push(credit);
        Ok(())
    }

    async fn credits_for_buyer(&self, buyer_id: BuyerId) -> Result<Vec<WalletCredit>> {
        Ok(self
            .wallet
            .read()
            .await
            .iter()
            .filter(|c| c.buyer_id == buyer_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SellerAccountStore for InMemoryStore {
    async fn payout_destination(&self, seller_id: SellerId) -> Result<Option<String>> {
        Ok(self.payout_destinations.read().await.get(&seller_id).cloned())
    }
}
