use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, PayoutId, RefundId, SellerId};
use domain::{CartItem, Order, Payout, Product, ProductId, Refund, WalletCredit};

use crate::{Result, Version, Versioned};

/// Inventory-relevant view of the product catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Retrieves a product by id.
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>>;

    /// Decrements stock by `quantity` only if at least `quantity` is left.
    ///
    /// The check and the decrement happen atomically. Returns `false` when
    /// the condition did not match (insufficient stock or unknown product).
    async fn decrement_stock_if_available(&self, id: &ProductId, quantity: u32) -> Result<bool>;

    /// Adds `quantity` back to a product's stock, once per `release_key`.
    ///
    /// The key is recorded atomically with the increment. Repeating a
    /// release with a key that was already applied changes nothing and
    /// returns `false`, so a retry after an ambiguous failure is safe.
    async fn release_stock(
        &self,
        release_key: &str,
        id: &ProductId,
        quantity: u32,
    ) -> Result<bool>;
}

/// Buyer carts, owned outside the settlement pipeline.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the buyer's cart lines in the order they were added.
    async fn get_cart(&self, buyer_id: BuyerId) -> Result<Vec<CartItem>>;

    /// Empties the buyer's cart.
    async fn clear_cart(&self, buyer_id: BuyerId) -> Result<()>;
}

/// Order documents.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order at [`Version::first`].
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    /// Retrieves an order with its current version.
    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>>;

    /// Replaces an order if it is still at `expected`.
    ///
    /// Fails with `ConcurrencyConflict` otherwise. Returns the new version.
    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version>;

    /// Hard-deletes an order. Returns `false` if it did not exist.
    async fn delete_order(&self, id: OrderId) -> Result<bool>;
}

/// Seller payout documents.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Inserts a new payout.
    ///
    /// Fails with `DuplicatePayout` if one already exists for the same
    /// order and seller.
    async fn insert_payout(&self, payout: &Payout) -> Result<Version>;

    async fn get_payout(&self, id: PayoutId) -> Result<Option<Versioned<Payout>>>;

    /// Replaces a payout if it is still at `expected`.
    async fn update_payout(&self, payout: &Payout, expected: Version) -> Result<Version>;

    /// Returns an order's payouts, oldest first.
    async fn payouts_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Payout>>>;

    /// Returns up to `limit` payouts that are `pending` or `retrying`,
    /// least recently touched first.
    async fn due_payouts(&self, limit: usize) -> Result<Vec<Versioned<Payout>>>;

    /// Returns up to `limit` payouts still `processing` that were last
    /// touched at or before `cutoff`, oldest first.
    async fn stale_processing_payouts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Versioned<Payout>>>;
}

/// Refund request documents.
#[async_trait]
pub trait RefundStore: Send + Sync {
    /// Inserts a new refund.
    ///
    /// Fails with `RefundAlreadyPending` if the order already has an open
    /// refund. The check is atomic with the insert.
    async fn insert_refund(&self, refund: &Refund) -> Result<Version>;

    async fn get_refund(&self, id: RefundId) -> Result<Option<Versioned<Refund>>>;

    /// Replaces a refund if it is still at `expected`.
    async fn update_refund(&self, refund: &Refund, expected: Version) -> Result<Version>;

    /// Returns an order's refunds, oldest first.
    async fn refunds_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Refund>>>;
}

/// Buyer wallet ledger.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Appends a credit to the buyer's wallet.
    async fn credit(&self, credit: WalletCredit) -> Result<()>;

    /// Returns the buyer's credits, oldest first.
    async fn credits_for_buyer(&self, buyer_id: BuyerId) -> Result<Vec<WalletCredit>>;
}

/// Seller payout destinations, owned outside the settlement pipeline.
#[async_trait]
pub trait SellerAccountStore: Send + Sync {
    /// Returns the provider account money is transferred to, if configured.
    async fn payout_destination(&self, seller_id: SellerId) -> Result<Option<String>>;
}

/// Everything the settlement services need from persistence.
pub trait SettlementStore:
    CatalogStore
    + CartStore
    + OrderStore
    + PayoutStore
    + RefundStore
    + WalletStore
    + SellerAccountStore
    + Clone
    + 'static
{
}

impl<T> SettlementStore for T where
    T: CatalogStore
        + CartStore
        + OrderStore
        + PayoutStore
        + RefundStore
        + WalletStore
        + SellerAccountStore
        + Clone
        + 'static
{
}
