use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, PayoutId, RefundId, SellerId};
use domain::{CartItem, Money, Order, Payout, Product, ProductId, Refund, WalletCredit};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CartStore, CatalogStore, OrderStore, PayoutStore, RefundStore, Result, SellerAccountStore,
    StoreError, Version, Versioned, WalletStore,
};

/// PostgreSQL-backed store implementation.
///
/// Orders, payouts and refunds are stored as JSONB documents next to a
/// `version` column; updates only apply when the stored version still
/// matches the caller's.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Row metadata written alongside a JSONB document.
struct DocumentRow<'a> {
    table: &'static str,
    entity: &'static str,
    id: Uuid,
    status: &'a str,
    updated_at: DateTime<Utc>,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool of at most `max_connections` to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, seller_id, name, price_cents, stock)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                seller_id = EXCLUDED.seller_id,
                name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                stock = EXCLUDED.stock
            "#,
        )
        .bind(product.id.as_str())
        .bind(product.seller_id.as_uuid())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(i64::from(product.stock))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replaces a buyer's cart.
    pub async fn set_cart(&self, buyer_id: BuyerId, items: &[CartItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cart_items WHERE buyer_id = $1")
            .bind(buyer_id.as_uuid())
            .execute(&mut *tx)
            .await?;

        for (position, item) in items.iter().enumerate() {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::Corrupt(format!("cart quantity {}", item.quantity)))?;
            sqlx::query(
                r#"
                INSERT INTO cart_items (buyer_id, product_id, quantity, position)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(buyer_id.as_uuid())
            .bind(item.product_id.as_str())
            .bind(quantity)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Configures where a seller's payouts are transferred to.
    pub async fn set_payout_destination(
        &self,
        seller_id: SellerId,
        destination: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seller_accounts (seller_id, payout_destination)
            VALUES ($1, $2)
            ON CONFLICT (seller_id) DO UPDATE SET payout_destination = EXCLUDED.payout_destination
            "#,
        )
        .bind(seller_id.as_uuid())
        .bind(destination)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let stock: i64 = row.try_get("stock")?;
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            name: row.try_get("name")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock: u32::try_from(stock)
                .map_err(|_| StoreError::Corrupt(format!("product stock {stock}")))?,
        })
    }

    fn row_to_versioned<T: DeserializeOwned>(row: PgRow) -> Result<Versioned<T>> {
        let document: serde_json::Value = row.try_get("document")?;
        Ok(Versioned::new(
            serde_json::from_value(document)?,
            Version::new(row.try_get("version")?),
        ))
    }

    async fn fetch_document<T: DeserializeOwned>(
        &self,
        table: &'static str,
        id: Uuid,
    ) -> Result<Option<Versioned<T>>> {
        let row = sqlx::query(&format!(
            "SELECT document, version FROM {table} WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_versioned).transpose()
    }

    async fn update_document<T: Serialize>(
        &self,
        row: DocumentRow<'_>,
        document: &T,
        expected: Version,
    ) -> Result<Version> {
        let document = serde_json::to_value(document)?;
        let updated: Option<i64> = sqlx::query_scalar(&format!(
            r#"
            UPDATE {table}
            SET status = $2, document = $3, updated_at = $4, version = version + 1
            WHERE id = $1 AND version = $5
            RETURNING version
            "#,
            table = row.table
        ))
        .bind(row.id)
        .bind(row.status)
        .bind(document)
        .bind(row.updated_at)
        .bind(expected.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(version) = updated {
            return Ok(Version::new(version));
        }

        let actual: Option<i64> = sqlx::query_scalar(&format!(
            "SELECT version FROM {table} WHERE id = $1",
            table = row.table
        ))
        .bind(row.id)
        .fetch_optional(&self.pool)
        .await?;

        Err(match actual {
            Some(actual) => StoreError::ConcurrencyConflict {
                entity: row.entity,
                id: row.id.to_string(),
                expected,
                actual: Version::new(actual),
            },
            None => StoreError::NotFound {
                entity: row.entity,
                id: row.id.to_string(),
            },
        })
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

#[async_trait]
impl CatalogStore for PostgresStore {
    async fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            r#"
            SELECT id, seller_id, name, price_cents, stock
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn decrement_stock_if_available(&self, id: &ProductId, quantity: u32) -> Result<bool> {
        let result =
            sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1 AND stock >= $2")
                .bind(id.as_str())
                .bind(i64::from(quantity))
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_stock(
        &self,
        release_key: &str,
        id: &ProductId,
        quantity: u32,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let recorded = sqlx::query(
            r#"
            INSERT INTO stock_releases (release_key, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (release_key) DO NOTHING
            "#,
        )
        .bind(release_key)
        .bind(id.as_str())
        .bind(i64::from(quantity))
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            tracing::debug!(release_key, product_id = %id, "stock release already applied");
            return Ok(false);
        }

        let result = sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(i64::from(quantity))
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "product",
                id: id.to_string(),
            });
        }
        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn get_cart(&self, buyer_id: BuyerId) -> Result<Vec<CartItem>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, quantity
            FROM cart_items
            WHERE buyer_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let quantity: i32 = row.try_get("quantity")?;
                Ok(CartItem {
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    quantity: u32::try_from(quantity)
                        .map_err(|_| StoreError::Corrupt(format!("cart quantity {quantity}")))?,
                })
            })
            .collect()
    }

    async fn clear_cart(&self, buyer_id: BuyerId) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE buyer_id = $1")
            .bind(buyer_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let document = serde_json::to_value(order)?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, buyer_id, status, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.buyer_id().as_uuid())
        .bind(order.status().as_str())
        .bind(Version::first().as_i64())
        .bind(document)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if violated_constraint(&e) == Some("orders_pkey") {
                return StoreError::AlreadyExists {
                    entity: "order",
                    id: order.id().to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        Ok(Version::first())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Versioned<Order>>> {
        self.fetch_document("orders", id.as_uuid()).await
    }

    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version> {
        let row = DocumentRow {
            table: "orders",
            entity: "order",
            id: order.id().as_uuid(),
            status: order.status().as_str(),
            updated_at: order.updated_at(),
        };
        self.update_document(row, order, expected).await
    }

    async fn delete_order(&self, id: OrderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PayoutStore for PostgresStore {
    async fn insert_payout(&self, payout: &Payout) -> Result<Version> {
        let document = serde_json::to_value(payout)?;
        sqlx::query(
            r#"
            INSERT INTO payouts (id, order_id, seller_id, status, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payout.id().as_uuid())
        .bind(payout.order_id().as_uuid())
        .bind(payout.seller_id().as_uuid())
        .bind(payout.status().as_str())
        .bind(Version::first().as_i64())
        .bind(document)
        .bind(payout.created_at())
        .bind(payout.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| match violated_constraint(&e) {
            Some("unique_payout_order_seller") => StoreError::DuplicatePayout {
                order_id: payout.order_id(),
                seller_id: payout.seller_id(),
            },
            Some("payouts_pkey") => StoreError::AlreadyExists {
                entity: "payout",
                id: payout.id().to_string(),
            },
            _ => StoreError::Database(e),
        })?;

        Ok(Version::first())
    }

    async fn get_payout(&self, id: PayoutId) -> Result<Option<Versioned<Payout>>> {
        self.fetch_document("payouts", id.as_uuid()).await
    }

    async fn update_payout(&self, payout: &Payout, expected: Version) -> Result<Version> {
        let row = DocumentRow {
            table: "payouts",
            entity: "payout",
            id: payout.id().as_uuid(),
            status: payout.status().as_str(),
            updated_at: payout.updated_at(),
        };
        self.update_document(row, payout, expected).await
    }

    async fn payouts_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Payout>>> {
        let rows = sqlx::query(
            r#"
            SELECT document, version
            FROM payouts
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_versioned).collect()
    }

    async fn due_payouts(&self, limit: usize) -> Result<Vec<Versioned<Payout>>> {
        let rows = sqlx::query(
            r#"
            SELECT document, version
            FROM payouts
            WHERE status IN ('pending', 'retrying')
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_versioned).collect()
    }

    async fn stale_processing_payouts(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Versioned<Payout>>> {
        let rows = sqlx::query(
            r#"
            SELECT document, version
            FROM payouts
            WHERE status = 'processing' AND updated_at <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_versioned).collect()
    }
}

#[async_trait]
impl RefundStore for PostgresStore {
    async fn insert_refund(&self, refund: &Refund) -> Result<Version> {
        let document = serde_json::to_value(refund)?;
        sqlx::query(
            r#"
            INSERT INTO refunds (id, order_id, status, version, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(refund.id().as_uuid())
        .bind(refund.order_id().as_uuid())
        .bind(refund.status().as_str())
        .bind(Version::first().as_i64())
        .bind(document)
        .bind(refund.created_at())
        .bind(refund.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| match violated_constraint(&e) {
            Some("unique_open_refund_per_order") => {
                StoreError::RefundAlreadyPending(refund.order_id())
            }
            Some("refunds_pkey") => StoreError::AlreadyExists {
                entity: "refund",
                id: refund.id().to_string(),
            },
            _ => StoreError::Database(e),
        })?;

        Ok(Version::first())
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<Versioned<Refund>>> {
        self.fetch_document("refunds", id.as_uuid()).await
    }

    async fn update_refund(&self, refund: &Refund, expected: Version) -> Result<Version> {
        let row = DocumentRow {
            table: "refunds",
            entity: "refund",
            id: refund.id().as_uuid(),
            status: refund.status().as_str(),
            updated_at: refund.updated_at(),
        };
        self.update_document(row, refund, expected).await
    }

    async fn refunds_for_order(&self, order_id: OrderId) -> Result<Vec<Versioned<Refund>>> {
        let rows = sqlx::query(
            r#"
            SELECT document, version
            FROM refunds
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_versioned).collect()
    }
}

#[async_trait]
impl WalletStore for PostgresStore {
    async fn credit(&self, credit: WalletCredit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallet_credits (buyer_id, order_id, amount_cents, reason, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(credit.buyer_id.as_uuid())
        .bind(credit.order_id.as_uuid())
        .bind(credit.amount.cents())
        .bind(&credit.reason)
        .bind(credit.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn credits_for_buyer(&self, buyer_id: BuyerId) -> Result<Vec<WalletCredit>> {
        let rows = sqlx::query(
            r#"
            SELECT buyer_id, order_id, amount_cents, reason, created_at
            FROM wallet_credits
            WHERE buyer_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(buyer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WalletCredit {
                    buyer_id: BuyerId::from_uuid(row.try_get::<Uuid, _>("buyer_id")?),
                    order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                    amount: Money::from_cents(row.try_get("amount_cents")?),
                    reason: row.try_get("reason")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl SellerAccountStore for PostgresStore {
    async fn payout_destination(&self, seller_id: SellerId) -> Result<Option<String>> {
        let destination: Option<String> = sqlx::query_scalar(
            "SELECT payout_destination FROM seller_accounts WHERE seller_id = $1",
        )
        .bind(seller_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(destination)
    }
}
