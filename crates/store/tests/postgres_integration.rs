//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency and truncate
//! every table before each test, so they run serially.
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use common::{BuyerId, OrderId, SellerId};
use domain::{
    CartItem, CommissionPolicy, LineItem, Money, NewOrder, Order, OrderSource, Payout, Product,
    ProductId, Refund, ShippingAddress, WalletCredit,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CartStore, CatalogStore, OrderStore, PayoutStore, PostgresStore, RefundStore,
    SellerAccountStore, StoreError, Version, WalletStore,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE products, stock_releases, cart_items, orders, payouts, refunds, \
         wallet_credits, seller_accounts",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Ada Buyer".to_string(),
        line1: "1 Main St".to_string(),
        city: "Springfield".to_string(),
        postal_code: "12345".to_string(),
        country: "US".to_string(),
        ..Default::default()
    }
}

fn new_order(seller_id: SellerId) -> Order {
    Order::place(NewOrder {
        buyer_id: BuyerId::new(),
        items: vec![LineItem::new(
            "SKU-001",
            seller_id,
            "Widget",
            2,
            Money::from_cents(1500),
        )],
        shipping: Money::from_cents(500),
        currency: "usd".to_string(),
        shipping_address: address(),
        source: OrderSource::Product,
    })
    .unwrap()
}

fn delivered_order(seller_id: SellerId) -> Order {
    let mut order = new_order(seller_id);
    order.attach_payment_intent("pi_1", "secret").unwrap();
    order.mark_paid("pi_1").unwrap();
    order.confirm(seller_id).unwrap();
    order.ship(seller_id, None).unwrap();
    order.mark_delivered(seller_id).unwrap();
    order
}

#[tokio::test]
#[serial]
async fn test_conditional_decrement_and_keyed_release() {
    let store = get_test_store().await;
    let product = Product::new("SKU-001", SellerId::new(), "Widget", Money::from_cents(100), 2);
    store.upsert_product(&product).await.unwrap();

    let id = ProductId::new("SKU-001");
    assert!(store.decrement_stock_if_available(&id, 2).await.unwrap());
    assert!(!store.decrement_stock_if_available(&id, 1).await.unwrap());

    assert!(store.release_stock("order-1:SKU-001", &id, 3).await.unwrap());
    assert!(!store.release_stock("order-1:SKU-001", &id, 3).await.unwrap());
    let stored = store.get_product(&id).await.unwrap().unwrap();
    assert_eq!(stored.stock, 3);
    assert_eq!(stored.price, Money::from_cents(100));

    assert!(matches!(
        store.release_stock("order-1:missing", &ProductId::new("missing"), 1).await,
        Err(StoreError::NotFound { .. })
    ));
    // The failed release rolled back its key.
    assert!(matches!(
        store.release_stock("order-1:missing", &ProductId::new("missing"), 1).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_concurrent_decrements_never_oversell() {
    let store = get_test_store().await;
    let product = Product::new("SKU-HOT", SellerId::new(), "Hot item", Money::from_cents(100), 3);
    store.upsert_product(&product).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .decrement_stock_if_available(&ProductId::new("SKU-HOT"), 1)
                .await
                .unwrap()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }

    assert_eq!(successes, 3);
    let stored = store
        .get_product(&ProductId::new("SKU-HOT"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.stock, 0);
}

#[tokio::test]
#[serial]
async fn test_cart_keeps_insertion_order() {
    let store = get_test_store().await;
    let buyer_id = BuyerId::new();
    let items = vec![CartItem::new("SKU-B", 1), CartItem::new("SKU-A", 2)];
    store.set_cart(buyer_id, &items).await.unwrap();

    assert_eq!(store.get_cart(buyer_id).await.unwrap(), items);

    store.clear_cart(buyer_id).await.unwrap();
    assert!(store.get_cart(buyer_id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_order_document_roundtrip_and_compare_and_set() {
    let store = get_test_store().await;
    let seller_id = SellerId::new();
    let mut order = new_order(seller_id);

    let v1 = store.insert_order(&order).await.unwrap();
    let loaded = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::first());
    assert_eq!(loaded.value, order);

    order.attach_payment_intent("pi_1", "secret").unwrap();
    let v2 = store.update_order(&order, v1).await.unwrap();
    assert_eq!(v2, Version::new(2));

    let stale = store.update_order(&order, v1).await;
    assert!(matches!(
        stale,
        Err(StoreError::ConcurrencyConflict { expected, actual, .. })
            if expected == v1 && actual == v2
    ));

    let loaded = store.get_order(order.id()).await.unwrap().unwrap();
    assert_eq!(loaded.value.payment_intent_id(), Some("pi_1"));

    assert!(store.delete_order(order.id()).await.unwrap());
    assert!(store.get_order(order.id()).await.unwrap().is_none());
    assert!(matches!(
        store.update_order(&order, v2).await,
        Err(StoreError::NotFound { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_payout_unique_constraint() {
    let store = get_test_store().await;
    let order_id = OrderId::new();
    let seller_id = SellerId::new();
    let policy = CommissionPolicy::from_percent(10.0).unwrap();

    let first =
        Payout::create(order_id, seller_id, Money::from_units(1000), "usd", &policy).unwrap();
    store.insert_payout(&first).await.unwrap();

    let second =
        Payout::create(order_id, seller_id, Money::from_units(1000), "usd", &policy).unwrap();
    assert!(matches!(
        store.insert_payout(&second).await,
        Err(StoreError::DuplicatePayout { .. })
    ));

    let payouts = store.payouts_for_order(order_id).await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].value.net_amount(), Money::from_units(900));
}

#[tokio::test]
#[serial]
async fn test_due_payouts_exclude_terminal() {
    let store = get_test_store().await;
    let policy = CommissionPolicy::default();

    let pending = Payout::create(
        OrderId::new(),
        SellerId::new(),
        Money::from_cents(1000),
        "usd",
        &policy,
    )
    .unwrap();
    store.insert_payout(&pending).await.unwrap();

    let mut paid = Payout::create(
        OrderId::new(),
        SellerId::new(),
        Money::from_cents(1000),
        "usd",
        &policy,
    )
    .unwrap();
    let v = store.insert_payout(&paid).await.unwrap();
    paid.begin_processing().unwrap();
    paid.mark_paid(Some("tr_1".to_string()), "test").unwrap();
    store.update_payout(&paid, v).await.unwrap();

    let due = store.due_payouts(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].value.id(), pending.id());
}

#[tokio::test]
#[serial]
async fn test_stale_processing_payouts_by_cutoff() {
    let store = get_test_store().await;
    let mut claimed = Payout::create(
        OrderId::new(),
        SellerId::new(),
        Money::from_cents(1000),
        "usd",
        &CommissionPolicy::default(),
    )
    .unwrap();
    let v = store.insert_payout(&claimed).await.unwrap();
    claimed.begin_processing().unwrap();
    store.update_payout(&claimed, v).await.unwrap();

    let at_claim = claimed.updated_at();
    let stale = store.stale_processing_payouts(at_claim, 10).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].value.id(), claimed.id());

    let before_claim = at_claim - chrono::Duration::seconds(1);
    assert!(store.stale_processing_payouts(before_claim, 10).await.unwrap().is_empty());
    assert!(store.due_payouts(10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_one_open_refund_per_order() {
    let store = get_test_store().await;
    let order = delivered_order(SellerId::new());

    let mut first =
        Refund::request(&order, Money::zero(), order.buyer_id(), None, "broken", vec![]).unwrap();
    let v = store.insert_refund(&first).await.unwrap();

    let second =
        Refund::request(&order, Money::zero(), order.buyer_id(), None, "still broken", vec![])
            .unwrap();
    assert!(matches!(
        store.insert_refund(&second).await,
        Err(StoreError::RefundAlreadyPending(id)) if id == order.id()
    ));

    first.reject("admin", None).unwrap();
    store.update_refund(&first, v).await.unwrap();
    store.insert_refund(&second).await.unwrap();

    assert_eq!(store.refunds_for_order(order.id()).await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn test_wallet_and_seller_accounts() {
    let store = get_test_store().await;
    let buyer_id = BuyerId::new();
    let seller_id = SellerId::new();

    store
        .credit(WalletCredit::new(
            buyer_id,
            OrderId::new(),
            Money::from_cents(3500),
            "order cancelled",
        ))
        .await
        .unwrap();
    let credits = store.credits_for_buyer(buyer_id).await.unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, Money::from_cents(3500));

    assert!(store.payout_destination(seller_id).await.unwrap().is_none());
    store
        .set_payout_destination(seller_id, "acct_123")
        .await
        .unwrap();
    assert_eq!(
        store.payout_destination(seller_id).await.unwrap().as_deref(),
        Some("acct_123")
    );
}
