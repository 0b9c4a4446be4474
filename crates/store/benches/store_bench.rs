use common::{BuyerId, SellerId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{LineItem, Money, NewOrder, Order, OrderSource, Product, ProductId, ShippingAddress};
use store::{CatalogStore, InMemoryStore, OrderStore};

fn order() -> Order {
    Order::place(NewOrder {
        buyer_id: BuyerId::new(),
        items: vec![LineItem::new(
            "SKU-BENCH",
            SellerId::new(),
            "Benchmark Widget",
            1,
            Money::from_cents(1000),
        )],
        shipping: Money::zero(),
        currency: "usd".to_string(),
        shipping_address: ShippingAddress {
            recipient: "Bench".to_string(),
            line1: "1 Bench St".to_string(),
            city: "Benchville".to_string(),
            postal_code: "00000".to_string(),
            country: "US".to_string(),
            ..Default::default()
        },
        source: OrderSource::Product,
    })
    .unwrap()
}

fn bench_reserve_and_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryStore::new();
    let id = ProductId::new("SKU-BENCH");
    rt.block_on(store.upsert_product(Product::new(
        id.clone(),
        SellerId::new(),
        "Benchmark Widget",
        Money::from_cents(1000),
        1_000,
    )));

    let mut release = 0u64;
    c.bench_function("store/decrement_then_release", |b| {
        b.iter(|| {
            release += 1;
            let key = format!("bench-{release}:SKU-BENCH");
            rt.block_on(async {
                assert!(store.decrement_stock_if_available(&id, 1).await.unwrap());
                assert!(store.release_stock(&key, &id, 1).await.unwrap());
            });
        });
    });
}

fn bench_order_insert_update(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("store/order_insert_and_update", |b| {
        let store = InMemoryStore::new();
        b.iter(|| {
            rt.block_on(async {
                let mut order = order();
                let version = store.insert_order(&order).await.unwrap();
                order.attach_payment_intent("pi_bench", "secret").unwrap();
                store.update_order(&order, version).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_reserve_and_release, bench_order_insert_update);
criterion_main!(benches);
