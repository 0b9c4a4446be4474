//! Persistence for the settlement pipeline.
//!
//! Each concern the pipeline touches sits behind its own narrow trait
//! (catalog, carts, orders, payouts, refunds, wallets, seller accounts).
//! Orders, payouts and refunds are versioned documents updated with
//! compare-and-set on the expected [`Version`].

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod version;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    CartStore, CatalogStore, OrderStore, PayoutStore, RefundStore, SellerAccountStore,
    SettlementStore, WalletStore,
};
pub use version::{Version, Versioned};
