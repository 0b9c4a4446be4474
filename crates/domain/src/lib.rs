//! Domain layer for the marketplace settlement pipeline.
//!
//! This crate holds the pure business rules, with no I/O:
//! - Order aggregate with its status machine
//! - Commission policy and the gross/commission/net split
//! - Payout aggregate with its retry state machine
//! - Refund requests and their review lifecycle
//! - Wallet credits owed to buyers after cancellation
//! - Catalog and cart views read by checkout

pub mod catalog;
pub mod ledger;
pub mod order;
pub mod payout;
pub mod refund;
pub mod wallet;

pub use catalog::{CartItem, Product};
pub use ledger::{CommissionBreakdown, CommissionError, CommissionPolicy};
pub use order::{
    Actor, Cancellation, LineItem, Money, NewOrder, Order, OrderError, OrderSource, OrderStatus,
    ProductId, ShippingAddress,
};
pub use payout::{Payout, PayoutError, PayoutStatus};
pub use refund::{Refund, RefundError, RefundStatus, refunded_total};
pub use wallet::WalletCredit;
