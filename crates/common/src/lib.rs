//! Shared identifier types for the settlement system.

mod types;

pub use types::{BuyerId, OrderId, PayoutId, RefundId, SellerId};
