//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{Actor, Cancellation, NewOrder, Order, OrderSource};
pub use state::OrderStatus;
pub use value_objects::{LineItem, Money, ProductId, ShippingAddress};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity on a line item.
    #[error("Invalid quantity for {product_id}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_id: String, quantity: u32 },

    /// Invalid unit price on a line item.
    #[error("Invalid price for {product_id}: {price} (must not be negative)")]
    InvalidPrice { product_id: String, price: i64 },

    /// Shipping fee must not be negative.
    #[error("Invalid shipping fee: {shipping}")]
    InvalidShipping { shipping: i64 },

    /// Shipping address lacks a mandatory field.
    #[error("Shipping address is incomplete")]
    IncompleteAddress,

    /// Order is not in the status the action requires.
    #[error("Invalid transition: cannot {action} from {from} status")]
    InvalidTransition {
        from: OrderStatus,
        action: &'static str,
    },

    /// Acting seller sells none of the order's line items.
    #[error("Seller has no items on this order")]
    NotOrderSeller,

    /// Acting buyer did not place the order.
    #[error("Buyer did not place this order")]
    NotOrderBuyer,

    /// The actor's role may not perform this action.
    #[error("Actor is not allowed to {action} this order")]
    ActorNotAllowed { action: &'static str },

    /// No payment intent has been attached to the order yet.
    #[error("Order has no payment intent")]
    PaymentIntentMissing,

    /// Payment confirmation referenced a different intent.
    #[error("Payment intent mismatch: expected {expected}, got {actual}")]
    PaymentIntentMismatch { expected: String, actual: String },
}
