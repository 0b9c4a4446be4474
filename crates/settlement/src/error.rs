//! Settlement error types.

use common::{OrderId, PayoutId, RefundId, SellerId};
use domain::{
    CommissionError, OrderError, OrderStatus, PayoutError, ProductId, RefundError,
};
use store::StoreError;
use thiserror::Error;

use crate::services::GatewayError;
use crate::state::SagaState;

/// Errors that can occur in the settlement pipeline.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// Checkout from a cart that has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A requested product does not exist in the catalog.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// A requested quantity is zero.
    #[error("Invalid quantity for {product_id}: {quantity}")]
    InvalidQuantity { product_id: ProductId, quantity: u32 },

    /// Not enough stock to cover the request.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: u32,
        requested: u32,
    },

    /// Stock could not be given back after exhausting the retry budget.
    #[error("Compensation failed for {product_id} (quantity {quantity}): {reason}")]
    CompensationFailed {
        product_id: ProductId,
        quantity: u32,
        reason: String,
    },

    /// The gateway refused or timed out creating the payment intent.
    #[error("Payment intent failed: {details}")]
    PaymentIntentFailed { details: String, transient: bool },

    /// The provider has not captured the order's payment yet.
    #[error("Payment not succeeded: intent is {status}")]
    PaymentNotSucceeded { status: String },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Payout not found: {0}")]
    PayoutNotFound(PayoutId),

    #[error("Refund not found: {0}")]
    RefundNotFound(RefundId),

    /// Payouts are only created for completed orders.
    #[error("Order is {0}, payouts require a completed order")]
    OrderNotCompleted(OrderStatus),

    /// The seller has no provider account to transfer to.
    #[error("MissingPayoutAccount: seller {seller_id} has no payout destination")]
    MissingPayoutAccount { seller_id: SellerId },

    /// The order already has a pending or under-review refund.
    #[error("Refund already pending for order {0}")]
    RefundAlreadyPending(OrderId),

    /// Saga used out of order.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidSagaState {
        expected: &'static str,
        actual: SagaState,
    },

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payout error: {0}")]
    Payout(#[from] PayoutError),

    #[error("Refund error: {0}")]
    Refund(#[from] RefundError),

    #[error("Commission error: {0}")]
    Commission(#[from] CommissionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Forbidden,
    NotFound,
    Conflict,
    ExternalProvider { transient: bool },
    Internal,
}

impl SettlementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SettlementError::EmptyCart | SettlementError::InvalidQuantity { .. } => {
                ErrorKind::Validation
            }
            SettlementError::ProductNotFound(_)
            | SettlementError::OrderNotFound(_)
            | SettlementError::PayoutNotFound(_)
            | SettlementError::RefundNotFound(_) => ErrorKind::NotFound,
            SettlementError::InsufficientStock { .. }
            | SettlementError::PaymentNotSucceeded { .. }
            | SettlementError::OrderNotCompleted(_)
            | SettlementError::MissingPayoutAccount { .. }
            | SettlementError::RefundAlreadyPending(_) => ErrorKind::Conflict,
            SettlementError::PaymentIntentFailed { transient, .. } => ErrorKind::ExternalProvider {
                transient: *transient,
            },
            SettlementError::Gateway(e) => ErrorKind::ExternalProvider {
                transient: e.is_transient(),
            },
            SettlementError::CompensationFailed { .. }
            | SettlementError::InvalidSagaState { .. }
            | SettlementError::Commission(_) => ErrorKind::Internal,
            SettlementError::Order(e) => match e {
                OrderError::NotOrderSeller
                | OrderError::NotOrderBuyer
                | OrderError::ActorNotAllowed { .. } => ErrorKind::Forbidden,
                OrderError::InvalidTransition { .. } | OrderError::PaymentIntentMissing => {
                    ErrorKind::Conflict
                }
                _ => ErrorKind::Validation,
            },
            SettlementError::Payout(e) => match e {
                PayoutError::InvalidTransition { .. } => ErrorKind::Conflict,
                PayoutError::Commission(_) => ErrorKind::Internal,
            },
            SettlementError::Refund(e) => match e {
                RefundError::NotOrderBuyer => ErrorKind::Forbidden,
                RefundError::OrderNotRefundable(_)
                | RefundError::InvalidTransition { .. }
                | RefundError::FullyRefunded => ErrorKind::Conflict,
                RefundError::InvalidAmount { .. } | RefundError::ReasonRequired => {
                    ErrorKind::Validation
                }
            },
            SettlementError::Store(e) => match e {
                StoreError::ConcurrencyConflict { .. }
                | StoreError::AlreadyExists { .. }
                | StoreError::DuplicatePayout { .. }
                | StoreError::RefundAlreadyPending(_) => ErrorKind::Conflict,
                StoreError::NotFound { .. } => ErrorKind::NotFound,
                _ => ErrorKind::Internal,
            },
        }
    }

    /// Short label used as a metrics tag.
    pub fn kind_label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ExternalProvider { .. } => "external_provider",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Convenience type alias for settlement results.
pub type Result<T> = std::result::Result<T, SettlementError>;
