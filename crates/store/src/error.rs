use common::{OrderId, SellerId};
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored document moved on since it was read.
    #[error("Concurrency conflict for {entity} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: Version,
        actual: Version,
    },

    /// The document does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A document with the same id was already inserted.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// A payout already exists for this order and seller.
    #[error("Payout already exists for order {order_id} and seller {seller_id}")]
    DuplicatePayout {
        order_id: OrderId,
        seller_id: SellerId,
    },

    /// The order already has an open refund request.
    #[error("Order {0} already has an open refund")]
    RefundAlreadyPending(OrderId),

    /// A stored value could not be mapped back to the domain.
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    /// Injected failure from the in-memory store.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
