//! Catalog and cart views consumed by checkout.
//!
//! The catalog and cart are owned by external stores; these are the only
//! fields the settlement pipeline reads.

use common::SellerId;
use serde::{Deserialize, Serialize};

use crate::order::{Money, ProductId};

/// Inventory-relevant view of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub seller_id: SellerId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl Product {
    /// Creates a new product view.
    pub fn new(
        id: impl Into<ProductId>,
        seller_id: SellerId,
        name: impl Into<String>,
        price: Money,
        stock: u32,
    ) -> Self {
        Self {
            id: id.into(),
            seller_id,
            name: name.into(),
            price,
            stock,
        }
    }

    /// Returns true if `quantity` units can currently be taken.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.stock >= quantity
    }
}

/// A line of a buyer's persisted cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(product_id: impl Into<ProductId>, quantity: u32) -> Self {
        Self {
            product_id: product_id.into(),
            quantity,
        }
    }
}
