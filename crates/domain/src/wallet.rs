//! Buyer wallet credits.

use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId};
use serde::{Deserialize, Serialize};

use crate::order::Money;

/// An entry appended to a buyer's wallet ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCredit {
    pub buyer_id: BuyerId,
    pub order_id: OrderId,
    pub amount: Money,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl WalletCredit {
    pub fn new(
        buyer_id: BuyerId,
        order_id: OrderId,
        amount: Money,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            buyer_id,
            order_id,
            amount,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}
