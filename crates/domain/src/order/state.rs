//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──► Paid ──► Confirmed ──► Shipped ──► Delivered ──► Completed
///       │              │           │            │            │
///       ├──────────────┴──► Rejected            │            │
///       └──────────────┴───────────┴────────────┴────────────┴──► Cancelled
/// ```
///
/// `Confirmed` and `Rejected` are reachable from both `PendingPayment` and
/// `Paid`. `Completed`, `Cancelled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order persisted, waiting for the buyer to pay the payment intent.
    #[default]
    PendingPayment,

    /// Payment captured by the provider.
    Paid,

    /// Seller accepted the order.
    Confirmed,

    /// Seller handed the order to the carrier.
    Shipped,

    /// Order arrived at the buyer.
    Delivered,

    /// Buyer confirmed receipt (terminal state).
    Completed,

    /// Cancelled by an admin or seller (terminal state).
    Cancelled,

    /// Declined by the seller (terminal state).
    Rejected,
}

impl OrderStatus {
    /// Returns true if the payment can be confirmed in this status.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment)
    }

    /// Returns true if the seller can accept or decline in this status.
    pub fn can_seller_decide(&self) -> bool {
        matches!(self, OrderStatus::PendingPayment | OrderStatus::Paid)
    }

    /// Returns true if the order can be shipped in this status.
    pub fn can_ship(&self) -> bool {
        matches!(self, OrderStatus::Confirmed)
    }

    /// Returns true if the order can be marked delivered in this status.
    pub fn can_deliver(&self) -> bool {
        matches!(self, OrderStatus::Shipped)
    }

    /// Returns true if the buyer can confirm receipt in this status.
    pub fn can_complete(&self) -> bool {
        matches!(self, OrderStatus::Delivered)
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if the provider has captured money for the order.
    pub fn is_payment_captured(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::Confirmed
                | OrderStatus::Shipped
                | OrderStatus::Delivered
                | OrderStatus::Completed
        )
    }

    /// Returns true if the goods are still in the seller's hands.
    pub fn is_before_shipment(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingPayment | OrderStatus::Paid | OrderStatus::Confirmed
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "paid" => Ok(OrderStatus::Paid),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 8] = [
        OrderStatus::PendingPayment,
        OrderStatus::Paid,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
    ];

    #[test]
    fn test_default_status_is_pending_payment() {
        assert_eq!(OrderStatus::default(), OrderStatus::PendingPayment);
    }

    #[test]
    fn test_seller_decision_only_before_confirmation() {
        let allowed: Vec<_> = ALL.iter().filter(|s| s.can_seller_decide()).collect();
        assert_eq!(
            allowed,
            vec![&OrderStatus::PendingPayment, &OrderStatus::Paid]
        );
    }

    #[test]
    fn test_fulfilment_is_strictly_sequential() {
        assert!(OrderStatus::Confirmed.can_ship());
        assert!(!OrderStatus::Paid.can_ship());
        assert!(OrderStatus::Shipped.can_deliver());
        assert!(!OrderStatus::Confirmed.can_deliver());
        assert!(OrderStatus::Delivered.can_complete());
        assert!(!OrderStatus::Shipped.can_complete());
    }

    #[test]
    fn test_can_cancel_from_non_terminal_states() {
        for status in ALL {
            assert_eq!(status.can_cancel(), !status.is_terminal(), "{status}");
        }
        assert!(!OrderStatus::Completed.can_cancel());
        assert!(!OrderStatus::Rejected.can_cancel());
    }

    #[test]
    fn test_payment_captured() {
        assert!(!OrderStatus::PendingPayment.is_payment_captured());
        assert!(OrderStatus::Paid.is_payment_captured());
        assert!(OrderStatus::Delivered.is_payment_captured());
        assert!(!OrderStatus::Cancelled.is_payment_captured());
    }

    #[test]
    fn test_string_roundtrip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serialization_uses_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PendingPayment).unwrap();
        assert_eq!(json, "\"pending_payment\"");
        let deserialized: OrderStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, OrderStatus::PendingPayment);
    }
}
