//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, SellerId};
use serde::{Deserialize, Serialize};

use super::{LineItem, Money, OrderError, OrderStatus, ShippingAddress};

/// Where the line items of an order came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    /// A single "buy now" product.
    Product,
    /// The buyer's persisted cart, cleared once payment is initiated.
    Cart,
}

/// Who is acting on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Buyer(BuyerId),
    Seller(SellerId),
    Admin(String),
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Buyer(id) => write!(f, "buyer:{id}"),
            Actor::Seller(id) => write!(f, "seller:{id}"),
            Actor::Admin(name) => write!(f, "admin:{name}"),
        }
    }
}

/// Input for placing a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub buyer_id: BuyerId,
    pub items: Vec<LineItem>,
    pub shipping: Money,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub source: OrderSource,
}

/// Side effects owed when an order leaves the happy path.
///
/// Returned by [`Order::cancel`] and [`Order::reject`]; the caller applies
/// them against the wallet and catalog stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancellation {
    /// Amount to credit back to the buyer's wallet, if money was captured.
    pub wallet_credit: Option<Money>,
    /// Whether reserved stock goes back to the catalog.
    pub restock: bool,
}

/// Order aggregate root.
///
/// Holds the price snapshot taken at checkout and the order's lifecycle
/// status. All mutation goes through the transition methods below, which
/// reject any move not allowed by [`OrderStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    buyer_id: BuyerId,
    items: Vec<LineItem>,
    subtotal: Money,
    shipping: Money,
    total: Money,
    currency: String,
    status: OrderStatus,
    source: OrderSource,
    shipping_address: ShippingAddress,
    payment_intent_id: Option<String>,
    client_secret: Option<String>,
    tracking_number: Option<String>,
    cancellation_reason: Option<String>,
    cancelled_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Places a new order in `PendingPayment` with a fresh id.
    ///
    /// Totals are computed from the line items: `subtotal` is the sum of
    /// `unit_price * quantity` and `total == subtotal + shipping`.
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() {
            return Err(OrderError::NoItems);
        }

        for item in &new.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.to_string(),
                    price: item.unit_price.cents(),
                });
            }
        }

        if new.shipping.is_negative() {
            return Err(OrderError::InvalidShipping {
                shipping: new.shipping.cents(),
            });
        }

        if !new.shipping_address.is_complete() {
            return Err(OrderError::IncompleteAddress);
        }

        let subtotal: Money = new.items.iter().map(LineItem::total_price).sum();
        let now = Utc::now();

        Ok(Self {
            id: OrderId::new(),
            buyer_id: new.buyer_id,
            items: new.items,
            subtotal,
            shipping: new.shipping,
            total: subtotal + new.shipping,
            currency: new.currency,
            status: OrderStatus::PendingPayment,
            source: new.source,
            shipping_address: new.shipping_address,
            payment_intent_id: None,
            client_secret: None,
            tracking_number: None,
            cancellation_reason: None,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            completed_at: None,
            cancelled_at: None,
        })
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn buyer_id(&self) -> BuyerId {
        self.buyer_id
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn shipping(&self) -> Money {
        self.shipping
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn source(&self) -> OrderSource {
        self.source
    }

    pub fn shipping_address(&self) -> &ShippingAddress {
        &self.shipping_address
    }

    pub fn payment_intent_id(&self) -> Option<&str> {
        self.payment_intent_id.as_deref()
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.client_secret.as_deref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn cancelled_by(&self) -> Option<&str> {
        self.cancelled_by.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the distinct sellers on this order, in line-item order.
    pub fn seller_ids(&self) -> Vec<SellerId> {
        let mut sellers = Vec::new();
        for item in &self.items {
            if !sellers.contains(&item.seller_id) {
                sellers.push(item.seller_id);
            }
        }
        sellers
    }

    /// Returns true if at least one line item belongs to `seller_id`.
    ///
    /// Fulfillment is tracked per order, not per line, so any seller on a
    /// multi-seller order may move the whole order forward.
    pub fn is_sold_by(&self, seller_id: SellerId) -> bool {
        self.items.iter().any(|item| item.seller_id == seller_id)
    }

    /// Returns true if the order is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// Transition methods
impl Order {
    /// Records the provider payment intent created for this order.
    pub fn attach_payment_intent(
        &mut self,
        payment_intent_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<(), OrderError> {
        self.require(self.status == OrderStatus::PendingPayment, "attach payment intent")?;
        self.payment_intent_id = Some(payment_intent_id.into());
        self.client_secret = Some(client_secret.into());
        self.touch();
        Ok(())
    }

    /// Marks the order paid once the provider reports the intent succeeded.
    pub fn mark_paid(&mut self, payment_intent_id: &str) -> Result<(), OrderError> {
        self.require(self.status.can_mark_paid(), "mark paid")?;
        match self.payment_intent_id.as_deref() {
            None => return Err(OrderError::PaymentIntentMissing),
            Some(expected) if expected != payment_intent_id => {
                return Err(OrderError::PaymentIntentMismatch {
                    expected: expected.to_string(),
                    actual: payment_intent_id.to_string(),
                });
            }
            Some(_) => {}
        }

        self.status = OrderStatus::Paid;
        self.paid_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Seller accepts the order.
    pub fn confirm(&mut self, seller_id: SellerId) -> Result<(), OrderError> {
        self.require_seller(seller_id)?;
        self.require(self.status.can_seller_decide(), "confirm")?;
        self.status = OrderStatus::Confirmed;
        self.touch();
        Ok(())
    }

    /// Seller declines the order.
    pub fn reject(
        &mut self,
        seller_id: SellerId,
        reason: impl Into<String>,
    ) -> Result<Cancellation, OrderError> {
        self.require_seller(seller_id)?;
        self.require(self.status.can_seller_decide(), "reject")?;
        let effects = self.cancellation_effects();

        let now = Utc::now();
        self.status = OrderStatus::Rejected;
        self.cancellation_reason = Some(reason.into());
        self.cancelled_by = Some(Actor::Seller(seller_id).to_string());
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(effects)
    }

    /// Seller hands the order to the carrier.
    pub fn ship(
        &mut self,
        seller_id: SellerId,
        tracking_number: Option<String>,
    ) -> Result<(), OrderError> {
        self.require_seller(seller_id)?;
        self.require(self.status.can_ship(), "ship")?;
        let now = Utc::now();
        self.status = OrderStatus::Shipped;
        self.tracking_number = tracking_number;
        self.shipped_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Seller records that the carrier delivered the order.
    pub fn mark_delivered(&mut self, seller_id: SellerId) -> Result<(), OrderError> {
        self.require_seller(seller_id)?;
        self.require(self.status.can_deliver(), "mark delivered")?;
        let now = Utc::now();
        self.status = OrderStatus::Delivered;
        self.delivered_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Buyer confirms receipt, completing the order.
    pub fn confirm_receipt(&mut self, buyer_id: BuyerId) -> Result<(), OrderError> {
        if buyer_id != self.buyer_id {
            return Err(OrderError::NotOrderBuyer);
        }
        self.require(self.status.can_complete(), "confirm receipt")?;
        let now = Utc::now();
        self.status = OrderStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Cancels the order from any pre-terminal status.
    ///
    /// Only admins and the order's seller may cancel.
    pub fn cancel(
        &mut self,
        actor: &Actor,
        reason: impl Into<String>,
    ) -> Result<Cancellation, OrderError> {
        match actor {
            Actor::Admin(_) => {}
            Actor::Seller(seller_id) => self.require_seller(*seller_id)?,
            Actor::Buyer(_) => return Err(OrderError::ActorNotAllowed { action: "cancel" }),
        }
        self.require(self.status.can_cancel(), "cancel")?;
        let effects = self.cancellation_effects();

        let now = Utc::now();
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason.into());
        self.cancelled_by = Some(actor.to_string());
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(effects)
    }

    fn cancellation_effects(&self) -> Cancellation {
        Cancellation {
            wallet_credit: self.status.is_payment_captured().then_some(self.total),
            restock: self.status.is_before_shipment(),
        }
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }

    fn require_seller(&self, seller_id: SellerId) -> Result<(), OrderError> {
        if self.is_sold_by(seller_id) {
            Ok(())
        } else {
            Err(OrderError::NotOrderSeller)
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::ProductId;

    fn address() -> ShippingAddress {
        ShippingAddress {
            recipient: "Ada Buyer".to_string(),
            line1: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            country: "US".to_string(),
            ..Default::default()
        }
    }

    fn new_order(seller_id: SellerId) -> NewOrder {
        NewOrder {
            buyer_id: BuyerId::new(),
            items: vec![
                LineItem::new("SKU-001", seller_id, "Widget", 2, Money::from_cents(1000)),
                LineItem::new("SKU-002", seller_id, "Gadget", 1, Money::from_cents(2500)),
            ],
            shipping: Money::from_cents(500),
            currency: "usd".to_string(),
            shipping_address: address(),
            source: OrderSource::Cart,
        }
    }

    fn paid_order(seller_id: SellerId) -> Order {
        let mut order = Order::place(new_order(seller_id)).unwrap();
        order.attach_payment_intent("pi_1", "secret_1").unwrap();
        order.mark_paid("pi_1").unwrap();
        order
    }

    #[test]
    fn test_place_computes_totals() {
        let order = Order::place(new_order(SellerId::new())).unwrap();

        assert_eq!(order.status(), OrderStatus::PendingPayment);
        assert_eq!(order.subtotal(), Money::from_cents(4500));
        assert_eq!(order.shipping(), Money::from_cents(500));
        assert_eq!(order.total(), order.subtotal() + order.shipping());
        assert!(order.payment_intent_id().is_none());
    }

    #[test]
    fn test_place_rejects_empty_and_zero_quantity() {
        let mut input = new_order(SellerId::new());
        input.items.clear();
        assert!(matches!(Order::place(input), Err(OrderError::NoItems)));

        let mut input = new_order(SellerId::new());
        input.items[0].quantity = 0;
        assert!(matches!(
            Order::place(input),
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn test_place_rejects_incomplete_address() {
        let mut input = new_order(SellerId::new());
        input.shipping_address.country.clear();
        assert!(matches!(
            Order::place(input),
            Err(OrderError::IncompleteAddress)
        ));
    }

    #[test]
    fn test_mark_paid_requires_matching_intent() {
        let mut order = Order::place(new_order(SellerId::new())).unwrap();
        assert!(matches!(
            order.mark_paid("pi_1"),
            Err(OrderError::PaymentIntentMissing)
        ));

        order.attach_payment_intent("pi_1", "secret").unwrap();
        assert!(matches!(
            order.mark_paid("pi_other"),
            Err(OrderError::PaymentIntentMismatch { .. })
        ));

        order.mark_paid("pi_1").unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
        assert!(order.paid_at().is_some());
    }

    #[test]
    fn test_full_lifecycle() {
        let seller_id = SellerId::new();
        let mut order = paid_order(seller_id);
        let buyer_id = order.buyer_id();

        order.confirm(seller_id).unwrap();
        order.ship(seller_id, Some("TRACK-1".to_string())).unwrap();
        order.mark_delivered(seller_id).unwrap();
        order.confirm_receipt(buyer_id).unwrap();

        assert_eq!(order.status(), OrderStatus::Completed);
        assert_eq!(order.tracking_number(), Some("TRACK-1"));
        assert!(order.completed_at().is_some());
    }

    #[test]
    fn test_skipping_stages_is_rejected_and_status_unchanged() {
        let seller_id = SellerId::new();
        let mut order = paid_order(seller_id);

        let err = order.ship(seller_id, None).unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Paid,
                action: "ship"
            }
        ));
        assert_eq!(order.status(), OrderStatus::Paid);

        assert!(order.confirm_receipt(order.buyer_id()).is_err());
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn test_double_confirm_fails() {
        let seller_id = SellerId::new();
        let mut order = paid_order(seller_id);
        order.confirm(seller_id).unwrap();

        assert!(matches!(
            order.confirm(seller_id),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Confirmed,
                ..
            })
        ));
    }

    #[test]
    fn test_seller_can_decide_on_pending_payment() {
        let seller_id = SellerId::new();
        let mut order = Order::place(new_order(seller_id)).unwrap();
        let effects = order.reject(seller_id, "out of stock").unwrap();

        assert_eq!(order.status(), OrderStatus::Rejected);
        assert_eq!(effects.wallet_credit, None);
        assert!(effects.restock);
    }

    #[test]
    fn test_other_seller_cannot_transition() {
        let mut order = paid_order(SellerId::new());
        assert!(matches!(
            order.confirm(SellerId::new()),
            Err(OrderError::NotOrderSeller)
        ));
        assert!(matches!(
            order.confirm_receipt(BuyerId::new()),
            Err(OrderError::NotOrderBuyer)
        ));
    }

    #[test]
    fn test_cancel_paid_order_credits_wallet_and_restocks() {
        let mut order = paid_order(SellerId::new());
        let effects = order
            .cancel(&Actor::Admin("ops".to_string()), "fraud check")
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(effects.wallet_credit, Some(order.total()));
        assert!(effects.restock);
        assert_eq!(order.cancelled_by(), Some("admin:ops"));
        assert_eq!(order.cancellation_reason(), Some("fraud check"));
    }

    #[test]
    fn test_cancel_shipped_order_does_not_restock() {
        let seller_id = SellerId::new();
        let mut order = paid_order(seller_id);
        order.confirm(seller_id).unwrap();
        order.ship(seller_id, None).unwrap();

        let effects = order
            .cancel(&Actor::Seller(seller_id), "lost in transit")
            .unwrap();
        assert_eq!(effects.wallet_credit, Some(order.total()));
        assert!(!effects.restock);
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut order = paid_order(SellerId::new());
        let admin = Actor::Admin("ops".to_string());
        order.cancel(&admin, "first").unwrap();

        assert!(matches!(
            order.cancel(&admin, "second"),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_buyer_cannot_cancel() {
        let mut order = paid_order(SellerId::new());
        let buyer = Actor::Buyer(order.buyer_id());
        assert!(matches!(
            order.cancel(&buyer, "changed mind"),
            Err(OrderError::ActorNotAllowed { .. })
        ));
        assert_eq!(order.status(), OrderStatus::Paid);
    }

    #[test]
    fn test_seller_ids_are_distinct_in_line_order() {
        let first = SellerId::new();
        let second = SellerId::new();
        let mut input = new_order(first);
        input.items.push(LineItem::new(
            ProductId::new("SKU-003"),
            second,
            "Doohickey",
            1,
            Money::from_cents(100),
        ));
        let order = Order::place(input).unwrap();

        assert_eq!(order.seller_ids(), vec![first, second]);
        assert!(order.is_sold_by(first));
        assert!(order.is_sold_by(second));
        assert!(!order.is_sold_by(SellerId::new()));
    }

    #[test]
    fn test_co_sellers_share_one_fulfillment() {
        let first = SellerId::new();
        let second = SellerId::new();
        let mut input = new_order(first);
        input.items.push(LineItem::new("SKU-003", second, "Doohickey", 1, Money::from_cents(100)));
        let mut order = Order::place(input).unwrap();
        let buyer_id = order.buyer_id();
        order.attach_payment_intent("pi_1", "secret_1").unwrap();
        order.mark_paid("pi_1").unwrap();

        order.confirm(second).unwrap();
        assert!(matches!(
            order.confirm(first),
            Err(OrderError::InvalidTransition {
                from: OrderStatus::Confirmed,
                ..
            })
        ));
        order.ship(first, Some("TRACK-1".to_string())).unwrap();
        order.mark_delivered(second).unwrap();
        order.confirm_receipt(buyer_id).unwrap();

        assert_eq!(order.status(), OrderStatus::Completed);
        assert!(matches!(
            Order::place(new_order(first)).unwrap().confirm(second),
            Err(OrderError::NotOrderSeller)
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let order = paid_order(SellerId::new());
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "paid");
        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
