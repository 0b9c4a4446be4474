//! Buyer refund requests.

use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, RefundId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::{Money, Order, OrderStatus};

/// The status of a refund request.
///
/// `Pending` and `UnderReview` are open; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[default]
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Failed,
}

impl RefundStatus {
    /// Returns true while the request still awaits a decision.
    pub fn is_open(&self) -> bool {
        matches!(self, RefundStatus::Pending | RefundStatus::UnderReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::UnderReview => "under_review",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RefundStatus::Pending),
            "under_review" => Ok(RefundStatus::UnderReview),
            "approved" => Ok(RefundStatus::Approved),
            "rejected" => Ok(RefundStatus::Rejected),
            "failed" => Ok(RefundStatus::Failed),
            other => Err(format!("unknown refund status: {other}")),
        }
    }
}

/// Errors from refund creation and review.
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("Buyer did not place this order")]
    NotOrderBuyer,

    #[error("Order in {0} status cannot be refunded")]
    OrderNotRefundable(OrderStatus),

    #[error("Invalid refund amount {amount} (must be positive and at most {max})")]
    InvalidAmount { amount: Money, max: Money },

    #[error("A refund reason is required")]
    ReasonRequired,

    #[error("Order has already been refunded in full")]
    FullyRefunded,

    #[error("Invalid refund transition: cannot {action} from {from} status")]
    InvalidTransition {
        from: RefundStatus,
        action: &'static str,
    },
}

/// A buyer's money-back request against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    id: RefundId,
    order_id: OrderId,
    buyer_id: BuyerId,
    amount: Money,
    currency: String,
    reason: String,
    evidence: Vec<String>,
    status: RefundStatus,
    provider_refund_id: Option<String>,
    last_error: Option<String>,
    reviewed_by: Option<String>,
    review_note: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

/// Sums the refunds the provider has paid out.
pub fn refunded_total<'a>(refunds: impl IntoIterator<Item = &'a Refund>) -> Money {
    refunds
        .into_iter()
        .filter(|refund| refund.status == RefundStatus::Approved)
        .map(Refund::amount)
        .sum()
}

impl Refund {
    /// Opens a refund request against a delivered or completed order.
    ///
    /// `refunded` is what earlier approved refunds already paid back. The
    /// request may cover at most the rest of the order total, and `amount`
    /// defaults to all of it.
    pub fn request(
        order: &Order,
        refunded: Money,
        buyer_id: BuyerId,
        amount: Option<Money>,
        reason: impl Into<String>,
        evidence: Vec<String>,
    ) -> Result<Self, RefundError> {
        if order.buyer_id() != buyer_id {
            return Err(RefundError::NotOrderBuyer);
        }
        if !matches!(
            order.status(),
            OrderStatus::Delivered | OrderStatus::Completed
        ) {
            return Err(RefundError::OrderNotRefundable(order.status()));
        }

        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(RefundError::ReasonRequired);
        }

        let remaining = order.total() - refunded;
        if !remaining.is_positive() {
            return Err(RefundError::FullyRefunded);
        }
        let amount = amount.unwrap_or(remaining);
        if !amount.is_positive() || amount > remaining {
            return Err(RefundError::InvalidAmount {
                amount,
                max: remaining,
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: RefundId::new(),
            order_id: order.id(),
            buyer_id,
            amount,
            currency: order.currency().to_string(),
            reason,
            evidence,
            status: RefundStatus::Pending,
            provider_refund_id: None,
            last_error: None,
            reviewed_by: None,
            review_note: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        })
    }
}

// Query methods
impl Refund {
    pub fn id(&self) -> RefundId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn buyer_id(&self) -> BuyerId {
        self.buyer_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    pub fn status(&self) -> RefundStatus {
        self.status
    }

    pub fn provider_refund_id(&self) -> Option<&str> {
        self.provider_refund_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn reviewed_by(&self) -> Option<&str> {
        self.reviewed_by.as_deref()
    }

    pub fn review_note(&self) -> Option<&str> {
        self.review_note.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }
}

// Transition methods
impl Refund {
    /// Admin picks up the request.
    pub fn start_review(&mut self, admin: impl Into<String>) -> Result<(), RefundError> {
        self.require(self.status == RefundStatus::Pending, "start review")?;
        self.status = RefundStatus::UnderReview;
        self.reviewed_by = Some(admin.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Checks that the request can still be approved.
    pub fn ensure_approvable(&self) -> Result<(), RefundError> {
        self.require(self.status.is_open(), "approve")
    }

    /// Checks that the amount still fits in what is left to refund.
    pub fn ensure_within(&self, remaining: Money) -> Result<(), RefundError> {
        if !remaining.is_positive() {
            return Err(RefundError::FullyRefunded);
        }
        if self.amount > remaining {
            return Err(RefundError::InvalidAmount {
                amount: self.amount,
                max: remaining,
            });
        }
        Ok(())
    }

    /// Records the provider refund after approval.
    pub fn approve(
        &mut self,
        provider_refund_id: impl Into<String>,
        admin: impl Into<String>,
    ) -> Result<(), RefundError> {
        self.ensure_approvable()?;
        self.resolve(RefundStatus::Approved, admin.into());
        self.provider_refund_id = Some(provider_refund_id.into());
        Ok(())
    }

    /// Records a provider failure during approval.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        admin: impl Into<String>,
    ) -> Result<(), RefundError> {
        self.ensure_approvable()?;
        self.resolve(RefundStatus::Failed, admin.into());
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Admin declines the request.
    pub fn reject(
        &mut self,
        admin: impl Into<String>,
        note: Option<String>,
    ) -> Result<(), RefundError> {
        self.require(self.status.is_open(), "reject")?;
        self.resolve(RefundStatus::Rejected, admin.into());
        self.review_note = note;
        Ok(())
    }

    fn resolve(&mut self, status: RefundStatus, admin: String) {
        let now = Utc::now();
        self.status = status;
        self.reviewed_by = Some(admin);
        self.resolved_at = Some(now);
        self.updated_at = now;
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), RefundError> {
        if allowed {
            Ok(())
        } else {
            Err(RefundError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }
}
