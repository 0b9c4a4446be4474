//! Seller payout aggregate and its state machine.

use chrono::{DateTime, Utc};
use common::{OrderId, PayoutId, SellerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{CommissionError, CommissionPolicy};
use crate::order::Money;

/// The status of a payout.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──┬──► Paid
///    ▲            │  ▲     ├──► Failed ──(requeue)──► Pending
///    └────────────┘  │     └──► Retrying
///   (precondition)   └────────────┘
/// ```
///
/// A `Processing` claim whose lease expired moves to `Retrying` (or
/// `Failed` once retries are spent) as if the attempt failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Created, waiting to be processed.
    #[default]
    Pending,
    /// A processor owns the payout and is talking to the provider.
    Processing,
    /// Last transfer attempt failed transiently; eligible for another run.
    Retrying,
    /// Transfer succeeded (terminal state).
    Paid,
    /// Transfer failed permanently or retries were exhausted (terminal state).
    Failed,
}

impl PayoutStatus {
    /// Returns true if a processor may pick up the payout.
    pub fn can_process(&self) -> bool {
        matches!(self, PayoutStatus::Pending | PayoutStatus::Retrying)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Paid | PayoutStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Processing => "processing",
            PayoutStatus::Retrying => "retrying",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "processing" => Ok(PayoutStatus::Processing),
            "retrying" => Ok(PayoutStatus::Retrying),
            "paid" => Ok(PayoutStatus::Paid),
            "failed" => Ok(PayoutStatus::Failed),
            other => Err(format!("unknown payout status: {other}")),
        }
    }
}

/// Errors from payout transitions.
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("Invalid payout transition: cannot {action} from {from} status")]
    InvalidTransition {
        from: PayoutStatus,
        action: &'static str,
    },

    #[error("Commission error: {0}")]
    Commission(#[from] CommissionError),
}

/// Money owed to one seller for a completed order, net of commission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    id: PayoutId,
    order_id: OrderId,
    seller_id: SellerId,
    gross_amount: Money,
    commission: Money,
    net_amount: Money,
    currency: String,
    commission_policy: CommissionPolicy,
    status: PayoutStatus,
    provider_transfer_id: Option<String>,
    last_error: Option<String>,
    last_error_at: Option<DateTime<Utc>>,
    retry_count: u32,
    processed_by: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Payout {
    /// Creates a pending payout, splitting `gross` under `policy`.
    ///
    /// The policy is copied onto the payout; the amounts are never
    /// recomputed afterwards.
    pub fn create(
        order_id: OrderId,
        seller_id: SellerId,
        gross: Money,
        currency: impl Into<String>,
        policy: &CommissionPolicy,
    ) -> Result<Self, PayoutError> {
        let breakdown = policy.calculate(gross)?;
        let now = Utc::now();

        Ok(Self {
            id: PayoutId::new(),
            order_id,
            seller_id,
            gross_amount: breakdown.gross_amount,
            commission: breakdown.commission,
            net_amount: breakdown.net_amount,
            currency: currency.into(),
            commission_policy: *policy,
            status: PayoutStatus::Pending,
            provider_transfer_id: None,
            last_error: None,
            last_error_at: None,
            retry_count: 0,
            processed_by: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        })
    }
}

// Query methods
impl Payout {
    pub fn id(&self) -> PayoutId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn seller_id(&self) -> SellerId {
        self.seller_id
    }

    pub fn gross_amount(&self) -> Money {
        self.gross_amount
    }

    pub fn commission(&self) -> Money {
        self.commission
    }

    pub fn net_amount(&self) -> Money {
        self.net_amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn commission_policy(&self) -> &CommissionPolicy {
        &self.commission_policy
    }

    pub fn status(&self) -> PayoutStatus {
        self.status
    }

    pub fn provider_transfer_id(&self) -> Option<&str> {
        self.provider_transfer_id.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_error_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn processed_by(&self) -> Option<&str> {
        self.processed_by.as_deref()
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// Transition methods
impl Payout {
    /// Claims the payout for processing.
    ///
    /// Picking up a `Retrying` payout counts as another attempt.
    pub fn begin_processing(&mut self) -> Result<(), PayoutError> {
        self.require(self.status.can_process(), "begin processing")?;
        if self.status == PayoutStatus::Retrying {
            self.retry_count += 1;
        }
        self.status = PayoutStatus::Processing;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Hands the payout back to `Pending` after a failed precondition.
    pub fn return_to_pending(&mut self, error: impl Into<String>) -> Result<(), PayoutError> {
        self.require(self.status == PayoutStatus::Processing, "return to pending")?;
        self.record_error(error.into());
        self.status = PayoutStatus::Pending;
        Ok(())
    }

    /// Records a successful provider transfer.
    pub fn mark_paid(
        &mut self,
        provider_transfer_id: Option<String>,
        processed_by: impl Into<String>,
    ) -> Result<(), PayoutError> {
        self.require(self.status == PayoutStatus::Processing, "mark paid")?;
        let now = Utc::now();
        self.status = PayoutStatus::Paid;
        self.provider_transfer_id = provider_transfer_id;
        self.processed_by = Some(processed_by.into());
        self.paid_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Records a failed transfer attempt and returns the resulting status.
    ///
    /// Permanent failures are terminal. Transient failures move the payout to
    /// `Retrying` until `retry_count` reaches `max_retries`, after which the
    /// payout is escalated to `Failed`.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        transient: bool,
        max_retries: u32,
        processed_by: impl Into<String>,
    ) -> Result<PayoutStatus, PayoutError> {
        self.require(self.status == PayoutStatus::Processing, "record failure")?;
        self.record_error(error.into());
        self.processed_by = Some(processed_by.into());
        self.status = if transient && self.retry_count < max_retries {
            PayoutStatus::Retrying
        } else {
            PayoutStatus::Failed
        };
        Ok(self.status)
    }

    /// Releases a `Processing` claim nobody finished within its lease.
    ///
    /// Counts as a transient failure of the abandoned attempt.
    pub fn release_stale_claim(
        &mut self,
        error: impl Into<String>,
        max_retries: u32,
    ) -> Result<PayoutStatus, PayoutError> {
        self.require(self.status == PayoutStatus::Processing, "release stale claim")?;
        self.record_error(error.into());
        self.status = if self.retry_count < max_retries {
            PayoutStatus::Retrying
        } else {
            PayoutStatus::Failed
        };
        Ok(self.status)
    }

    /// Returns true if the payout has sat in `Processing` since `cutoff`.
    pub fn is_claim_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == PayoutStatus::Processing && self.updated_at <= cutoff
    }

    /// Operator action resurrecting a failed payout.
    pub fn requeue(&mut self) -> Result<(), PayoutError> {
        self.require(self.status == PayoutStatus::Failed, "requeue")?;
        self.status = PayoutStatus::Pending;
        self.retry_count = 0;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn record_error(&mut self, error: String) {
        let now = Utc::now();
        self.last_error = Some(error);
        self.last_error_at = Some(now);
        self.updated_at = now;
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), PayoutError> {
        if allowed {
            Ok(())
        } else {
            Err(PayoutError::InvalidTransition {
                from: self.status,
                action,
            })
        }
    }
}
