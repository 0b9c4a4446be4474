//! Commission calculation for seller payouts.
//!
//! A [`CommissionPolicy`] turns a gross sale amount into the platform's
//! commission and the seller's net amount. The policy is validated once at
//! construction; `calculate` is pure and deterministic. The policy in force
//! when a payout is created is snapshotted onto the payout, so changing the
//! configured percent never rewrites historical payouts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::order::Money;

/// Basis points in 100%.
const FULL_BPS: u32 = 10_000;

/// Errors from commission policy construction or calculation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommissionError {
    /// Percent must lie in `[0, 100]`.
    #[error("Invalid commission percent: {0} (must be between 0 and 100)")]
    InvalidPercent(String),

    /// A configured bound is negative.
    #[error("Invalid commission bound: {0} (must not be negative)")]
    NegativeBound(Money),

    /// Minimum commission exceeds the maximum.
    #[error("Invalid commission bounds: min {min} exceeds max {max}")]
    InvalidBounds { min: Money, max: Money },

    /// Gross amount is negative.
    #[error("Cannot calculate commission on negative amount {0}")]
    NegativeAmount(Money),
}

/// A validated commission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionPolicy {
    percent_bps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_amount: Option<Money>,
}

/// Result of a commission calculation.
///
/// `commission + net_amount == gross_amount` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionBreakdown {
    pub gross_amount: Money,
    pub commission: Money,
    pub net_amount: Money,
}

impl CommissionPolicy {
    /// Creates a policy from a percentage such as `10` or `7.5`.
    ///
    /// The percent is kept at basis-point precision.
    pub fn from_percent(percent: f64) -> Result<Self, CommissionError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(CommissionError::InvalidPercent(percent.to_string()));
        }
        Self::from_basis_points((percent * 100.0).round() as u32)
    }

    /// Creates a policy from basis points (`1000` = 10%).
    pub fn from_basis_points(bps: u32) -> Result<Self, CommissionError> {
        if bps > FULL_BPS {
            return Err(CommissionError::InvalidPercent(format!(
                "{}.{:02}",
                bps / 100,
                bps % 100
            )));
        }
        Ok(Self {
            percent_bps: bps,
            min_amount: None,
            max_amount: None,
        })
    }

    /// Adds optional lower and upper bounds on the commission.
    pub fn with_bounds(
        self,
        min_amount: Option<Money>,
        max_amount: Option<Money>,
    ) -> Result<Self, CommissionError> {
        for bound in [min_amount, max_amount].into_iter().flatten() {
            if bound.is_negative() {
                return Err(CommissionError::NegativeBound(bound));
            }
        }
        if let (Some(min), Some(max)) = (min_amount, max_amount)
            && min > max
        {
            return Err(CommissionError::InvalidBounds { min, max });
        }
        Ok(Self {
            min_amount,
            max_amount,
            ..self
        })
    }

    /// Returns the commission rate in basis points.
    pub fn percent_bps(&self) -> u32 {
        self.percent_bps
    }

    pub fn min_amount(&self) -> Option<Money> {
        self.min_amount
    }

    pub fn max_amount(&self) -> Option<Money> {
        self.max_amount
    }

    /// Splits `gross` into commission and net.
    ///
    /// The commission is the configured percent of `gross` rounded half away
    /// from zero to whole cents, clamped into the configured bounds and
    /// finally capped at `gross` so the net never goes negative.
    pub fn calculate(&self, gross: Money) -> Result<CommissionBreakdown, CommissionError> {
        if gross.is_negative() {
            return Err(CommissionError::NegativeAmount(gross));
        }

        let scaled = i128::from(gross.cents()) * i128::from(self.percent_bps);
        let rounded = (scaled + i128::from(FULL_BPS / 2)) / i128::from(FULL_BPS);
        // rounded <= gross because percent_bps <= FULL_BPS
        let mut commission = Money::from_cents(rounded as i64);

        if let Some(min) = self.min_amount
            && commission < min
        {
            commission = min;
        }
        if let Some(max) = self.max_amount
            && commission > max
        {
            commission = max;
        }
        if commission > gross {
            commission = gross;
        }

        Ok(CommissionBreakdown {
            gross_amount: gross,
            commission,
            net_amount: gross - commission,
        })
    }
}

impl Default for CommissionPolicy {
    /// 10% with no bounds.
    fn default() -> Self {
        Self {
            percent_bps: 1_000,
            min_amount: None,
            max_amount: None,
        }
    }
}
