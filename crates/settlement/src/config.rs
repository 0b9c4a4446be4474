//! Tunables shared by the settlement services.

use std::time::Duration;

use domain::{CommissionPolicy, Money};

/// Shipping fee applied at checkout.
///
/// A flat fee per order, waived when the subtotal reaches the optional
/// free-shipping threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShippingPolicy {
    pub flat_fee: Money,
    pub free_threshold: Option<Money>,
}

impl ShippingPolicy {
    pub fn flat(fee: Money) -> Self {
        Self {
            flat_fee: fee,
            free_threshold: None,
        }
    }

    pub fn with_free_threshold(mut self, threshold: Money) -> Self {
        self.free_threshold = Some(threshold);
        self
    }

    /// Returns the shipping fee owed for an order with this subtotal.
    pub fn fee_for(&self, subtotal: Money) -> Money {
        match self.free_threshold {
            Some(threshold) if subtotal >= threshold => Money::zero(),
            _ => self.flat_fee,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Configuration for the checkout, payout and refund services.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Currency used when a checkout does not name one.
    pub currency: String,
    pub commission: CommissionPolicy,
    pub shipping: ShippingPolicy,
    /// Upper bound on every payment gateway call.
    pub gateway_timeout: Duration,
    /// Transient transfer failures tolerated before a payout is failed.
    pub payout_max_retries: u32,
    /// How long a payout may sit in `processing` before a sweep reclaims it.
    pub payout_processing_lease: Duration,
    /// Retry budget for giving reserved stock back.
    pub compensation_retry: RetryPolicy,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            commission: CommissionPolicy::default(),
            shipping: ShippingPolicy::default(),
            gateway_timeout: Duration::from_secs(10),
            payout_max_retries: 5,
            payout_processing_lease: Duration::from_secs(15 * 60),
            compensation_retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipping_fee() {
        let policy = ShippingPolicy::flat(Money::from_cents(500))
            .with_free_threshold(Money::from_units(50));

        assert_eq!(policy.fee_for(Money::from_units(10)), Money::from_cents(500));
        assert_eq!(policy.fee_for(Money::from_units(50)), Money::zero());
        assert_eq!(ShippingPolicy::default().fee_for(Money::from_units(1)), Money::zero());
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };

        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(4), Duration::from_millis(500));
        assert_eq!(retry.backoff(40), Duration::from_millis(500));
    }
}
