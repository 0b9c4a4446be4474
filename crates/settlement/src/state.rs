//! Checkout saga state machine.

use serde::{Deserialize, Serialize};

/// The forward steps of a checkout, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    ReserveStock,
    PersistOrder,
    RequestPaymentIntent,
}

impl CheckoutStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutStep::ReserveStock => "reserve_stock",
            CheckoutStep::PersistOrder => "persist_order",
            CheckoutStep::RequestPaymentIntent => "request_payment_intent",
        }
    }
}

impl std::fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The state of a checkout saga.
///
/// State transitions:
/// ```text
/// Running ──┬──► Committed
///           └──► Compensating ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    /// Forward steps are being executed.
    #[default]
    Running,

    /// A step failed and completed steps are being undone.
    Compensating,

    /// Every step succeeded (terminal state).
    Committed,

    /// Compensation ran to the end, successfully or not (terminal state).
    Compensated,
}

impl SagaState {
    /// Returns true if forward steps may still be recorded.
    pub fn can_record(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if compensation can begin.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::Compensated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Running => "running",
            SagaState::Compensating => "compensating",
            SagaState::Committed => "committed",
            SagaState::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
