//! Explicit checkout saga.
//!
//! The orchestrator records every forward step it completes; when a later
//! step fails, [`CheckoutSaga::begin_compensation`] hands back the undo
//! actions for the recorded steps, most recent first.

use common::OrderId;

use crate::error::{Result, SettlementError};
use crate::services::Reservation;
use crate::state::{CheckoutStep, SagaState};

/// A forward step that has taken effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletedStep {
    StockReserved(Reservation),
    OrderPersisted(OrderId),
    PaymentIntentCreated { payment_intent_id: String },
}

impl CompletedStep {
    pub fn step(&self) -> CheckoutStep {
        match self {
            CompletedStep::StockReserved(_) => CheckoutStep::ReserveStock,
            CompletedStep::OrderPersisted(_) => CheckoutStep::PersistOrder,
            CompletedStep::PaymentIntentCreated { .. } => CheckoutStep::RequestPaymentIntent,
        }
    }

    fn compensation(&self) -> Option<Compensation> {
        match self {
            CompletedStep::StockReserved(reservation) => {
                Some(Compensation::ReleaseStock(reservation.clone()))
            }
            CompletedStep::OrderPersisted(order_id) => Some(Compensation::DeleteOrder(*order_id)),
            // An unpaid intent expires at the provider on its own.
            CompletedStep::PaymentIntentCreated { .. } => None,
        }
    }
}

/// An undo action for a completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteOrder(OrderId),
    ReleaseStock(Reservation),
}

#[derive(Debug, Clone)]
pub struct CheckoutSaga {
    order_id: OrderId,
    state: SagaState,
    completed: Vec<CompletedStep>,
    failure: Option<String>,
}

impl CheckoutSaga {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            state: SagaState::Running,
            completed: Vec::new(),
            failure: None,
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn record(&mut self, step: CompletedStep) -> Result<()> {
        self.require(self.state.can_record(), "running")?;
        tracing::info!(order_id = %self.order_id, step = %step.step(), "checkout step completed");
        self.completed.push(step);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.require(self.state.can_record(), "running")?;
        self.state = SagaState::Committed;
        Ok(())
    }

    /// Moves the saga to `Compensating` and returns the undo actions in
    /// reverse order of completion.
    pub fn begin_compensation(&mut self, reason: impl Into<String>) -> Result<Vec<Compensation>> {
        self.require(self.state.can_compensate(), "running")?;
        self.state = SagaState::Compensating;
        self.failure = Some(reason.into());
        Ok(self
            .completed
            .iter()
            .rev()
            .filter_map(CompletedStep::compensation)
            .collect())
    }

    pub fn finish_compensation(&mut self) -> Result<()> {
        self.require(self.state == SagaState::Compensating, "compensating")?;
        self.state = SagaState::Compensated;
        Ok(())
    }

    fn require(&self, allowed: bool, expected: &'static str) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(SettlementError::InvalidSagaState {
                expected,
                actual: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ReservationLine;
    use domain::ProductId;

    fn reservation() -> Reservation {
        Reservation::new(
            OrderId::new(),
            vec![ReservationLine::new(ProductId::new("SKU-1"), 2)],
        )
    }

    #[test]
    fn test_compensations_run_in_reverse() {
        let order_id = OrderId::new();
        let mut saga = CheckoutSaga::new(order_id);
        saga.record(CompletedStep::StockReserved(reservation())).unwrap();
        saga.record(CompletedStep::OrderPersisted(order_id)).unwrap();

        let compensations = saga.begin_compensation("gateway down").unwrap();

        assert_eq!(
            compensations,
            vec![
                Compensation::DeleteOrder(order_id),
                Compensation::ReleaseStock(reservation()),
            ]
        );
        assert_eq!(saga.state(), SagaState::Compensating);
        assert_eq!(saga.failure(), Some("gateway down"));

        saga.finish_compensation().unwrap();
        assert_eq!(saga.state(), SagaState::Compensated);
    }

    #[test]
    fn test_payment_intent_has_no_compensation() {
        let mut saga = CheckoutSaga::new(OrderId::new());
        saga.record(CompletedStep::PaymentIntentCreated {
            payment_intent_id: "pi_1".to_string(),
        })
        .unwrap();

        assert!(saga.begin_compensation("persist failed").unwrap().is_empty());
    }

    #[test]
    fn test_committed_saga_rejects_further_steps() {
        let order_id = OrderId::new();
        let mut saga = CheckoutSaga::new(order_id);
        saga.commit().unwrap();

        assert!(matches!(
            saga.record(CompletedStep::OrderPersisted(order_id)),
            Err(SettlementError::InvalidSagaState { actual: SagaState::Committed, .. })
        ));
        assert!(saga.begin_compensation("too late").is_err());
    }
}
