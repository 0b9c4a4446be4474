//! HTTP route handlers.

pub mod checkout;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod payouts;
pub mod refunds;

use settlement::{
    CheckoutOrchestrator, InMemoryPaymentGateway, OrderTransitionService, PayoutProcessor,
    RefundWorkflow,
};
use store::SettlementStore;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SettlementStore> {
    pub store: S,
    pub gateway: InMemoryPaymentGateway,
    pub checkout: CheckoutOrchestrator<S, InMemoryPaymentGateway>,
    pub orders: OrderTransitionService<S, InMemoryPaymentGateway>,
    pub payouts: PayoutProcessor<S, InMemoryPaymentGateway>,
    pub refunds: RefundWorkflow<S, InMemoryPaymentGateway>,
}
