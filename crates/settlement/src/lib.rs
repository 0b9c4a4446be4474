//! Order settlement pipeline.
//!
//! This crate turns a buyer's checkout into a reserved, paid and completed
//! order and finally into seller payouts:
//! 1. [`CheckoutOrchestrator`] runs the checkout saga (reserve stock,
//!    persist the order, request a payment intent) and compensates on failure
//! 2. [`OrderTransitionService`] drives the post-payment lifecycle
//! 3. [`PayoutProcessor`] creates payouts on completion and transfers them,
//!    retrying transient provider failures
//! 4. [`RefundWorkflow`] handles buyer refund requests and admin review

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod orders;
pub mod payout;
pub mod refund;
pub mod saga;
pub mod services;
pub mod state;

pub use config::{RetryPolicy, SettlementConfig, ShippingPolicy};
pub use error::{ErrorKind, Result, SettlementError};
pub use orchestrator::{CheckoutOrchestrator, CheckoutReceipt, CheckoutRequest, CheckoutSource};
pub use orders::{CompletedOrder, OrderTransitionService};
pub use payout::{PayoutProcessor, SweepSummary};
pub use refund::{RefundRequest, RefundWorkflow};
pub use saga::{CheckoutSaga, Compensation, CompletedStep};
pub use services::{
    GatewayError, GatewayErrorKind, InMemoryPaymentGateway, InventoryReservationService,
    Metadata, PaymentGateway, PaymentIntent, PaymentIntentStatus, ProviderRefund, Reservation,
    ReservationLine, Transfer,
};
pub use state::{CheckoutStep, SagaState};
