//! Collaborators the settlement services drive: stock reservation on the
//! catalog store and the payment provider.

pub mod inventory;
pub mod payment;

pub use inventory::{InventoryReservationService, Reservation, ReservationLine};
pub use payment::{
    GatewayError, GatewayErrorKind, InMemoryPaymentGateway, Metadata, PaymentGateway,
    PaymentIntent, PaymentIntentStatus, ProviderRefund, Transfer,
};
pub(crate) use payment::with_timeout;
