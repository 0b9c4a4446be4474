//! Sandbox hooks for the in-memory payment provider.
//!
//! Stands in for the provider's hosted payment page: the buyer "pays" by
//! hitting this endpoint, after which `confirm-payment` sees a succeeded
//! intent.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use store::SettlementStore;

use super::AppState;
use crate::error::ApiError;

/// POST /gateway/payment-intents/:id/succeed
#[tracing::instrument(skip(state))]
pub async fn succeed_payment_intent<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.gateway.succeed_payment_intent(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Payment intent not found: {id}")))
    }
}
