//! Checkout endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use common::BuyerId;
use domain::{ProductId, ShippingAddress};
use serde::{Deserialize, Serialize};
use settlement::{CheckoutRequest, CheckoutSource};
use store::SettlementStore;

use super::AppState;
use super::orders::OrderResponse;
use crate::error::{ApiError, parse_id};

/// Buys a single product when `product_id` is set, the buyer's cart otherwise.
#[derive(Deserialize)]
pub struct CreateCheckoutRequest {
    pub buyer_id: String,
    pub product_id: Option<String>,
    pub quantity: Option<u32>,
    pub shipping_address: ShippingAddress,
    pub currency: Option<String>,
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    pub client_secret: String,
}

/// POST /checkout: reserve stock, persist the order and open a payment intent.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let buyer_id = parse_id("buyer_id", &req.buyer_id, BuyerId::parse)?;

    let source = match (req.product_id, req.quantity) {
        (Some(product_id), quantity) => CheckoutSource::Product {
            product_id: ProductId::new(product_id),
            quantity: quantity.unwrap_or(1),
        },
        (None, None) => CheckoutSource::Cart,
        (None, Some(_)) => {
            return Err(ApiError::BadRequest(
                "quantity requires a product_id".to_string(),
            ));
        }
    };

    let receipt = state
        .checkout
        .checkout(CheckoutRequest {
            buyer_id,
            source,
            shipping_address: req.shipping_address,
            currency: req.currency,
        })
        .await?;

    let response = CheckoutResponse {
        order: receipt.order.into(),
        client_secret: receipt.client_secret,
    };
    Ok((StatusCode::CREATED, Json(response)))
}
