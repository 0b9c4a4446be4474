//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use common::{BuyerId, OrderId, SellerId};
use domain::{Actor, LineItem, Money, Order, OrderSource, ShippingAddress, WalletCredit};
use serde::{Deserialize, Serialize};
use settlement::CompletedOrder;
use store::{SettlementStore, Versioned, WalletStore};

use super::AppState;
use super::payouts::PayoutResponse;
use crate::error::{ApiError, parse_id};

// -- Request types --

#[derive(Deserialize)]
pub struct SellerActionRequest {
    pub seller_id: String,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub seller_id: String,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct ShipRequest {
    pub seller_id: String,
    pub tracking_number: Option<String>,
}

#[derive(Deserialize)]
pub struct ReceiveRequest {
    pub buyer_id: String,
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
    pub reason: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub buyer_id: String,
    pub status: &'static str,
    pub source: OrderSource,
    pub items: Vec<LineItemResponse>,
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub payment_intent_id: Option<String>,
    pub tracking_number: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub product_id: String,
    pub seller_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

#[derive(Serialize)]
pub struct CompletedOrderResponse {
    pub order: OrderResponse,
    pub payouts: Vec<PayoutResponse>,
}

#[derive(Serialize)]
pub struct WalletResponse {
    pub buyer_id: String,
    pub balance_cents: i64,
    pub credits: Vec<WalletCreditResponse>,
}

#[derive(Serialize)]
pub struct WalletCreditResponse {
    pub order_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl From<Versioned<Order>> for OrderResponse {
    fn from(Versioned { value: order, version }: Versioned<Order>) -> Self {
        Self {
            id: order.id().to_string(),
            buyer_id: order.buyer_id().to_string(),
            status: order.status().as_str(),
            source: order.source(),
            items: order.items().iter().map(LineItemResponse::from).collect(),
            subtotal_cents: order.subtotal().cents(),
            shipping_cents: order.shipping().cents(),
            total_cents: order.total().cents(),
            currency: order.currency().to_string(),
            shipping_address: order.shipping_address().clone(),
            payment_intent_id: order.payment_intent_id().map(str::to_string),
            tracking_number: order.tracking_number().map(str::to_string),
            cancellation_reason: order.cancellation_reason().map(str::to_string),
            cancelled_by: order.cancelled_by().map(str::to_string),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
            paid_at: order.paid_at(),
            completed_at: order.completed_at(),
            version: version.as_i64(),
        }
    }
}

impl From<&LineItem> for LineItemResponse {
    fn from(item: &LineItem) -> Self {
        Self {
            product_id: item.product_id.to_string(),
            seller_id: item.seller_id.to_string(),
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price.cents(),
        }
    }
}

impl From<WalletCredit> for WalletCreditResponse {
    fn from(credit: WalletCredit) -> Self {
        Self {
            order_id: credit.order_id.to_string(),
            amount_cents: credit.amount.cents(),
            reason: credit.reason,
            created_at: credit.created_at,
        }
    }
}

// -- Handlers --

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.get_order(order_id(&id)?).await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/confirm-payment: mark paid once the provider captured.
#[tracing::instrument(skip(state))]
pub async fn confirm_payment<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.confirm_payment(order_id(&id)?).await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/confirm
#[tracing::instrument(skip(state, req))]
pub async fn confirm<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SellerActionRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .orders
        .confirm(order_id(&id)?, seller_id(&req.seller_id)?)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/reject
#[tracing::instrument(skip(state, req))]
pub async fn reject<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .orders
        .reject(order_id(&id)?, seller_id(&req.seller_id)?, req.reason)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/ship
#[tracing::instrument(skip(state, req))]
pub async fn ship<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ShipRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .orders
        .ship(order_id(&id)?, seller_id(&req.seller_id)?, req.tracking_number)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/deliver
#[tracing::instrument(skip(state, req))]
pub async fn deliver<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SellerActionRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .orders
        .deliver(order_id(&id)?, seller_id(&req.seller_id)?)
        .await?;
    Ok(Json(order.into()))
}

/// POST /orders/:id/receive: buyer confirms receipt; payouts are created.
#[tracing::instrument(skip(state, req))]
pub async fn receive<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ReceiveRequest>,
) -> Result<Json<CompletedOrderResponse>, ApiError> {
    let buyer_id = parse_id("buyer_id", &req.buyer_id, BuyerId::parse)?;
    let CompletedOrder { order, payouts } = state.orders.receive(order_id(&id)?, buyer_id).await?;

    Ok(Json(CompletedOrderResponse {
        order: order.into(),
        payouts: payouts.into_iter().map(PayoutResponse::from).collect(),
    }))
}

/// POST /orders/:id/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state
        .orders
        .cancel(order_id(&id)?, req.actor, req.reason)
        .await?;
    Ok(Json(order.into()))
}

/// GET /buyers/:id/wallet
#[tracing::instrument(skip(state))]
pub async fn wallet<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let buyer_id = parse_id("buyer_id", &id, BuyerId::parse)?;
    let credits = state
        .store
        .credits_for_buyer(buyer_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let balance: Money = credits.iter().map(|c| c.amount).sum();
    Ok(Json(WalletResponse {
        buyer_id: buyer_id.to_string(),
        balance_cents: balance.cents(),
        credits: credits.into_iter().map(WalletCreditResponse::from).collect(),
    }))
}

pub(crate) fn order_id(raw: &str) -> Result<OrderId, ApiError> {
    parse_id("order id", raw, OrderId::parse)
}

fn seller_id(raw: &str) -> Result<SellerId, ApiError> {
    parse_id("seller_id", raw, SellerId::parse)
}
