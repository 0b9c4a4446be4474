//! Refund request and review endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{BuyerId, RefundId};
use domain::{Money, Refund};
use serde::{Deserialize, Serialize};
use settlement::RefundRequest;
use store::{SettlementStore, Versioned};

use super::AppState;
use super::orders::order_id;
use crate::error::{ApiError, parse_id};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateRefundRequest {
    pub buyer_id: String,
    /// Defaults to whatever of the order total is not yet refunded.
    pub amount_cents: Option<i64>,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub admin: String,
}

#[derive(Deserialize)]
pub struct RejectRefundRequest {
    pub admin: String,
    pub note: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct RefundResponse {
    pub id: String,
    pub order_id: String,
    pub buyer_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reason: String,
    pub evidence: Vec<String>,
    pub status: &'static str,
    pub provider_refund_id: Option<String>,
    pub last_error: Option<String>,
    pub reviewed_by: Option<String>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl From<Versioned<Refund>> for RefundResponse {
    fn from(Versioned { value: refund, version }: Versioned<Refund>) -> Self {
        Self {
            id: refund.id().to_string(),
            order_id: refund.order_id().to_string(),
            buyer_id: refund.buyer_id().to_string(),
            amount_cents: refund.amount().cents(),
            currency: refund.currency().to_string(),
            reason: refund.reason().to_string(),
            evidence: refund.evidence().to_vec(),
            status: refund.status().as_str(),
            provider_refund_id: refund.provider_refund_id().map(str::to_string),
            last_error: refund.last_error().map(str::to_string),
            reviewed_by: refund.reviewed_by().map(str::to_string),
            review_note: refund.review_note().map(str::to_string),
            created_at: refund.created_at(),
            resolved_at: refund.resolved_at(),
            version: version.as_i64(),
        }
    }
}

// -- Handlers --

/// POST /orders/:id/refunds: buyer opens a refund request.
#[tracing::instrument(skip(state, req))]
pub async fn request<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CreateRefundRequest>,
) -> Result<(StatusCode, Json<RefundResponse>), ApiError> {
    let refund = state
        .refunds
        .request(RefundRequest {
            order_id: order_id(&id)?,
            buyer_id: parse_id("buyer_id", &req.buyer_id, BuyerId::parse)?,
            amount: req.amount_cents.map(Money::from_cents),
            reason: req.reason,
            evidence: req.evidence,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(refund.into())))
}

/// GET /orders/:id/refunds
#[tracing::instrument(skip(state))]
pub async fn for_order<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<RefundResponse>>, ApiError> {
    let refunds = state.refunds.refunds_for_order(order_id(&id)?).await?;
    Ok(Json(refunds.into_iter().map(RefundResponse::from).collect()))
}

/// GET /refunds/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<RefundResponse>, ApiError> {
    let refund = state.refunds.get_refund(refund_id(&id)?).await?;
    Ok(Json(refund.into()))
}

/// POST /refunds/:id/review
#[tracing::instrument(skip(state, req))]
pub async fn review<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let refund = state
        .refunds
        .start_review(refund_id(&id)?, req.admin)
        .await?;
    Ok(Json(refund.into()))
}

/// POST /refunds/:id/approve: refunds the buyer through the provider.
///
/// A provider failure still answers 200 with the refund in `failed`.
#[tracing::instrument(skip(state, req))]
pub async fn approve<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let refund = state.refunds.approve(refund_id(&id)?, req.admin).await?;
    Ok(Json(refund.into()))
}

/// POST /refunds/:id/reject
#[tracing::instrument(skip(state, req))]
pub async fn reject<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RejectRefundRequest>,
) -> Result<Json<RefundResponse>, ApiError> {
    let refund = state
        .refunds
        .reject(refund_id(&id)?, req.admin, req.note)
        .await?;
    Ok(Json(refund.into()))
}

fn refund_id(raw: &str) -> Result<RefundId, ApiError> {
    parse_id("refund id", raw, RefundId::parse)
}
