//! Seller payout endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::PayoutId;
use domain::Payout;
use serde::{Deserialize, Serialize};
use settlement::SweepSummary;
use store::{SettlementStore, Versioned};

use super::AppState;
use super::orders::order_id;
use crate::error::{ApiError, parse_id};

const DEFAULT_SWEEP_LIMIT: usize = 50;

// -- Request types --

#[derive(Deserialize)]
pub struct ProcessRequest {
    pub processed_by: String,
}

#[derive(Deserialize)]
pub struct ProcessDueRequest {
    pub processed_by: String,
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Serialize)]
pub struct PayoutResponse {
    pub id: String,
    pub order_id: String,
    pub seller_id: String,
    pub gross_cents: i64,
    pub commission_cents: i64,
    pub net_cents: i64,
    pub currency: String,
    pub commission_bps: u32,
    pub status: &'static str,
    pub provider_transfer_id: Option<String>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub processed_by: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl From<Versioned<Payout>> for PayoutResponse {
    fn from(Versioned { value: payout, version }: Versioned<Payout>) -> Self {
        Self {
            id: payout.id().to_string(),
            order_id: payout.order_id().to_string(),
            seller_id: payout.seller_id().to_string(),
            gross_cents: payout.gross_amount().cents(),
            commission_cents: payout.commission().cents(),
            net_cents: payout.net_amount().cents(),
            currency: payout.currency().to_string(),
            commission_bps: payout.commission_policy().percent_bps(),
            status: payout.status().as_str(),
            provider_transfer_id: payout.provider_transfer_id().map(str::to_string),
            last_error: payout.last_error().map(str::to_string),
            retry_count: payout.retry_count(),
            processed_by: payout.processed_by().map(str::to_string),
            paid_at: payout.paid_at(),
            created_at: payout.created_at(),
            updated_at: payout.updated_at(),
            version: version.as_i64(),
        }
    }
}

// -- Handlers --

/// GET /payouts/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout = state.payouts.get_payout(payout_id(&id)?).await?;
    Ok(Json(payout.into()))
}

/// GET /orders/:id/payouts
#[tracing::instrument(skip(state))]
pub async fn for_order<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PayoutResponse>>, ApiError> {
    let payouts = state.payouts.payouts_for_order(order_id(&id)?).await?;
    Ok(Json(payouts.into_iter().map(PayoutResponse::from).collect()))
}

/// POST /orders/:id/payouts: (re)create payouts for a completed order.
///
/// Safe to repeat; existing payouts are returned as they are.
#[tracing::instrument(skip(state))]
pub async fn create_for_order<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Vec<PayoutResponse>>), ApiError> {
    let payouts = state.payouts.create_for_order(order_id(&id)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(payouts.into_iter().map(PayoutResponse::from).collect()),
    ))
}

/// POST /payouts/:id/process
#[tracing::instrument(skip(state, req))]
pub async fn process<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout = state
        .payouts
        .process(payout_id(&id)?, &req.processed_by)
        .await?;
    Ok(Json(payout.into()))
}

/// POST /payouts/:id/requeue: put a failed payout back in the queue.
#[tracing::instrument(skip(state))]
pub async fn requeue<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PayoutResponse>, ApiError> {
    let payout = state.payouts.requeue(payout_id(&id)?).await?;
    Ok(Json(payout.into()))
}

/// POST /payouts/process-due: run one sweep over due payouts.
#[tracing::instrument(skip(state, req))]
pub async fn process_due<S: SettlementStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ProcessDueRequest>,
) -> Result<Json<SweepSummary>, ApiError> {
    let limit = req.limit.unwrap_or(DEFAULT_SWEEP_LIMIT);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }
    let summary = state.payouts.process_due(limit, &req.processed_by).await?;
    Ok(Json(summary))
}

fn payout_id(raw: &str) -> Result<PayoutId, ApiError> {
    parse_id("payout id", raw, PayoutId::parse)
}
