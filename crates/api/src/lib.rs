//! HTTP API server for the marketplace settlement pipeline.
//!
//! Exposes checkout, order transitions, payouts and refunds over REST,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use settlement::{
    CheckoutOrchestrator, InMemoryPaymentGateway, OrderTransitionService, PayoutProcessor,
    RefundWorkflow, SettlementConfig,
};
use store::SettlementStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: SettlementStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/checkout", post(routes::checkout::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{id}/confirm-payment",
            post(routes::orders::confirm_payment::<S>),
        )
        .route("/orders/{id}/confirm", post(routes::orders::confirm::<S>))
        .route("/orders/{id}/reject", post(routes::orders::reject::<S>))
        .route("/orders/{id}/ship", post(routes::orders::ship::<S>))
        .route("/orders/{id}/deliver", post(routes::orders::deliver::<S>))
        .route("/orders/{id}/receive", post(routes::orders::receive::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route(
            "/orders/{id}/payouts",
            get(routes::payouts::for_order::<S>).post(routes::payouts::create_for_order::<S>),
        )
        .route(
            "/orders/{id}/refunds",
            get(routes::refunds::for_order::<S>).post(routes::refunds::request::<S>),
        )
        .route("/buyers/{id}/wallet", get(routes::orders::wallet::<S>))
        .route("/payouts/process-due", post(routes::payouts::process_due::<S>))
        .route("/payouts/{id}", get(routes::payouts::get::<S>))
        .route("/payouts/{id}/process", post(routes::payouts::process::<S>))
        .route("/payouts/{id}/requeue", post(routes::payouts::requeue::<S>))
        .route("/refunds/{id}", get(routes::refunds::get::<S>))
        .route("/refunds/{id}/review", post(routes::refunds::review::<S>))
        .route("/refunds/{id}/approve", post(routes::refunds::approve::<S>))
        .route("/refunds/{id}/reject", post(routes::refunds::reject::<S>))
        .route(
            "/gateway/payment-intents/{id}/succeed",
            post(routes::gateway::succeed_payment_intent::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state over `store` with the in-memory
/// payment provider.
pub fn create_default_state<S: SettlementStore>(
    store: S,
    config: SettlementConfig,
) -> Arc<AppState<S>> {
    let gateway = InMemoryPaymentGateway::new();

    Arc::new(AppState {
        checkout: CheckoutOrchestrator::new(store.clone(), gateway.clone(), config.clone()),
        orders: OrderTransitionService::new(store.clone(), gateway.clone(), config.clone()),
        payouts: PayoutProcessor::new(store.clone(), gateway.clone(), config.clone()),
        refunds: RefundWorkflow::new(store.clone(), gateway.clone(), config),
        store,
        gateway,
    })
}
