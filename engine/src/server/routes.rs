//! Router configuration.

use super::health::{metrics_endpoint, readiness_check};
use super::state::AppState;
use crate::api::{capacity, merchants, webhooks};
use axum::{
    Router,
    routing::{get, post, put},
};
use slotledger_web::handlers::health_check;
use slotledger_web::{bearer_auth_layer, correlation_id_layer};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`, `/ready`, `/metrics`: open
/// - `/webhooks/{provider}/:merchant_id`: open, authenticated by signature
/// - `/api/...`: operator routes behind the bearer token
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Merchant scoped reads and writes
        .route(
            "/merchants/:merchant_id/sold-tickets",
            get(merchants::sold_tickets),
        )
        .route("/merchants/:merchant_id/orders", get(merchants::orders_at_slot))
        .route(
            "/merchants/:merchant_id/orders/:order_id/pass-items",
            get(merchants::pass_items),
        )
        .route("/merchants/:merchant_id/refunds", post(merchants::refund))
        .route("/merchants/:merchant_id/transfers", post(merchants::transfer))
        .route(
            "/merchants/:merchant_id/manual-entries",
            post(merchants::manual_entry),
        )
        // Capacity ledger
        .route("/capacity", get(capacity::list_entries))
        .route("/capacity/:product_id/:epoch", get(capacity::get_entry))
        .route(
            "/capacity/:product_id/:epoch/available",
            put(capacity::set_available),
        )
        .route(
            "/capacity/:product_id/:epoch/cancelled",
            put(capacity::set_cancelled),
        )
        .layer(bearer_auth_layer(state.admin_token.clone()));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .route("/webhooks/paypal/:merchant_id", post(webhooks::paypal))
        .route("/webhooks/stripe/:merchant_id", post(webhooks::stripe))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
