//! Operator endpoints scoped to one merchant.
//!
//! Each handler resolves the merchant, picks its provider and delegates.

use super::epoch;
use crate::providers::{ManualEntry, ManualEntryReceipt, RefundConfirmation, RefundRequest};
use crate::server::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use slotledger_core::order::{OrderSummary, PassItems, SoldTickets};
use slotledger_core::transfer::{TransferRecord, TransferRequest};
use slotledger_web::{AppError, CorrelationId};

/// Range for [`sold_tickets`], epoch seconds.
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    /// Inclusive start.
    pub from: i64,
    /// Exclusive end.
    pub to: i64,
}

/// Departure for [`orders_at_slot`], epoch seconds.
#[derive(Debug, Deserialize)]
pub struct TripQuery {
    /// Departure instant.
    pub trip: i64,
}

/// Tickets sold per slot.
///
/// ```bash
/// curl -H "Authorization: Bearer $TOKEN" \
///   "http://localhost:8080/api/merchants/M1/sold-tickets?from=1700000000&to=1700086400"
/// ```
pub async fn sold_tickets(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<SoldTickets>>, AppError> {
    let (config, provider) = state.merchant(&merchant_id).await?;
    let sold = provider
        .fetch_sold_tickets(&config, epoch("from", range.from)?, epoch("to", range.to)?)
        .await?;
    Ok(Json(sold))
}

/// Line items departing at one instant.
pub async fn orders_at_slot(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    Query(query): Query<TripQuery>,
) -> Result<Json<Vec<OrderSummary>>, AppError> {
    let (config, provider) = state.merchant(&merchant_id).await?;
    let orders = provider
        .fetch_orders_at_slot(&config, epoch("trip", query.trip)?)
        .await?;
    Ok(Json(orders))
}

/// Ticket items of one order for pass rendering.
pub async fn pass_items(
    State(state): State<AppState>,
    Path((merchant_id, order_id)): Path<(String, String)>,
) -> Result<Json<PassItems>, AppError> {
    let (config, provider) = state.merchant(&merchant_id).await?;
    Ok(Json(provider.fetch_pass_items(&config, &order_id).await?))
}

/// Refunds items at the provider and restores their capacity.
pub async fn refund(
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundConfirmation>, AppError> {
    let (config, provider) = state.merchant(&merchant_id).await?;
    tracing::info!(
        correlation_id = %correlation_id.0,
        merchant_id = %merchant_id,
        order_id = %request.order_id,
        items = request.line_item_ids.len(),
        "Refund requested"
    );
    Ok(Json(provider.refund(&config, &request).await?))
}

/// Moves line items to other slots, in order, stopping at the first failure.
pub async fn transfer(
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    Json(requests): Json<Vec<TransferRequest>>,
) -> Result<Json<Vec<TransferRecord>>, AppError> {
    if requests.is_empty() {
        return Err(AppError::validation("No transfers requested"));
    }
    let (config, provider) = state.merchant(&merchant_id).await?;
    Ok(Json(provider.transfer(&config, &requests).await?))
}

/// Records a phone or walk-up sale.
pub async fn manual_entry(
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    Path(merchant_id): Path<String>,
    Json(entry): Json<ManualEntry>,
) -> Result<(StatusCode, Json<ManualEntryReceipt>), AppError> {
    let (config, provider) = state.merchant(&merchant_id).await?;
    let receipt = provider.manual_entry(&config, &entry).await?;
    tracing::debug!(
        correlation_id = %correlation_id.0,
        order_id = %receipt.order_id,
        "Manual entry accepted"
    );
    Ok((StatusCode::CREATED, Json(receipt)))
}
