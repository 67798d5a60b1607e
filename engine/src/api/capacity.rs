//! Capacity ledger endpoints.
//!
//! - GET /api/capacity/:product_id/:epoch - one slot (defaults when never touched)
//! - GET /api/capacity?product_id&from&to - stored slots in a range
//! - PUT /api/capacity/:product_id/:epoch/available - override the seat count
//! - PUT /api/capacity/:product_id/:epoch/cancelled - cancel or reopen a departure

use super::{capacity_error, epoch};
use crate::metrics;
use crate::server::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use slotledger_core::codec::Slot;
use slotledger_core::ledger::{CapacityEntry, CapacityLedger};
use slotledger_web::AppError;

/// Range filter for [`list_entries`].
#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    /// Only this product.
    pub product_id: Option<i64>,
    /// Inclusive start, epoch seconds.
    pub from: i64,
    /// Exclusive end, epoch seconds.
    pub to: i64,
}

/// Body of [`set_available`].
#[derive(Debug, Deserialize)]
pub struct AvailableBody {
    /// New seat count.
    pub available: i64,
}

/// Body of [`set_cancelled`].
#[derive(Debug, Deserialize)]
pub struct CancelledBody {
    /// Cancellation flag.
    pub cancelled: bool,
}

fn slot(product_id: i64, seconds: i64) -> Result<Slot, AppError> {
    Ok(Slot::new(product_id, epoch("epoch", seconds)?))
}

/// Current entry for one slot.
///
/// ```bash
/// curl -H "Authorization: Bearer $TOKEN" http://localhost:8080/api/capacity/12/1700000000
/// # {"slot":{"product_id":12,"trip_at":"2023-11-14T22:13:20Z"},"available":8,"cancelled":false}
/// ```
pub async fn get_entry(
    State(state): State<AppState>,
    Path((product_id, seconds)): Path<(i64, i64)>,
) -> Result<Json<CapacityEntry>, AppError> {
    let entry = state
        .stores
        .ledger
        .get(slot(product_id, seconds)?)
        .await
        .map_err(|e| capacity_error(&e))?;
    Ok(Json(entry))
}

/// Stored entries with `from <= trip_at < to`.
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<CapacityEntry>>, AppError> {
    let from = epoch("from", query.from)?;
    let to = epoch("to", query.to)?;
    let entries = state
        .stores
        .ledger
        .list(query.product_id, from, to)
        .await
        .map_err(|e| capacity_error(&e))?;
    Ok(Json(entries))
}

/// Operator override of the remaining seats.
pub async fn set_available(
    State(state): State<AppState>,
    Path((product_id, seconds)): Path<(i64, i64)>,
    Json(body): Json<AvailableBody>,
) -> Result<Json<CapacityEntry>, AppError> {
    let entry = state
        .stores
        .ledger
        .set_available(slot(product_id, seconds)?, body.available)
        .await
        .map_err(|e| capacity_error(&e))?;
    metrics::record_capacity_change("override");
    tracing::info!(slot = %entry.slot, available = entry.available, "Capacity overridden");
    Ok(Json(entry))
}

/// Cancels or reopens a departure.
pub async fn set_cancelled(
    State(state): State<AppState>,
    Path((product_id, seconds)): Path<(i64, i64)>,
    Json(body): Json<CancelledBody>,
) -> Result<Json<CapacityEntry>, AppError> {
    let entry = state
        .stores
        .ledger
        .set_cancelled(slot(product_id, seconds)?, body.cancelled)
        .await
        .map_err(|e| capacity_error(&e))?;
    metrics::record_capacity_change("cancel");
    tracing::info!(slot = %entry.slot, cancelled = entry.cancelled, "Slot cancellation changed");
    Ok(Json(entry))
}
