//! Ticket transfers.
//!
//! The line item and its order are locked for the whole transaction, so two
//! transfers of the same item serialise and the second one reads the SKU the
//! first one wrote.

use crate::ledger::{apply_delta, consume};
use crate::{PostgresStore, abandon, storage};
use chrono::{DateTime, Utc};
use slotledger_core::ledger::CapacityPolicy;
use slotledger_core::order::LineItemStatus;
use slotledger_core::store::StoreError;
use slotledger_core::transfer::{TransferError, TransferPlan, TransferRecord, TransferRequest};

fn failed(context: &'static str) -> impl FnOnce(sqlx::Error) -> TransferError {
    move |e| TransferError::Storage(format!("Failed to {context}: {e}"))
}

pub(crate) async fn apply(
    store: &PostgresStore,
    merchant_id: &str,
    request: &TransferRequest,
    policy: CapacityPolicy,
    applied_at: DateTime<Utc>,
) -> Result<TransferRecord, TransferError> {
    let not_found = || TransferError::LineItemNotFound(request.line_item_id.clone());
    let mut tx = store.pool.begin().await.map_err(failed("start transaction"))?;

    let item: Option<(String, String, i64)> = sqlx::query_as(
        r"
        SELECT o.merchant_id, li.status, li.quantity
        FROM line_items li
        JOIN orders o ON o.id = li.order_id
        WHERE li.id = $1
        FOR UPDATE OF li, o
        ",
    )
    .bind(&request.line_item_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(failed("lock line item"))?;

    let Some((owner, status, quantity)) = item else {
        abandon(tx, "unknown line item").await;
        return Err(not_found());
    };
    if owner != merchant_id {
        abandon(tx, "foreign line item").await;
        return Err(not_found());
    }
    if status == LineItemStatus::Refunded.as_str() {
        abandon(tx, "refunded line item").await;
        return Err(TransferError::LineItemRefunded(request.line_item_id.clone()));
    }
    let quantity = u32::try_from(quantity)
        .map_err(|_| TransferError::Storage(format!("Invalid quantity in database: {quantity}")))?;

    let (effective_sku,): (String,) =
        sqlx::query_as("SELECT effective_sku FROM effective_line_items WHERE id = $1")
            .bind(&request.line_item_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(failed("load effective sku"))?;

    let plan = TransferPlan::new(&effective_sku, request, quantity)?;

    apply_delta(
        &mut tx,
        plan.from.slot(),
        i64::from(plan.quantity),
        store.default_capacity,
    )
    .await?;
    consume(
        &mut tx,
        plan.to.slot(),
        plan.quantity,
        policy,
        store.default_capacity,
    )
    .await?;

    let destination = plan.to.slot();
    let (id,): (i64,) = sqlx::query_as(
        r"
        INSERT INTO transfers
            (line_item_id, old_sku, new_sku, new_name, quantity, new_product_id, new_trip_at, applied_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        ",
    )
    .bind(&plan.line_item_id)
    .bind(&plan.from_sku)
    .bind(&plan.to_sku)
    .bind(plan.new_name.as_deref())
    .bind(i64::from(plan.quantity))
    .bind(destination.product_id)
    .bind(destination.trip_at)
    .bind(applied_at)
    .fetch_one(&mut *tx)
    .await
    .map_err(failed("append transfer"))?;

    tx.commit().await.map_err(failed("commit transfer"))?;
    Ok(plan.into_record(id, applied_at))
}

pub(crate) async fn history(
    store: &PostgresStore,
    line_item_id: &str,
) -> Result<Vec<TransferRecord>, StoreError> {
    let rows: Vec<(i64, String, String, String, Option<String>, i64, DateTime<Utc>)> =
        sqlx::query_as(
            r"
            SELECT id, line_item_id, old_sku, new_sku, new_name, quantity, applied_at
            FROM transfers
            WHERE line_item_id = $1
            ORDER BY id
            ",
        )
        .bind(line_item_id)
        .fetch_all(&store.pool)
        .await
        .map_err(storage("load transfer history"))?;

    rows.into_iter()
        .map(
            |(id, line_item_id, old_sku, new_sku, new_name, quantity, applied_at)| {
                Ok(TransferRecord {
                    id,
                    line_item_id,
                    old_sku,
                    new_sku,
                    new_name,
                    quantity: u32::try_from(quantity).map_err(|_| {
                        StoreError::Storage(format!("Invalid quantity in database: {quantity}"))
                    })?,
                    applied_at,
                })
            },
        )
        .collect()
}
