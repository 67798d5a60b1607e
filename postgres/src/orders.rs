//! Orders, captures and refunds.
//!
//! Each write is one transaction: the insert-if-absent on the resource id
//! decides whether the call is a first delivery, and the ledger deltas ride
//! in the same transaction, so a redelivery can never move capacity twice.

use crate::ledger::{apply_delta, consume};
use crate::{PostgresStore, abandon, storage};
use chrono::{DateTime, Utc};
use slotledger_core::codec::Slot;
use slotledger_core::ledger::CapacityPolicy;
use slotledger_core::order::{
    Capture, CaptureStatus, LineItem, LineItemStatus, NewOrder, Order, OrderSource, OrderStatus,
    OrderSummary, Outcome, Payer, RefundRecord, SoldTickets,
};
use slotledger_core::store::{OrderStore, StoreError, StoreFuture, TransferFuture};
use slotledger_core::transfer::{TransferRecord, TransferRequest};

type OrderRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
);

type ItemRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
    String,
    String,
);

type CaptureRow = (String, String, String, i64, String, DateTime<Utc>, DateTime<Utc>);

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Storage(format!("Invalid {what} in database: {value}"))
}

fn quantity(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| corrupt("quantity", &value.to_string()))
}

fn line_item(row: ItemRow) -> Result<LineItem, StoreError> {
    let (id, order_id, sku, name, original_sku, original_name, unit_amount_cents, qty, description, status) =
        row;
    Ok(LineItem {
        status: LineItemStatus::parse(&status).ok_or_else(|| corrupt("line item status", &status))?,
        id,
        order_id,
        sku,
        name,
        original_sku,
        original_name,
        unit_amount_cents,
        quantity: quantity(qty)?,
        description,
    })
}

fn capture(row: CaptureRow) -> Result<Capture, StoreError> {
    let (id, order_id, status, amount_cents, currency, created_at, updated_at) = row;
    Ok(Capture {
        status: CaptureStatus::parse(&status).ok_or_else(|| corrupt("capture status", &status))?,
        id,
        order_id,
        amount_cents,
        currency,
        created_at,
        updated_at,
    })
}

impl OrderStore for PostgresStore {
    fn record_order<'a>(
        &'a self,
        order: &'a NewOrder,
        policy: CapacityPolicy,
    ) -> StoreFuture<'a, Outcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage("start transaction"))?;

            let inserted = sqlx::query(
                r"
                INSERT INTO orders
                    (id, merchant_id, status, source, payer_id, payer_name, payer_email, payer_phone, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(&order.id)
            .bind(&order.merchant_id)
            .bind(order.status.as_str())
            .bind(order.source.as_str())
            .bind(&order.payer.id)
            .bind(&order.payer.name)
            .bind(&order.payer.email)
            .bind(order.payer.phone.as_deref())
            .bind(order.created_at)
            .execute(&mut *tx)
            .await
            .map_err(storage("insert order"))?
            .rows_affected();

            if inserted == 0 {
                abandon(tx, "order already recorded").await;
                return Ok(Outcome::AlreadyProcessed);
            }

            for item in &order.line_items {
                let slot = item.kind().slot_key().map(|key| key.slot());
                sqlx::query(
                    r"
                    INSERT INTO line_items
                        (id, order_id, sku, name, unit_amount_cents, quantity, description, status, product_id, trip_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ",
                )
                .bind(&item.id)
                .bind(&order.id)
                .bind(&item.sku)
                .bind(&item.name)
                .bind(item.unit_amount_cents)
                .bind(i64::from(item.quantity))
                .bind(&item.description)
                .bind(LineItemStatus::Active.as_str())
                .bind(slot.map(|s| s.product_id))
                .bind(slot.map(|s| s.trip_at))
                .execute(&mut *tx)
                .await
                .map_err(storage("insert line item"))?;

                if let Some(slot) = slot {
                    consume(&mut tx, slot, item.quantity, policy, self.default_capacity).await?;
                }
            }

            for capture in &order.captures {
                insert_capture(&mut tx, capture, &order.id).await?;
            }

            tx.commit().await.map_err(storage("commit order"))?;
            Ok(Outcome::Applied)
        })
    }

    fn record_capture<'a>(&'a self, capture: &'a Capture) -> StoreFuture<'a, Outcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage("start transaction"))?;

            let order: Option<(String,)> =
                sqlx::query_as("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                    .bind(&capture.order_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage("lock order"))?;
            if order.is_none() {
                abandon(tx, "unknown order").await;
                return Err(StoreError::NotFound {
                    resource: "order",
                    id: capture.order_id.clone(),
                });
            }

            if !insert_capture(&mut tx, capture, &capture.order_id).await? {
                abandon(tx, "capture already recorded").await;
                return Ok(Outcome::AlreadyProcessed);
            }

            if capture.status == CaptureStatus::Completed {
                sqlx::query(
                    "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 AND status = $3",
                )
                .bind(&capture.order_id)
                .bind(OrderStatus::Captured.as_str())
                .bind(OrderStatus::Created.as_str())
                .execute(&mut *tx)
                .await
                .map_err(storage("update order status"))?;
            }

            tx.commit().await.map_err(storage("commit capture"))?;
            Ok(Outcome::Applied)
        })
    }

    fn record_refund<'a>(&'a self, refund: &'a RefundRecord) -> StoreFuture<'a, Outcome> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage("start transaction"))?;

            let order: Option<(String,)> =
                sqlx::query_as("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
                    .bind(&refund.order_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(storage("lock order"))?;
            if order.is_none() {
                abandon(tx, "unknown order").await;
                return Err(StoreError::NotFound {
                    resource: "order",
                    id: refund.order_id.clone(),
                });
            }

            let inserted = sqlx::query(
                r"
                INSERT INTO refunds (id, capture_id, order_id, amount_cents, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(&refund.id)
            .bind(&refund.capture_id)
            .bind(&refund.order_id)
            .bind(refund.amount_cents)
            .bind(refund.created_at)
            .execute(&mut *tx)
            .await
            .map_err(storage("insert refund"))?
            .rows_affected();

            if inserted == 0 {
                abandon(tx, "refund already recorded").await;
                return Ok(Outcome::AlreadyProcessed);
            }

            let filter = (!refund.line_item_ids.is_empty()).then(|| refund.line_item_ids.clone());
            let affected: Vec<(String, i64, Option<i64>, Option<DateTime<Utc>>)> = sqlx::query_as(
                r"
                SELECT id, quantity, effective_product_id, effective_trip_at
                FROM effective_line_items
                WHERE order_id = $1
                  AND status = $2
                  AND ($3::TEXT[] IS NULL OR id = ANY($3))
                ORDER BY seq
                ",
            )
            .bind(&refund.order_id)
            .bind(LineItemStatus::Active.as_str())
            .bind(filter)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage("load refunded items"))?;

            let refunded_ids: Vec<String> = affected.iter().map(|(id, ..)| id.clone()).collect();
            sqlx::query("UPDATE line_items SET status = $2 WHERE id = ANY($1)")
                .bind(&refunded_ids)
                .bind(LineItemStatus::Refunded.as_str())
                .execute(&mut *tx)
                .await
                .map_err(storage("mark items refunded"))?;

            for (_, qty, product_id, trip_at) in &affected {
                if let (Some(product_id), Some(trip_at)) = (product_id, trip_at) {
                    apply_delta(
                        &mut tx,
                        Slot::new(*product_id, *trip_at),
                        *qty,
                        self.default_capacity,
                    )
                    .await?;
                }
            }

            sqlx::query("UPDATE refunds SET line_item_ids = $2 WHERE id = $1")
                .bind(&refund.id)
                .bind(&refunded_ids)
                .execute(&mut *tx)
                .await
                .map_err(storage("store refunded items"))?;

            let order_refunded = sqlx::query(
                r"
                UPDATE orders SET status = $2, updated_at = now()
                WHERE id = $1
                  AND NOT EXISTS (
                      SELECT 1 FROM line_items WHERE order_id = $1 AND status <> $3
                  )
                ",
            )
            .bind(&refund.order_id)
            .bind(OrderStatus::Refunded.as_str())
            .bind(LineItemStatus::Refunded.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage("mark order refunded"))?
            .rows_affected()
                > 0;

            if order_refunded {
                sqlx::query("UPDATE captures SET status = $2, updated_at = $3 WHERE id = $1")
                    .bind(&refund.capture_id)
                    .bind(CaptureStatus::Refunded.as_str())
                    .bind(refund.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(storage("mark capture refunded"))?;
            }

            tx.commit().await.map_err(storage("commit refund"))?;
            Ok(Outcome::Applied)
        })
    }

    fn find_order<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, Option<Order>> {
        Box::pin(async move {
            let row: Option<OrderRow> = sqlx::query_as(
                r"
                SELECT id, merchant_id, status, source, payer_id, payer_name, payer_email, payer_phone, created_at
                FROM orders
                WHERE id = $1
                ",
            )
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("load order"))?;

            let Some((id, merchant_id, status, source, payer_id, payer_name, payer_email, payer_phone, created_at)) =
                row
            else {
                return Ok(None);
            };

            let items: Vec<ItemRow> = sqlx::query_as(
                r"
                SELECT id, order_id, effective_sku, effective_name, sku, name,
                       unit_amount_cents, quantity, description, status
                FROM effective_line_items
                WHERE order_id = $1
                ORDER BY seq
                ",
            )
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("load line items"))?;

            let captures: Vec<CaptureRow> = sqlx::query_as(
                r"
                SELECT id, order_id, status, amount_cents, currency, created_at, updated_at
                FROM captures
                WHERE order_id = $1
                ORDER BY created_at, id
                ",
            )
            .bind(order_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("load captures"))?;

            Ok(Some(Order {
                status: OrderStatus::parse(&status).ok_or_else(|| corrupt("order status", &status))?,
                source: OrderSource::parse(&source).ok_or_else(|| corrupt("order source", &source))?,
                id,
                merchant_id,
                payer: Payer {
                    id: payer_id,
                    name: payer_name,
                    email: payer_email,
                    phone: payer_phone,
                },
                line_items: items.into_iter().map(line_item).collect::<Result<_, _>>()?,
                captures: captures.into_iter().map(capture).collect::<Result<_, _>>()?,
                created_at,
            }))
        })
    }

    fn find_capture_order<'a>(&'a self, capture_id: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let row: Option<(String,)> = sqlx::query_as("SELECT order_id FROM captures WHERE id = $1")
                .bind(capture_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage("load capture"))?;
            Ok(row.map(|(order_id,)| order_id))
        })
    }

    fn sold_tickets<'a>(
        &'a self,
        merchant_id: &'a str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<SoldTickets>> {
        Box::pin(async move {
            let rows: Vec<(i64, DateTime<Utc>, i64)> = sqlx::query_as(
                r"
                SELECT li.effective_product_id, li.effective_trip_at, SUM(li.quantity)::BIGINT
                FROM effective_line_items li
                JOIN orders o ON o.id = li.order_id
                WHERE o.merchant_id = $1
                  AND o.status <> $2
                  AND li.status = $3
                  AND li.effective_product_id IS NOT NULL
                  AND li.effective_trip_at >= $4
                  AND li.effective_trip_at < $5
                GROUP BY li.effective_product_id, li.effective_trip_at
                ORDER BY li.effective_product_id, li.effective_trip_at
                ",
            )
            .bind(merchant_id)
            .bind(OrderStatus::Refunded.as_str())
            .bind(LineItemStatus::Active.as_str())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("aggregate sold tickets"))?;

            Ok(rows
                .into_iter()
                .map(|(product_id, trip_at, quantity)| SoldTickets {
                    product_id,
                    trip_at,
                    quantity,
                })
                .collect())
        })
    }

    fn orders_at_slot<'a>(
        &'a self,
        merchant_id: &'a str,
        trip_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<OrderSummary>> {
        Box::pin(async move {
            let rows: Vec<sqlx::postgres::PgRow> = sqlx::query(
                r"
                SELECT o.id AS order_id, li.id AS line_item_id, o.status AS order_status,
                       li.status AS item_status, li.effective_sku, li.effective_name,
                       li.sku, li.name, li.description, li.unit_amount_cents, li.quantity,
                       o.payer_id, o.payer_name, o.payer_email, o.payer_phone
                FROM effective_line_items li
                JOIN orders o ON o.id = li.order_id
                WHERE o.merchant_id = $1 AND li.effective_trip_at = $2
                ORDER BY o.created_at, o.id, li.seq
                ",
            )
            .bind(merchant_id)
            .bind(trip_at)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("load orders at slot"))?;

            rows.iter().map(summary).collect()
        })
    }

    fn apply_transfer<'a>(
        &'a self,
        merchant_id: &'a str,
        request: &'a TransferRequest,
        policy: CapacityPolicy,
        applied_at: DateTime<Utc>,
    ) -> TransferFuture<'a> {
        Box::pin(crate::transfer::apply(self, merchant_id, request, policy, applied_at))
    }

    fn transfer_history<'a>(
        &'a self,
        line_item_id: &'a str,
    ) -> StoreFuture<'a, Vec<TransferRecord>> {
        Box::pin(crate::transfer::history(self, line_item_id))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(storage("reach database"))?;
            Ok(())
        })
    }
}

/// Inserts a capture unless its id is known. Returns whether a row was written.
async fn insert_capture(
    conn: &mut sqlx::PgConnection,
    capture: &Capture,
    order_id: &str,
) -> Result<bool, StoreError> {
    let inserted = sqlx::query(
        r"
        INSERT INTO captures (id, order_id, status, amount_cents, currency, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        ",
    )
    .bind(&capture.id)
    .bind(order_id)
    .bind(capture.status.as_str())
    .bind(capture.amount_cents)
    .bind(&capture.currency)
    .bind(capture.created_at)
    .bind(capture.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(storage("insert capture"))?
    .rows_affected();

    Ok(inserted > 0)
}

fn summary(row: &sqlx::postgres::PgRow) -> Result<OrderSummary, StoreError> {
    use sqlx::Row;

    let get = |e: sqlx::Error| StoreError::Storage(format!("Failed to read order summary: {e}"));
    let order_status: String = row.try_get("order_status").map_err(get)?;
    let item_status: String = row.try_get("item_status").map_err(get)?;

    Ok(OrderSummary {
        order_id: row.try_get("order_id").map_err(get)?,
        line_item_id: row.try_get("line_item_id").map_err(get)?,
        order_status: OrderStatus::parse(&order_status)
            .ok_or_else(|| corrupt("order status", &order_status))?,
        item_status: LineItemStatus::parse(&item_status)
            .ok_or_else(|| corrupt("line item status", &item_status))?,
        sku: row.try_get("effective_sku").map_err(get)?,
        name: row.try_get("effective_name").map_err(get)?,
        original_sku: row.try_get("sku").map_err(get)?,
        original_name: row.try_get("name").map_err(get)?,
        description: row.try_get("description").map_err(get)?,
        unit_amount_cents: row.try_get("unit_amount_cents").map_err(get)?,
        quantity: quantity(row.try_get("quantity").map_err(get)?)?,
        payer: Payer {
            id: row.try_get("payer_id").map_err(get)?,
            name: row.try_get("payer_name").map_err(get)?,
            email: row.try_get("payer_email").map_err(get)?,
            phone: row.try_get("payer_phone").map_err(get)?,
        },
    })
}
