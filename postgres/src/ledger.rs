//! Capacity ledger on `capacity_entries`.
//!
//! Every mutation is a single statement. The row lock taken by the upsert
//! serialises concurrent writers on the same slot, so deltas commute and none
//! is lost. The helpers take a bare connection so order, refund and transfer
//! writes can run them inside their own transaction.

use crate::PostgresStore;
use chrono::{DateTime, Utc};
use slotledger_core::codec::Slot;
use slotledger_core::ledger::{
    CapacityEntry, CapacityError, CapacityLedger, CapacityPolicy, LedgerFuture,
};
use sqlx::PgConnection;

type EntryRow = (i64, DateTime<Utc>, i64, bool);

fn entry(row: EntryRow) -> CapacityEntry {
    let (product_id, trip_at, available, cancelled) = row;
    CapacityEntry {
        slot: Slot::new(product_id, trip_at),
        available,
        cancelled,
    }
}

fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> CapacityError {
    move |e| CapacityError::Storage(format!("Failed to {context}: {e}"))
}

/// Adds `delta` to the slot's counter, creating the row at the default first.
pub(crate) async fn apply_delta(
    conn: &mut PgConnection,
    slot: Slot,
    delta: i64,
    default_capacity: i64,
) -> Result<CapacityEntry, CapacityError> {
    let row: EntryRow = sqlx::query_as(
        r"
        INSERT INTO capacity_entries (product_id, trip_at, available)
        VALUES ($1, $2, $3 + $4)
        ON CONFLICT (product_id, trip_at)
        DO UPDATE SET available = capacity_entries.available + $4, updated_at = now()
        RETURNING product_id, trip_at, available, cancelled
        ",
    )
    .bind(slot.product_id)
    .bind(slot.trip_at)
    .bind(default_capacity)
    .bind(delta)
    .fetch_one(&mut *conn)
    .await
    .map_err(storage("apply capacity delta"))?;

    Ok(entry(row))
}

/// Conditional decrement: succeeds only if the slot is open and keeps a
/// non-negative count afterwards.
pub(crate) async fn take_if_available(
    conn: &mut PgConnection,
    slot: Slot,
    quantity: u32,
    default_capacity: i64,
) -> Result<CapacityEntry, CapacityError> {
    sqlx::query(
        r"
        INSERT INTO capacity_entries (product_id, trip_at, available)
        VALUES ($1, $2, $3)
        ON CONFLICT (product_id, trip_at) DO NOTHING
        ",
    )
    .bind(slot.product_id)
    .bind(slot.trip_at)
    .bind(default_capacity)
    .execute(&mut *conn)
    .await
    .map_err(storage("seed capacity entry"))?;

    let taken: Option<EntryRow> = sqlx::query_as(
        r"
        UPDATE capacity_entries
        SET available = available - $3, updated_at = now()
        WHERE product_id = $1 AND trip_at = $2 AND available >= $3 AND NOT cancelled
        RETURNING product_id, trip_at, available, cancelled
        ",
    )
    .bind(slot.product_id)
    .bind(slot.trip_at)
    .bind(i64::from(quantity))
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage("decrement capacity"))?;

    if let Some(row) = taken {
        return Ok(entry(row));
    }

    let current = select(conn, slot)
        .await?
        .unwrap_or_else(|| CapacityEntry::new(slot, default_capacity));
    if current.cancelled {
        Err(CapacityError::Cancelled(slot))
    } else {
        Err(CapacityError::Insufficient {
            slot,
            requested: quantity,
            available: current.available,
        })
    }
}

/// Decrement according to `policy`.
pub(crate) async fn consume(
    conn: &mut PgConnection,
    slot: Slot,
    quantity: u32,
    policy: CapacityPolicy,
    default_capacity: i64,
) -> Result<CapacityEntry, CapacityError> {
    match policy {
        CapacityPolicy::Floor => take_if_available(conn, slot, quantity, default_capacity).await,
        CapacityPolicy::Blind => {
            let entry = apply_delta(conn, slot, -i64::from(quantity), default_capacity).await?;
            if entry.is_oversold() {
                tracing::warn!(
                    slot = %slot,
                    available = entry.available,
                    "Slot oversold"
                );
            }
            Ok(entry)
        }
    }
}

async fn select(conn: &mut PgConnection, slot: Slot) -> Result<Option<CapacityEntry>, CapacityError> {
    let row: Option<EntryRow> = sqlx::query_as(
        r"
        SELECT product_id, trip_at, available, cancelled
        FROM capacity_entries
        WHERE product_id = $1 AND trip_at = $2
        ",
    )
    .bind(slot.product_id)
    .bind(slot.trip_at)
    .fetch_optional(&mut *conn)
    .await
    .map_err(storage("load capacity entry"))?;

    Ok(row.map(entry))
}

impl CapacityLedger for PostgresStore {
    fn decrement(&self, slot: Slot, quantity: u32) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(storage("acquire connection"))?;
            apply_delta(&mut conn, slot, -i64::from(quantity), self.default_capacity).await
        })
    }

    fn increment(&self, slot: Slot, quantity: u32) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(storage("acquire connection"))?;
            apply_delta(&mut conn, slot, i64::from(quantity), self.default_capacity).await
        })
    }

    fn decrement_if_available(
        &self,
        slot: Slot,
        quantity: u32,
    ) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(storage("start transaction"))?;
            let entry = take_if_available(&mut tx, slot, quantity, self.default_capacity).await?;
            tx.commit().await.map_err(storage("commit transaction"))?;
            Ok(entry)
        })
    }

    fn set_cancelled(&self, slot: Slot, cancelled: bool) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let row: EntryRow = sqlx::query_as(
                r"
                INSERT INTO capacity_entries (product_id, trip_at, available, cancelled)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (product_id, trip_at)
                DO UPDATE SET cancelled = EXCLUDED.cancelled, updated_at = now()
                RETURNING product_id, trip_at, available, cancelled
                ",
            )
            .bind(slot.product_id)
            .bind(slot.trip_at)
            .bind(self.default_capacity)
            .bind(cancelled)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("set cancellation"))?;

            Ok(entry(row))
        })
    }

    fn set_available(&self, slot: Slot, available: i64) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let row: EntryRow = sqlx::query_as(
                r"
                INSERT INTO capacity_entries (product_id, trip_at, available)
                VALUES ($1, $2, $3)
                ON CONFLICT (product_id, trip_at)
                DO UPDATE SET available = EXCLUDED.available, updated_at = now()
                RETURNING product_id, trip_at, available, cancelled
                ",
            )
            .bind(slot.product_id)
            .bind(slot.trip_at)
            .bind(available)
            .fetch_one(&self.pool)
            .await
            .map_err(storage("set capacity"))?;

            Ok(entry(row))
        })
    }

    fn get(&self, slot: Slot) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(storage("acquire connection"))?;
            Ok(select(&mut conn, slot)
                .await?
                .unwrap_or_else(|| CapacityEntry::new(slot, self.default_capacity)))
        })
    }

    fn list(
        &self,
        product_id: Option<i64>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerFuture<'_, Vec<CapacityEntry>> {
        Box::pin(async move {
            let rows: Vec<EntryRow> = sqlx::query_as(
                r"
                SELECT product_id, trip_at, available, cancelled
                FROM capacity_entries
                WHERE ($1::BIGINT IS NULL OR product_id = $1)
                  AND trip_at >= $2 AND trip_at < $3
                ORDER BY product_id, trip_at
                ",
            )
            .bind(product_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(storage("list capacity"))?;

            Ok(rows.into_iter().map(entry).collect())
        })
    }
}
