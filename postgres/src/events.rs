//! Webhook delivery log.

use crate::{PostgresStore, storage};
use slotledger_core::store::{EventRecord, EventStatus, StoreError, StoreFuture, WebhookEvent, WebhookEventLog};

impl WebhookEventLog for PostgresStore {
    fn record<'a>(
        &'a self,
        event: &'a WebhookEvent,
        status: EventStatus,
    ) -> StoreFuture<'a, EventRecord> {
        Box::pin(async move {
            let inserted: Option<(i64,)> = sqlx::query_as(
                r"
                INSERT INTO webhook_events
                    (provider, merchant_id, event_id, event_type, resource_type, resource_id, status, body, received_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (provider, event_id) DO NOTHING
                RETURNING id
                ",
            )
            .bind(event.provider.as_str())
            .bind(&event.merchant_id)
            .bind(event.event_id.as_deref())
            .bind(event.event_type.as_deref())
            .bind(event.resource_type.as_deref())
            .bind(event.resource_id.as_deref())
            .bind(status.as_str())
            .bind(&event.body)
            .bind(event.received_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage("log webhook event"))?;

            if let Some((log_id,)) = inserted {
                return Ok(EventRecord {
                    log_id,
                    previous: None,
                });
            }

            let (log_id, previous): (i64, String) = sqlx::query_as(
                r"
                UPDATE webhook_events
                SET attempts = attempts + 1, updated_at = now()
                WHERE provider = $1 AND event_id = $2
                RETURNING id, status
                ",
            )
            .bind(event.provider.as_str())
            .bind(event.event_id.as_deref())
            .fetch_one(&self.pool)
            .await
            .map_err(storage("load logged webhook event"))?;

            let previous = EventStatus::parse(&previous).ok_or_else(|| {
                StoreError::Storage(format!("Invalid event status in database: {previous}"))
            })?;
            tracing::debug!(log_id, previous = previous.as_str(), "Webhook redelivered");

            Ok(EventRecord {
                log_id,
                previous: Some(previous),
            })
        })
    }

    fn set_status<'a>(
        &'a self,
        log_id: i64,
        status: EventStatus,
        error: Option<&'a str>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let updated = sqlx::query(
                "UPDATE webhook_events SET status = $2, error = $3, updated_at = now() WHERE id = $1",
            )
            .bind(log_id)
            .bind(status.as_str())
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(storage("update webhook event"))?
            .rows_affected();

            if updated == 0 {
                return Err(StoreError::NotFound {
                    resource: "webhook event",
                    id: log_id.to_string(),
                });
            }
            Ok(())
        })
    }
}
