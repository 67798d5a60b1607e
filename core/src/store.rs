//! Repository contracts.
//!
//! All mutation of orders, captures, refunds, transfers and the ledger goes
//! through these traits. Each mutating call is one atomic unit in the
//! backend: the insert-if-absent on the resource id and its ledger side
//! effects commit together or not at all. Two concurrent deliveries of the
//! same resource therefore produce exactly one [`Outcome::Applied`].
//!
//! # Implementations
//!
//! - `PostgresStore` (in `slotledger-postgres`): production
//! - `InMemoryStore` (in `slotledger-testing`): tests

use crate::ledger::{CapacityError, CapacityPolicy};
use crate::merchant::PaymentType;
use crate::order::{Capture, NewOrder, Order, OrderSummary, Outcome, RefundRecord, SoldTickets};
use crate::transfer::{TransferError, TransferRecord, TransferRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from order storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced row does not exist.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of row.
        resource: &'static str,
        /// Its id.
        id: String,
    },

    /// Floor-checked decrement failed; nothing was written.
    #[error(transparent)]
    Capacity(CapacityError),

    /// Backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<CapacityError> for StoreError {
    fn from(err: CapacityError) -> Self {
        match err {
            CapacityError::Storage(msg) => Self::Storage(msg),
            other => Self::Capacity(other),
        }
    }
}

/// Boxed future returned by [`OrderStore`] and [`WebhookEventLog`].
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Boxed future returned by [`OrderStore::apply_transfer`].
pub type TransferFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransferRecord, TransferError>> + Send + 'a>>;

/// Orders, captures, refunds and transfers.
pub trait OrderStore: Send + Sync {
    /// Inserts an order with its line items and captures, and decrements the
    /// ledger once per slot item. A known order id is a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::Capacity`] when `policy` is [`CapacityPolicy::Floor`] and
    /// a slot lacks room; [`StoreError::Storage`] on backend failure.
    fn record_order<'a>(&'a self, order: &'a NewOrder, policy: CapacityPolicy)
    -> StoreFuture<'a, Outcome>;

    /// Inserts a capture under an existing order. A known capture id is a
    /// no-op. A completed capture moves a `created` order to `captured`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the order is unknown.
    fn record_capture<'a>(&'a self, capture: &'a Capture) -> StoreFuture<'a, Outcome>;

    /// Inserts a refund, marks its line items refunded, increments the ledger
    /// for each slot item at its effective slot, marks the capture refunded
    /// and the order refunded once no active item remains. A known refund id
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the order is unknown.
    fn record_refund<'a>(&'a self, refund: &'a RefundRecord) -> StoreFuture<'a, Outcome>;

    /// Loads an order with effective line items.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] on backend failure.
    fn find_order<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, Option<Order>>;

    /// Order id owning a capture.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] on backend failure.
    fn find_capture_order<'a>(&'a self, capture_id: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Active slot tickets per effective slot with `from <= trip_at < to`,
    /// excluding refunded orders and items.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] on backend failure.
    fn sold_tickets<'a>(
        &'a self,
        merchant_id: &'a str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<SoldTickets>>;

    /// Every line item whose effective slot departs at `trip_at`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] on backend failure.
    fn orders_at_slot<'a>(
        &'a self,
        merchant_id: &'a str,
        trip_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<OrderSummary>>;

    /// Moves a line item to another slot: increments its effective slot,
    /// decrements the destination and appends the transfer record, atomically.
    ///
    /// # Errors
    ///
    /// See [`TransferError`]; on any error nothing is written.
    fn apply_transfer<'a>(
        &'a self,
        merchant_id: &'a str,
        request: &'a TransferRequest,
        policy: CapacityPolicy,
        applied_at: DateTime<Utc>,
    ) -> TransferFuture<'a>;

    /// Transfer log for a line item, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] on backend failure.
    fn transfer_history<'a>(&'a self, line_item_id: &'a str)
    -> StoreFuture<'a, Vec<TransferRecord>>;

    /// Backend liveness check.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] when the backend is unreachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Processing state of a logged webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Logged, processing in progress.
    Received,
    /// State transition applied.
    Processed,
    /// Resource was already processed.
    Duplicate,
    /// Resource type not handled; kept for audit.
    Ignored,
    /// Signature check failed.
    NoVerify,
    /// Body could not be parsed.
    Malformed,
    /// Processing failed; provider will retry.
    Failed,
}

impl EventStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::Ignored => "ignored",
            Self::NoVerify => "no verify",
            Self::Malformed => "malformed",
            Self::Failed => "failed",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "processed" => Some(Self::Processed),
            "duplicate" => Some(Self::Duplicate),
            "ignored" => Some(Self::Ignored),
            "no verify" => Some(Self::NoVerify),
            "malformed" => Some(Self::Malformed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// A redelivery of an event in this state needs no further work.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Processed | Self::Duplicate | Self::Ignored)
    }
}

/// One inbound webhook delivery, raw body included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider that sent it.
    pub provider: PaymentType,
    /// Merchant endpoint it arrived on.
    pub merchant_id: String,
    /// Provider event id. `None` for unverified or unparseable deliveries.
    pub event_id: Option<String>,
    /// Provider event type.
    pub event_type: Option<String>,
    /// Provider resource type.
    pub resource_type: Option<String>,
    /// Provider resource id.
    pub resource_id: Option<String>,
    /// Raw body, kept for replay.
    pub body: String,
    /// Arrival time.
    pub received_at: DateTime<Utc>,
}

/// Result of logging a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Log row id.
    pub log_id: i64,
    /// Status of an earlier delivery of the same event id.
    pub previous: Option<EventStatus>,
}

/// Audit log of webhook deliveries.
pub trait WebhookEventLog: Send + Sync {
    /// Logs a delivery. Events with an id are inserted once per
    /// `(provider, event_id)`; a redelivery returns the existing row and its
    /// status in [`EventRecord::previous`] without changing it. Events
    /// without an id always get a new row.
    ///
    /// # Errors
    ///
    /// [`StoreError::Storage`] on backend failure.
    fn record<'a>(&'a self, event: &'a WebhookEvent, status: EventStatus)
    -> StoreFuture<'a, EventRecord>;

    /// Updates the processing status of a logged delivery.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for an unknown log id.
    fn set_status<'a>(
        &'a self,
        log_id: i64,
        status: EventStatus,
        error: Option<&'a str>,
    ) -> StoreFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Slot;

    #[test]
    fn event_status_round_trips() {
        for status in [
            EventStatus::Received,
            EventStatus::Processed,
            EventStatus::Duplicate,
            EventStatus::Ignored,
            EventStatus::NoVerify,
            EventStatus::Malformed,
            EventStatus::Failed,
        ] {
            assert_eq!(EventStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn settled_statuses() {
        assert!(EventStatus::Processed.is_settled());
        assert!(EventStatus::Ignored.is_settled());
        assert!(!EventStatus::Failed.is_settled());
        assert!(!EventStatus::NoVerify.is_settled());
    }

    #[test]
    fn capacity_errors_keep_their_kind() {
        let slot = Slot::new(1, Utc::now());
        let err: StoreError = CapacityError::Cancelled(slot).into();
        assert_eq!(err, StoreError::Capacity(CapacityError::Cancelled(slot)));
    }
}
