//! Ticket transfers between slots.
//!
//! A transfer moves a line item's tickets to another slot without a new
//! payment. Transfer records are append-only; a line item's effective SKU is
//! the target of its most recent transfer, or the original SKU if it has
//! none. Chained transfers therefore always release capacity where the
//! tickets currently are, not where they were first sold.

use crate::codec::{self, DecodeError, SlotKey};
use crate::ledger::CapacityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from applying a transfer. The whole transfer fails together.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Effective or requested SKU is not a slot SKU.
    #[error("Cannot transfer {sku:?}: {source}")]
    InvalidSku {
        /// Offending SKU.
        sku: String,
        /// Codec failure.
        #[source]
        source: DecodeError,
    },

    /// No such line item for this merchant.
    #[error("Line item {0} not found")]
    LineItemNotFound(String),

    /// Refunded tickets cannot move.
    #[error("Line item {0} is refunded")]
    LineItemRefunded(String),

    /// Destination slot has no room (floor policy only).
    #[error(transparent)]
    Capacity(CapacityError),

    /// Backend failure; nothing was applied.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<CapacityError> for TransferError {
    fn from(err: CapacityError) -> Self {
        match err {
            CapacityError::Storage(msg) => Self::Storage(msg),
            other => Self::Capacity(other),
        }
    }
}

/// Operator request to move a line item to another slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Line item to move.
    pub line_item_id: String,
    /// SKU the operator saw. Informational; the stored effective SKU wins.
    #[serde(default)]
    pub old_sku: Option<String>,
    /// Destination SKU.
    pub new_sku: String,
    /// Optional new display name.
    #[serde(default)]
    pub new_name: Option<String>,
}

impl TransferRequest {
    /// `true` when the operator named an old SKU other than the effective one.
    #[must_use]
    pub fn is_stale_against(&self, effective_sku: &str) -> bool {
        self.old_sku.as_deref().is_some_and(|old| old != effective_sku)
    }
}

/// Applied transfer, as kept in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Log sequence number.
    pub id: i64,
    /// Line item moved.
    pub line_item_id: String,
    /// Effective SKU before the move.
    pub old_sku: String,
    /// Effective SKU after the move.
    pub new_sku: String,
    /// New display name, if changed.
    pub new_name: Option<String>,
    /// Tickets moved.
    pub quantity: u32,
    /// When it was applied.
    pub applied_at: DateTime<Utc>,
}

/// Decoded transfer, ready for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Line item moved.
    pub line_item_id: String,
    /// Tickets moved.
    pub quantity: u32,
    /// Effective SKU before the move.
    pub from_sku: String,
    /// Origin slot key.
    pub from: SlotKey,
    /// Destination SKU.
    pub to_sku: String,
    /// Destination slot key.
    pub to: SlotKey,
    /// New display name.
    pub new_name: Option<String>,
}

impl TransferPlan {
    /// Decodes both ends of a transfer.
    ///
    /// # Errors
    ///
    /// [`TransferError::InvalidSku`] if either SKU is not a slot SKU.
    pub fn new(
        effective_sku: &str,
        request: &TransferRequest,
        quantity: u32,
    ) -> Result<Self, TransferError> {
        let decode = |sku: &str| {
            codec::decode(sku).map_err(|source| TransferError::InvalidSku {
                sku: sku.to_string(),
                source,
            })
        };

        Ok(Self {
            line_item_id: request.line_item_id.clone(),
            quantity,
            from: decode(effective_sku)?,
            from_sku: effective_sku.to_string(),
            to: decode(&request.new_sku)?,
            to_sku: request.new_sku.clone(),
            new_name: request.new_name.clone(),
        })
    }

    /// Record to append once the ledger moves succeed.
    #[must_use]
    pub fn into_record(self, id: i64, applied_at: DateTime<Utc>) -> TransferRecord {
        TransferRecord {
            id,
            line_item_id: self.line_item_id,
            old_sku: self.from_sku,
            new_sku: self.to_sku,
            new_name: self.new_name,
            quantity: self.quantity,
            applied_at,
        }
    }
}
