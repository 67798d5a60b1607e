//! Capacity ledger contract.
//!
//! The ledger keeps one counter per [`Slot`]: how many seats are left, plus an
//! operator-set cancellation flag. Sales decrement it, refunds increment it,
//! transfers do both.
//!
//! # Two decrement modes
//!
//! - [`CapacityLedger::decrement`] is a blind signed delta. The row is created
//!   with the default capacity if missing and the counter may go below zero.
//!   It is a counter, not a reservation gate.
//! - [`CapacityLedger::decrement_if_available`] is a single conditional update
//!   that refuses to cross zero or to sell into a cancelled slot.
//!
//! [`CapacityPolicy`] lets order and transfer writes pick one.

use crate::codec::Slot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// Conditional decrement found too few seats.
    #[error("Insufficient capacity at {slot}: requested {requested}, available {available}")]
    Insufficient {
        /// Slot that was short.
        slot: Slot,
        /// Seats asked for.
        requested: u32,
        /// Seats left at the time of the check.
        available: i64,
    },

    /// Conditional decrement hit a cancelled slot.
    #[error("Slot {0} is cancelled")]
    Cancelled(Slot),

    /// Backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Remaining capacity for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityEntry {
    /// Ledger key.
    pub slot: Slot,
    /// Seats left. Negative only after an uncorrected blind oversell.
    pub available: i64,
    /// Operator cancellation flag, independent of the counter.
    pub cancelled: bool,
}

impl CapacityEntry {
    /// A fresh row as it would be created lazily.
    #[must_use]
    pub const fn new(slot: Slot, default_capacity: i64) -> Self {
        Self {
            slot,
            available: default_capacity,
            cancelled: false,
        }
    }

    /// Applies a signed delta without any check.
    pub const fn apply_delta(&mut self, delta: i64) {
        self.available += delta;
    }

    /// Takes `quantity` seats if the slot is open and has room.
    ///
    /// # Errors
    ///
    /// [`CapacityError::Cancelled`] or [`CapacityError::Insufficient`]; the
    /// entry is left untouched on error.
    pub fn try_take(&mut self, quantity: u32) -> Result<(), CapacityError> {
        if self.cancelled {
            return Err(CapacityError::Cancelled(self.slot));
        }
        let requested = i64::from(quantity);
        if self.available < requested {
            return Err(CapacityError::Insufficient {
                slot: self.slot,
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= requested;
        Ok(())
    }

    /// `true` once a blind decrement pushed the counter below zero.
    #[must_use]
    pub const fn is_oversold(&self) -> bool {
        self.available < 0
    }
}

/// Which decrement a write path uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Blind delta; oversells are recorded and flagged.
    #[default]
    Blind,
    /// Conditional decrement with a zero floor.
    Floor,
}

/// Boxed future returned by ledger operations.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CapacityError>> + Send + 'a>>;

/// Durable per-slot capacity counters.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the ledger can be shared as
/// `Arc<dyn CapacityLedger>`.
pub trait CapacityLedger: Send + Sync {
    /// Subtracts `quantity` seats; creates the row if absent.
    ///
    /// # Errors
    ///
    /// Only [`CapacityError::Storage`].
    fn decrement(&self, slot: Slot, quantity: u32) -> LedgerFuture<'_, CapacityEntry>;

    /// Adds `quantity` seats back; creates the row if absent.
    ///
    /// # Errors
    ///
    /// Only [`CapacityError::Storage`].
    fn increment(&self, slot: Slot, quantity: u32) -> LedgerFuture<'_, CapacityEntry>;

    /// Subtracts `quantity` seats only if that leaves the counter at zero or above.
    ///
    /// # Errors
    ///
    /// [`CapacityError::Insufficient`] or [`CapacityError::Cancelled`] when the
    /// check fails; [`CapacityError::Storage`] on backend failure.
    fn decrement_if_available(&self, slot: Slot, quantity: u32)
    -> LedgerFuture<'_, CapacityEntry>;

    /// Sets the operator cancellation flag.
    ///
    /// # Errors
    ///
    /// Only [`CapacityError::Storage`].
    fn set_cancelled(&self, slot: Slot, cancelled: bool) -> LedgerFuture<'_, CapacityEntry>;

    /// Operator override of the remaining seat count.
    ///
    /// # Errors
    ///
    /// Only [`CapacityError::Storage`].
    fn set_available(&self, slot: Slot, available: i64) -> LedgerFuture<'_, CapacityEntry>;

    /// Current entry. A missing row reports the default capacity.
    ///
    /// # Errors
    ///
    /// Only [`CapacityError::Storage`].
    fn get(&self, slot: Slot) -> LedgerFuture<'_, CapacityEntry>;

    /// Stored entries with `from <= trip_at < to`, optionally for one product,
    /// ordered by product then instant.
    ///
    /// # Errors
    ///
    /// Only [`CapacityError::Storage`].
    fn list(
        &self,
        product_id: Option<i64>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerFuture<'_, Vec<CapacityEntry>>;
}
