//! Slot codec.
//!
//! A sellable unit (one product, one ticket category, one departure instant)
//! travels through the payment providers as a line-item SKU:
//!
//! ```text
//! <product id><CATEGORY><10-digit epoch seconds>[<sequence>]
//!     12          AM         1700000000              3
//! ```
//!
//! Every component that needs to know which slot a line item belongs to goes
//! through [`decode`]. Nothing else in the workspace parses a SKU.
//!
//! Items that carry no slot (service fees, gift cards) are recognised by
//! [`classify`] and must be treated as ordinary non-slot items, never as errors.

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// SKU prefixes reserved for items that never touch the capacity ledger.
pub const NON_SLOT_PREFIXES: [&str; 2] = ["GIFT", "SVCFEE"];

/// Line-item name reserved for the booking fee row.
pub const FEE_ITEM_NAME: &str = "Fees";

/// Largest instant representable in the fixed 10-digit epoch field.
const MAX_EPOCH_SECONDS: i64 = 9_999_999_999;

#[allow(clippy::expect_used)]
static SKU_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)([A-Z]+)(\d{10})\d*$").expect("SKU pattern is a valid literal")
});

/// Errors produced when a SKU does not have the slot shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The SKU is not `<digits><LETTERS><10 digits>[digits]`.
    #[error("Malformed slot SKU: {sku:?}")]
    Malformed {
        /// The rejected SKU.
        sku: String,
    },
}

/// Errors produced when building a [`SlotKey`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Category is empty or contains something other than ASCII letters.
    #[error("Invalid ticket category: {0:?}")]
    InvalidCategory(String),

    /// Product ids are non-negative.
    #[error("Invalid product id: {0}")]
    NegativeProductId(i64),

    /// Instant does not fit the 10-digit epoch field.
    #[error("Trip instant out of range: {0}")]
    TimestampOutOfRange(DateTime<Utc>),
}

/// Ledger key: one product departing at one instant.
///
/// The category is deliberately not part of the key. All categories of a
/// departure share its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    /// Product (boat, show, tour) identifier.
    pub product_id: i64,
    /// Departure instant, whole seconds.
    pub trip_at: DateTime<Utc>,
}

impl Slot {
    /// Creates a slot key, truncating sub-second precision.
    #[must_use]
    pub fn new(product_id: i64, trip_at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            trip_at: trip_at.trunc_subsecs(0),
        }
    }

    /// Creates a slot from epoch seconds.
    #[must_use]
    pub fn from_epoch(product_id: i64, epoch_seconds: i64) -> Option<Self> {
        DateTime::from_timestamp(epoch_seconds, 0).map(|trip_at| Self { product_id, trip_at })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.product_id, self.trip_at.timestamp())
    }
}

/// Decoded SKU: product, ticket category and departure instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    product_id: i64,
    category: String,
    trip_at: DateTime<Utc>,
}

impl SlotKey {
    /// Builds a validated key.
    ///
    /// The category is upper-cased; sub-second precision is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] for a negative product id, a category that is not
    /// purely alphabetic, or an instant outside the 10-digit epoch range.
    pub fn new(
        product_id: i64,
        category: impl AsRef<str>,
        trip_at: DateTime<Utc>,
    ) -> Result<Self, EncodeError> {
        if product_id < 0 {
            return Err(EncodeError::NegativeProductId(product_id));
        }

        let category = category.as_ref().to_ascii_uppercase();
        if category.is_empty() || !category.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(EncodeError::InvalidCategory(category));
        }

        let epoch = trip_at.timestamp();
        if !(0..=MAX_EPOCH_SECONDS).contains(&epoch) {
            return Err(EncodeError::TimestampOutOfRange(trip_at));
        }

        Ok(Self {
            product_id,
            category,
            trip_at: trip_at.trunc_subsecs(0),
        })
    }

    /// Product identifier.
    #[must_use]
    pub const fn product_id(&self) -> i64 {
        self.product_id
    }

    /// Upper-case ticket category (e.g. `AM`, `ADULT`).
    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Departure instant.
    #[must_use]
    pub const fn trip_at(&self) -> DateTime<Utc> {
        self.trip_at
    }

    /// The ledger key this SKU draws capacity from.
    #[must_use]
    pub const fn slot(&self) -> Slot {
        Slot {
            product_id: self.product_id,
            trip_at: self.trip_at,
        }
    }

    /// Renders the SKU, optionally followed by a disambiguating sequence number.
    #[must_use]
    pub fn to_sku(&self, seq: Option<u32>) -> String {
        let mut sku = format!(
            "{}{}{:010}",
            self.product_id,
            self.category,
            self.trip_at.timestamp()
        );
        if let Some(seq) = seq {
            sku.push_str(&seq.to_string());
        }
        sku
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sku(None))
    }
}

/// Encodes a slot as a SKU.
///
/// # Errors
///
/// Returns [`EncodeError`] when the parts cannot form a valid [`SlotKey`].
pub fn encode(
    product_id: i64,
    category: &str,
    trip_at: DateTime<Utc>,
    seq: Option<u32>,
) -> Result<String, EncodeError> {
    SlotKey::new(product_id, category, trip_at).map(|key| key.to_sku(seq))
}

/// Decodes a SKU into its slot key. Trailing sequence digits are discarded.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] for anything that is not a slot SKU,
/// including fee and gift-card SKUs.
pub fn decode(sku: &str) -> Result<SlotKey, DecodeError> {
    let malformed = || DecodeError::Malformed {
        sku: sku.to_string(),
    };

    let caps = SKU_PATTERN.captures(sku).ok_or_else(malformed)?;
    let product_id: i64 = caps[1].parse().map_err(|_| malformed())?;
    let epoch: i64 = caps[3].parse().map_err(|_| malformed())?;
    let trip_at = DateTime::from_timestamp(epoch, 0).ok_or_else(malformed)?;

    Ok(SlotKey {
        product_id,
        category: caps[2].to_string(),
        trip_at,
    })
}

/// What a line item means to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    /// Ticket for a slot; sales and refunds move capacity.
    Slot(SlotKey),
    /// Fee, gift card or anything else without a slot.
    NonSlot,
}

impl ItemKind {
    /// The slot key, if any.
    #[must_use]
    pub const fn slot_key(&self) -> Option<&SlotKey> {
        match self {
            Self::Slot(key) => Some(key),
            Self::NonSlot => None,
        }
    }
}

/// Returns `true` when the SKU or item name is reserved for non-slot items.
#[must_use]
pub fn is_reserved_non_slot(sku: &str, name: &str) -> bool {
    name == FEE_ITEM_NAME || NON_SLOT_PREFIXES.iter().any(|p| sku.starts_with(p))
}

/// Classifies a line item by SKU and display name.
#[must_use]
pub fn classify(sku: &str, name: &str) -> ItemKind {
    if is_reserved_non_slot(sku, name) {
        return ItemKind::NonSlot;
    }
    decode(sku).map_or(ItemKind::NonSlot, ItemKind::Slot)
}
