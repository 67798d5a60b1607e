//! Orders, line items, captures and refunds.
//!
//! An order is created the first time a provider tells us it was paid. Its
//! id is the provider's own order (or payment-intent) id. Line items belong
//! to exactly one order; captures and refunds hang off it one-to-many.

use crate::codec::{self, ItemKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of an insert-if-absent write.
///
/// Every state transition driven by a provider resource goes through one of
/// these; `AlreadyProcessed` means the resource id was seen before and no side
/// effect ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// First sighting; state and ledger were updated.
    Applied,
    /// Duplicate delivery; nothing changed.
    AlreadyProcessed,
}

impl Outcome {
    /// `true` for [`Outcome::Applied`].
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Storage representation.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            /// Parses the storage representation.
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Order lifecycle. Monotonic; `Refunded` is terminal.
    OrderStatus {
        /// Known but not yet paid.
        Created => "created",
        /// At least one completed capture.
        Captured => "captured",
        /// Every line item refunded.
        Refunded => "refunded",
    }
}

string_enum! {
    /// Per line item refund state.
    LineItemStatus {
        /// Sold and holding capacity.
        Active => "active",
        /// Refunded; capacity returned.
        Refunded => "refunded",
    }
}

string_enum! {
    /// Provider capture state.
    CaptureStatus {
        /// Funds not settled yet.
        Pending => "pending",
        /// Funds captured.
        Completed => "completed",
        /// Capture failed or was denied.
        Declined => "declined",
        /// Refunded after completion.
        Refunded => "refunded",
    }
}

string_enum! {
    /// Where an order came from.
    OrderSource {
        /// Hydrated from a payment provider.
        Provider => "provider",
        /// Phone or walk-up sale entered by staff.
        Manual => "manual",
    }
}

impl CaptureStatus {
    /// Maps a provider status string (`COMPLETED`, `succeeded`, ...).
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "completed" | "succeeded" | "paid" => Self::Completed,
            "refunded" | "partially_refunded" => Self::Refunded,
            "declined" | "denied" | "failed" | "canceled" | "voided" => Self::Declined,
            _ => Self::Pending,
        }
    }
}

/// Buyer contact details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    /// Provider payer id (or `manual`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Phone number, when provided.
    pub phone: Option<String>,
}

/// Line item as received from a provider, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    /// Stable line item id.
    pub id: String,
    /// SKU as sold.
    pub sku: String,
    /// Item name as sold.
    pub name: String,
    /// Unit price in cents.
    pub unit_amount_cents: i64,
    /// Tickets bought.
    pub quantity: u32,
    /// Free-text description.
    pub description: String,
}

impl NewLineItem {
    /// Ledger meaning of this item.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        codec::classify(&self.sku, &self.name)
    }
}

/// Payment capture under an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Provider capture id.
    pub id: String,
    /// Parent order id.
    pub order_id: String,
    /// Capture state.
    pub status: CaptureStatus,
    /// Amount in cents.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Provider creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// Order as fetched from a provider (or built for a manual entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    /// Provider order id.
    pub id: String,
    /// Owning merchant.
    pub merchant_id: String,
    /// Initial status.
    pub status: OrderStatus,
    /// Origin.
    pub source: OrderSource,
    /// Buyer.
    pub payer: Payer,
    /// Items sold.
    pub line_items: Vec<NewLineItem>,
    /// Captures already known at fetch time.
    pub captures: Vec<Capture>,
    /// Order creation time.
    pub created_at: DateTime<Utc>,
}

/// Stored line item, with transfers applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Line item id.
    pub id: String,
    /// Parent order.
    pub order_id: String,
    /// Effective SKU: the latest transfer's target, or the original.
    pub sku: String,
    /// Effective name.
    pub name: String,
    /// SKU as originally sold.
    pub original_sku: String,
    /// Name as originally sold.
    pub original_name: String,
    /// Unit price in cents.
    pub unit_amount_cents: i64,
    /// Tickets bought.
    pub quantity: u32,
    /// Free-text description.
    pub description: String,
    /// Refund state.
    pub status: LineItemStatus,
}

impl LineItem {
    /// Ledger meaning of the effective SKU.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        codec::classify(&self.sku, &self.name)
    }

    /// `unit_amount_cents * quantity`.
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.unit_amount_cents * i64::from(self.quantity)
    }
}

/// Stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Provider order id.
    pub id: String,
    /// Owning merchant.
    pub merchant_id: String,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Origin.
    pub source: OrderSource,
    /// Buyer.
    pub payer: Payer,
    /// Items with transfers applied.
    pub line_items: Vec<LineItem>,
    /// Captures.
    pub captures: Vec<Capture>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Line items not yet refunded.
    pub fn active_items(&self) -> impl Iterator<Item = &LineItem> {
        self.line_items
            .iter()
            .filter(|item| item.status == LineItemStatus::Active)
    }

    /// Capture refunds are issued against: the first completed one. A
    /// capture turns `refunded` only with its order.
    #[must_use]
    pub fn refundable_capture(&self) -> Option<&Capture> {
        self.captures
            .iter()
            .find(|c| c.status == CaptureStatus::Completed)
    }
}

/// Refund to record against a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    /// Provider refund id; the dedup key.
    pub id: String,
    /// Capture refunded.
    pub capture_id: String,
    /// Parent order.
    pub order_id: String,
    /// Refunded amount in cents.
    pub amount_cents: i64,
    /// Items covered; empty means every active item.
    pub line_item_ids: Vec<String>,
    /// When the refund happened.
    pub created_at: DateTime<Utc>,
}

/// Tickets sold for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldTickets {
    /// Product.
    pub product_id: i64,
    /// Departure.
    pub trip_at: DateTime<Utc>,
    /// Tickets across all active line items.
    pub quantity: i64,
}

/// One line item at a slot, joined with its buyer, for support tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// Order id.
    pub order_id: String,
    /// Line item id.
    pub line_item_id: String,
    /// Order status.
    pub order_status: OrderStatus,
    /// Line item status.
    pub item_status: LineItemStatus,
    /// Effective SKU.
    pub sku: String,
    /// Effective name.
    pub name: String,
    /// SKU as sold.
    pub original_sku: String,
    /// Name as sold.
    pub original_name: String,
    /// Description.
    pub description: String,
    /// Unit price in cents.
    pub unit_amount_cents: i64,
    /// Tickets.
    pub quantity: u32,
    /// Buyer.
    pub payer: Payer,
}

/// What a boarding pass renderer needs for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassItems {
    /// Active ticket line items, transfers applied.
    pub line_items: Vec<LineItem>,
    /// Buyer name.
    pub payer_name: String,
    /// Buyer email.
    pub payer_email: String,
}

impl PassItems {
    /// Extracts pass data from a stored order.
    #[must_use]
    pub fn from_order(order: &Order) -> Self {
        Self {
            line_items: order
                .active_items()
                .filter(|item| matches!(item.kind(), ItemKind::Slot(_)))
                .cloned()
                .collect(),
            payer_name: order.payer.name.clone(),
            payer_email: order.payer.email.clone(),
        }
    }
}

/// Parses a provider decimal amount (`"12.5"`, `"$12.50"`, `"7"`) into cents.
#[must_use]
pub fn parse_amount_cents(value: &str) -> Option<i64> {
    let value = value.trim().trim_start_matches('$');
    let (negative, value) = value
        .strip_prefix('-')
        .map_or((false, value), |rest| (true, rest));
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut cents: i64 = if fraction.is_empty() { 0 } else { fraction.parse().ok()? };
    if fraction.len() == 1 {
        cents *= 10;
    }

    let total = whole.checked_mul(100)?.checked_add(cents)?;
    Some(if negative { -total } else { total })
}

/// Formats cents as a provider decimal amount (`1250` -> `"12.50"`).
#[must_use]
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_amounts() {
        assert_eq!(parse_amount_cents("12.50"), Some(1250));
        assert_eq!(parse_amount_cents("12.5"), Some(1250));
        assert_eq!(parse_amount_cents("$7"), Some(700));
        assert_eq!(parse_amount_cents("0.07"), Some(7));
        assert_eq!(parse_amount_cents("-3.10"), Some(-310));
        assert_eq!(parse_amount_cents("1.234"), None);
        assert_eq!(parse_amount_cents("abc"), None);
        assert_eq!(parse_amount_cents(""), None);
    }

    #[test]
    fn formats_cents() {
        assert_eq!(format_cents(1250), "12.50");
        assert_eq!(format_cents(7), "0.07");
        assert_eq!(format_cents(-310), "-3.10");
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [OrderStatus::Created, OrderStatus::Captured, OrderStatus::Refunded] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LineItemStatus::parse("bogus"), None);
    }

    #[test]
    fn maps_provider_capture_status() {
        assert_eq!(CaptureStatus::from_provider("COMPLETED"), CaptureStatus::Completed);
        assert_eq!(CaptureStatus::from_provider("succeeded"), CaptureStatus::Completed);
        assert_eq!(CaptureStatus::from_provider("DECLINED"), CaptureStatus::Declined);
        assert_eq!(CaptureStatus::from_provider("PENDING"), CaptureStatus::Pending);
    }

    #[test]
    fn pass_items_skip_fees_and_refunded() {
        let item = |id: &str, sku: &str, name: &str, status| LineItem {
            id: id.to_string(),
            order_id: "ORD1".to_string(),
            sku: sku.to_string(),
            name: name.to_string(),
            original_sku: sku.to_string(),
            original_name: name.to_string(),
            unit_amount_cents: 1000,
            quantity: 1,
            description: String::new(),
            status,
        };
        let order = Order {
            id: "ORD1".to_string(),
            merchant_id: "M1".to_string(),
            status: OrderStatus::Captured,
            source: OrderSource::Provider,
            payer: Payer {
                id: "P1".to_string(),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                phone: None,
            },
            line_items: vec![
                item("a", "12AM1700000000", "Cruise", LineItemStatus::Active),
                item("b", "SVCFEE", "Fees", LineItemStatus::Active),
                item("c", "12PM1700000000", "Cruise", LineItemStatus::Refunded),
            ],
            captures: vec![],
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        };

        let pass = PassItems::from_order(&order);
        assert_eq!(pass.line_items.len(), 1);
        assert_eq!(pass.line_items[0].id, "a");
        assert_eq!(pass.payer_email, "ada@example.com");
    }
}
