//! Shared test data.

#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use crate::test_clock;
use chrono::{DateTime, Utc};
use slotledger_core::codec::{FEE_ITEM_NAME, Slot};
use slotledger_core::environment::Clock;
use slotledger_core::merchant::{MerchantConfig, PayPalSettings, PaymentType, StripeSettings};
use slotledger_core::order::{
    Capture, CaptureStatus, NewLineItem, NewOrder, OrderSource, OrderStatus, Payer,
};

/// Instant from epoch seconds.
#[must_use]
pub fn at(epoch: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(epoch, 0).unwrap()
}

/// Ledger key from product and epoch seconds.
#[must_use]
pub fn slot(product_id: i64, epoch: i64) -> Slot {
    Slot::new(product_id, at(epoch))
}

/// `PayPal` merchant with sandbox credentials.
#[must_use]
pub fn paypal_merchant(merchant_id: &str) -> MerchantConfig {
    MerchantConfig {
        merchant_id: merchant_id.to_string(),
        payment_type: PaymentType::PayPal,
        sandbox: true,
        currency: "USD".to_string(),
        paypal: Some(PayPalSettings {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            webhook_id: "WH-1".to_string(),
        }),
        stripe: None,
        notify_email: Some("ops@example.com".to_string()),
        notify_phone: None,
    }
}

/// Stripe merchant with a primary/secondary payout split.
#[must_use]
pub fn stripe_merchant(merchant_id: &str) -> MerchantConfig {
    MerchantConfig {
        merchant_id: merchant_id.to_string(),
        payment_type: PaymentType::Stripe,
        sandbox: true,
        currency: "USD".to_string(),
        paypal: None,
        stripe: Some(StripeSettings {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            connected_account: None,
            primary_account: Some("acct_primary".to_string()),
            secondary_account: Some("acct_secondary".to_string()),
            fee_account: Some("acct_fees".to_string()),
            secondary_share_cents: 500,
        }),
        notify_email: None,
        notify_phone: Some("+15550100".to_string()),
    }
}

/// Line item priced at $25.00 per ticket, id `{order_id}-{sku}`.
///
/// SKUs starting with `SVCFEE` get the reserved fee name.
#[must_use]
pub fn line_item(order_id: &str, sku: &str, quantity: u32) -> NewLineItem {
    let name = if sku.starts_with("SVCFEE") {
        FEE_ITEM_NAME
    } else {
        "Sunset cruise"
    };
    NewLineItem {
        id: format!("{order_id}-{sku}"),
        sku: sku.to_string(),
        name: name.to_string(),
        unit_amount_cents: 2500,
        quantity,
        description: String::new(),
    }
}

/// Buyer used by every fixture order.
#[must_use]
pub fn payer() -> Payer {
    Payer {
        id: "PAYER1".to_string(),
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        phone: Some("5550101".to_string()),
    }
}

/// Captured order with one completed capture `{order_id}-CAP` covering every item.
#[must_use]
pub fn paid_order(order_id: &str, merchant_id: &str, items: &[(&str, u32)]) -> NewOrder {
    let now = test_clock().now();
    let line_items: Vec<NewLineItem> = items
        .iter()
        .map(|(sku, qty)| line_item(order_id, sku, *qty))
        .collect();
    let amount_cents = line_items
        .iter()
        .map(|item| item.unit_amount_cents * i64::from(item.quantity))
        .sum();

    NewOrder {
        id: order_id.to_string(),
        merchant_id: merchant_id.to_string(),
        status: OrderStatus::Captured,
        source: OrderSource::Provider,
        payer: payer(),
        line_items,
        captures: vec![Capture {
            id: format!("{order_id}-CAP"),
            order_id: order_id.to_string(),
            status: CaptureStatus::Completed,
            amount_cents,
            currency: "USD".to_string(),
            created_at: now,
            updated_at: now,
        }],
        created_at: now,
    }
}
