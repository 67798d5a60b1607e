//! Stripe checkout provider.
//!
//! Orders are keyed by payment intent; the single capture of a Stripe order
//! shares that id. Ticket revenue is split between a primary and a secondary
//! connected account (plus a fee account), so a refund first claws back the
//! matching share of each payout transfer.

use super::stripe_api::{CheckoutSession, ProductRef, StripeApi, StripeRefund};
use super::{
    LocalBook, ManualEntry, ManualEntryReceipt, OrderLocator, ParsedEvent, PaymentProvider,
    ProviderError, ProviderFuture, RefundConfirmation, RefundEvent, RefundRequest, Resource,
    WebhookHeaders,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use slotledger_core::codec::ItemKind;
use slotledger_core::merchant::{MerchantConfig, PaymentType, StripeSettings};
use slotledger_core::order::{
    Capture, CaptureStatus, LineItem, NewLineItem, NewOrder, OrderSource, OrderStatus,
    OrderSummary, PassItems, Payer, SoldTickets,
};
use slotledger_core::transfer::{TransferRecord, TransferRequest};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

fn signer(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::Misconfigured(format!("Invalid webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

/// Builds a `Stripe-Signature` header value (`t=...,v1=...`) for a body.
///
/// # Errors
///
/// [`ProviderError::Misconfigured`] if the secret cannot key the MAC.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, ProviderError> {
    let signature = hex::encode(signer(secret, timestamp, body)?.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Checks a `Stripe-Signature` header against the raw body.
///
/// Any `v1` entry may match. The timestamp must be within `tolerance_secs`
/// of `now`.
///
/// # Errors
///
/// [`ProviderError::Authentication`] for a missing, stale or wrong signature.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<(), ProviderError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        ProviderError::Authentication("Missing timestamp in Stripe-Signature".to_string())
    })?;
    if signatures.is_empty() {
        return Err(ProviderError::Authentication(
            "No v1 signature in Stripe-Signature".to_string(),
        ));
    }
    if (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(ProviderError::Authentication(format!(
            "Signature timestamp {timestamp} outside tolerance"
        )));
    }

    for signature in signatures {
        let Ok(bytes) = hex::decode(signature) else {
            continue;
        };
        if signer(secret, timestamp, body)?.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }
    Err(ProviderError::Authentication(
        "No matching signature".to_string(),
    ))
}

/// How much of a refund each payout account gives back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PayoutSplit {
    /// Reversed from the primary account.
    pub primary_cents: i64,
    /// Reversed from the secondary account.
    pub secondary_cents: i64,
}

impl PayoutSplit {
    /// Split for the ticket items among `items`. Fee items stay with the fee account.
    #[must_use]
    pub fn for_items(items: &[LineItem], secondary_share_cents: i64) -> Self {
        items
            .iter()
            .filter(|item| matches!(item.kind(), ItemKind::Slot(_)))
            .fold(Self::default(), |mut split, item| {
                let share = i64::from(item.quantity) * secondary_share_cents;
                split.secondary_cents += share;
                split.primary_cents += (item.total_cents() - share).max(0);
                split
            })
    }

    /// Amount to reverse from a transfer to `destination`.
    #[must_use]
    pub fn reversal_for(&self, settings: &StripeSettings, destination: &str) -> i64 {
        let is = |account: &Option<String>| account.as_deref() == Some(destination);
        if is(&settings.fee_account) {
            0
        } else if is(&settings.primary_account) {
            self.primary_cents
        } else if is(&settings.secondary_account) {
            self.secondary_cents
        } else {
            tracing::warn!(destination, "Transfer to an unknown account left in place");
            0
        }
    }
}

/// Converts a checkout session into the order to record.
///
/// # Errors
///
/// [`ProviderError::Malformed`] when the session has no payment intent.
pub fn to_new_order(
    session: CheckoutSession,
    merchant_id: &str,
    fetched_at: DateTime<Utc>,
) -> Result<NewOrder, ProviderError> {
    let payment_intent = session.payment_intent.clone().ok_or_else(|| {
        ProviderError::Malformed(format!("Checkout session {} has no payment intent", session.id))
    })?;
    let created_at = session
        .created
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(fetched_at);

    let mut line_items: Vec<NewLineItem> = Vec::new();
    for item in session.line_items.map(|list| list.data).unwrap_or_default() {
        let quantity = item.quantity.unwrap_or(1);
        let price = item.price.as_ref();
        let product = price.and_then(|p| match &p.product {
            Some(ProductRef::Expanded(product)) => Some(product),
            _ => None,
        });
        let sku = product
            .and_then(|p| p.metadata.get("sku").cloned())
            .unwrap_or_default();
        let name = product
            .map(|p| p.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| item.description.clone());
        let unit_amount_cents = price
            .and_then(|p| p.unit_amount)
            .unwrap_or_else(|| item.amount_total / i64::from(quantity.max(1)));

        let mut id = if sku.is_empty() {
            item.id.clone()
        } else {
            format!("{payment_intent}-{sku}")
        };
        if line_items.iter().any(|existing| existing.id == id) {
            id = format!("{id}-{}", line_items.len() + 1);
        }
        line_items.push(NewLineItem {
            id,
            sku,
            name,
            unit_amount_cents,
            quantity,
            description: item.description,
        });
    }

    let paid = session.payment_status == "paid";
    let amount_cents = session.amount_total.unwrap_or_else(|| {
        line_items
            .iter()
            .map(|item| item.unit_amount_cents * i64::from(item.quantity))
            .sum()
    });
    let details = session.customer_details.unwrap_or_default();

    Ok(NewOrder {
        id: payment_intent.clone(),
        merchant_id: merchant_id.to_string(),
        status: if paid {
            OrderStatus::Captured
        } else {
            OrderStatus::Created
        },
        source: OrderSource::Provider,
        payer: Payer {
            id: session.customer.unwrap_or_default(),
            name: details.name.unwrap_or_default(),
            email: details.email.unwrap_or_default(),
            phone: details.phone,
        },
        line_items,
        captures: vec![Capture {
            id: payment_intent.clone(),
            order_id: payment_intent,
            status: if paid {
                CaptureStatus::Completed
            } else {
                CaptureStatus::Pending
            },
            amount_cents,
            currency: session.currency.unwrap_or_default().to_ascii_uppercase(),
            created_at,
            updated_at: created_at,
        }],
        created_at,
    })
}

#[derive(Debug, Deserialize)]
struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    payment_status: String,
}

#[derive(Debug, Deserialize)]
struct RefundList {
    #[serde(default)]
    data: Vec<StripeRefund>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    refunds: Option<RefundList>,
}

/// Refunds named by a `charge.refunded` payload, or a lookup when the payload
/// does not list them all.
fn charge_refunded(charge: ChargeObject) -> Result<Resource, ProviderError> {
    let payment_intent = charge.payment_intent.ok_or_else(|| {
        ProviderError::Malformed(format!("Charge {} has no payment intent", charge.id))
    })?;
    // Newer API versions omit the list; a truncated one is as bad.
    Ok(match charge.refunds {
        Some(list) if !list.data.is_empty() && !list.has_more => {
            Resource::Refunds(refund_events(list.data, &payment_intent))
        }
        _ => Resource::RefundLookup {
            capture_id: payment_intent,
        },
    })
}

/// Effective refunds of a payment intent, oldest first, from a newest-first
/// Stripe list.
fn refund_events(refunds: Vec<StripeRefund>, payment_intent: &str) -> Vec<RefundEvent> {
    refunds
        .into_iter()
        .rev()
        .filter(StripeRefund::is_effective)
        .map(|refund| RefundEvent {
            id: refund.id,
            capture_id: payment_intent.to_string(),
            order_id: Some(payment_intent.to_string()),
            amount_cents: refund.amount,
        })
        .collect()
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Malformed(format!("Invalid {what}: {e}")))
}

/// [`PaymentProvider`] for Stripe merchants.
pub struct StripeProvider {
    api: Arc<dyn StripeApi>,
    book: LocalBook,
    tolerance_secs: i64,
}

impl StripeProvider {
    /// Creates the provider. Signatures older than `tolerance_secs` are rejected.
    #[must_use]
    pub fn new(api: Arc<dyn StripeApi>, book: LocalBook, tolerance_secs: i64) -> Self {
        Self {
            api,
            book,
            tolerance_secs,
        }
    }
}

impl PaymentProvider for StripeProvider {
    fn payment_type(&self) -> PaymentType {
        PaymentType::Stripe
    }

    fn fetch_sold_tickets<'a>(
        &'a self,
        config: &'a MerchantConfig,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ProviderFuture<'a, Vec<SoldTickets>> {
        Box::pin(self.book.sold_tickets(config, from, to))
    }

    fn fetch_orders_at_slot<'a>(
        &'a self,
        config: &'a MerchantConfig,
        trip_at: DateTime<Utc>,
    ) -> ProviderFuture<'a, Vec<OrderSummary>> {
        Box::pin(self.book.orders_at_slot(config, trip_at))
    }

    fn fetch_pass_items<'a>(
        &'a self,
        config: &'a MerchantConfig,
        order_id: &'a str,
    ) -> ProviderFuture<'a, PassItems> {
        Box::pin(self.book.pass_items(config, order_id))
    }

    fn refund<'a>(
        &'a self,
        config: &'a MerchantConfig,
        request: &'a RefundRequest,
    ) -> ProviderFuture<'a, RefundConfirmation> {
        Box::pin(async move {
            let settings = config.stripe()?;
            let target = self.book.refund_target(config, request).await?;
            let payment_intent = self
                .api
                .get_payment_intent(config, &target.capture.id)
                .await?;

            if let Some(group) = payment_intent.transfer_group.as_deref() {
                let split = PayoutSplit::for_items(&target.items, settings.secondary_share_cents);
                for transfer in self.api.list_transfers(config, group).await? {
                    let amount = split
                        .reversal_for(settings, &transfer.destination)
                        .min(transfer.amount - transfer.amount_reversed);
                    if amount <= 0 {
                        continue;
                    }
                    let reversal = self
                        .api
                        .reverse_transfer(config, &transfer.id, amount)
                        .await?;
                    tracing::info!(
                        transfer_id = %transfer.id,
                        destination = %transfer.destination,
                        reversal_id = %reversal.id,
                        amount_cents = reversal.amount,
                        "Payout transfer reversed"
                    );
                }
            }

            let refund = self
                .api
                .create_refund(config, &payment_intent.id, target.amount_cents())
                .await?;
            self.book
                .record_refund(PaymentType::Stripe, &target, refund.id)
                .await
        })
    }

    fn transfer<'a>(
        &'a self,
        config: &'a MerchantConfig,
        requests: &'a [TransferRequest],
    ) -> ProviderFuture<'a, Vec<TransferRecord>> {
        Box::pin(self.book.transfer(config, requests))
    }

    fn manual_entry<'a>(
        &'a self,
        config: &'a MerchantConfig,
        entry: &'a ManualEntry,
    ) -> ProviderFuture<'a, ManualEntryReceipt> {
        Box::pin(self.book.manual_entry(config, entry))
    }

    fn verify_webhook<'a>(
        &'a self,
        config: &'a MerchantConfig,
        headers: &'a WebhookHeaders,
        body: &'a [u8],
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let settings = config.stripe()?;
            let header = headers.require(SIGNATURE_HEADER)?;
            verify_signature(
                &settings.webhook_secret,
                header,
                body,
                self.book.now(),
                self.tolerance_secs,
            )
        })
    }

    fn parse_event(&self, body: &[u8]) -> Result<ParsedEvent, ProviderError> {
        let event: Event = serde_json::from_slice(body)
            .map_err(|e| ProviderError::Malformed(format!("Invalid Stripe event: {e}")))?;
        let object = event.data.object;
        let resource_type = object
            .get("object")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let resource_id = object
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        let resource = match event.event_type.as_str() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let session: SessionObject = decode(object, "checkout session")?;
                if session.payment_status == "paid" {
                    Resource::CheckoutCompleted {
                        order_id: session.payment_intent,
                        locator: OrderLocator::Order(session.id),
                    }
                } else {
                    Resource::Payment { id: session.id }
                }
            }
            "payment_intent.succeeded" => Resource::Payment {
                id: resource_id.clone().unwrap_or_default(),
            },
            "charge.refunded" => charge_refunded(decode(object, "charge")?)?,
            _ => Resource::Unknown,
        };

        Ok(ParsedEvent {
            event_id: event.id,
            event_type: event.event_type,
            resource_type,
            resource_id,
            resource,
        })
    }

    fn fetch_order<'a>(
        &'a self,
        config: &'a MerchantConfig,
        locator: &'a OrderLocator,
    ) -> ProviderFuture<'a, NewOrder> {
        Box::pin(async move {
            let session = match locator {
                OrderLocator::Order(session_id) => {
                    self.api.get_checkout_session(config, session_id).await?
                }
                OrderLocator::Capture(payment_intent) => self
                    .api
                    .find_checkout_session(config, payment_intent)
                    .await?
                    .ok_or_else(|| ProviderError::NotFound {
                        resource: "checkout session",
                        id: payment_intent.clone(),
                    })?,
            };
            to_new_order(session, &config.merchant_id, self.book.now())
        })
    }

    fn fetch_refunds<'a>(
        &'a self,
        config: &'a MerchantConfig,
        capture_id: &'a str,
    ) -> ProviderFuture<'a, Vec<RefundEvent>> {
        Box::pin(async move {
            let refunds = self.api.list_refunds(config, capture_id).await?;
            Ok(refund_events(refunds, capture_id))
        })
    }
}
