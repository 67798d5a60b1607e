//! `PayPal` checkout provider.

use super::paypal_api::{Money, PayPalApi, PayPalCapture, PayPalOrder, PayPalRefund, VerifySignatureRequest};
use super::{
    CaptureEvent, LocalBook, ManualEntry, ManualEntryReceipt, OrderLocator, ParsedEvent,
    PaymentProvider, ProviderError, ProviderFuture, RefundConfirmation, RefundEvent,
    RefundRequest, Resource, WebhookHeaders,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use slotledger_core::merchant::{MerchantConfig, PaymentType};
use slotledger_core::order::{
    Capture, CaptureStatus, NewLineItem, NewOrder, OrderSource, OrderStatus, OrderSummary,
    PassItems, Payer, SoldTickets, format_cents, parse_amount_cents,
};
use slotledger_core::transfer::{TransferRecord, TransferRequest};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct Envelope {
    id: String,
    event_type: String,
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    resource: serde_json::Value,
}

fn money_cents(money: Option<&Money>) -> Result<(i64, String), ProviderError> {
    let Some(money) = money else {
        return Ok((0, String::new()));
    };
    let cents = parse_amount_cents(&money.value)
        .ok_or_else(|| ProviderError::Malformed(format!("Invalid amount {:?}", money.value)))?;
    Ok((cents, money.currency_code.clone()))
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Malformed(format!("Invalid {what}: {e}")))
}

/// Converts a fetched `PayPal` order into the order to record.
///
/// Line item ids are `{order_id}-{sku}`; a repeated SKU gets its position
/// appended.
///
/// # Errors
///
/// [`ProviderError::Malformed`] for unparsable quantities or amounts.
pub fn to_new_order(
    order: PayPalOrder,
    merchant_id: &str,
    fetched_at: DateTime<Utc>,
) -> Result<NewOrder, ProviderError> {
    let created_at = order.create_time.unwrap_or(fetched_at);
    let mut line_items: Vec<NewLineItem> = Vec::new();
    let mut captures: Vec<Capture> = Vec::new();

    for unit in &order.purchase_units {
        for item in &unit.items {
            let quantity: u32 = item.quantity.trim().parse().map_err(|_| {
                ProviderError::Malformed(format!(
                    "Item {:?} has quantity {:?}",
                    item.sku, item.quantity
                ))
            })?;
            let (unit_amount_cents, _) = money_cents(item.unit_amount.as_ref())?;

            let mut id = format!("{}-{}", order.id, item.sku);
            if line_items.iter().any(|existing| existing.id == id) {
                id = format!("{id}-{}", line_items.len() + 1);
            }
            line_items.push(NewLineItem {
                id,
                sku: item.sku.clone(),
                name: item.name.clone(),
                unit_amount_cents,
                quantity,
                description: item.description.clone(),
            });
        }

        for capture in unit.payments.iter().flat_map(|p| &p.captures) {
            let (amount_cents, currency) = money_cents(capture.amount.as_ref())?;
            let at = capture.create_time.unwrap_or(created_at);
            captures.push(Capture {
                id: capture.id.clone(),
                order_id: order.id.clone(),
                status: CaptureStatus::from_provider(&capture.status),
                amount_cents,
                currency,
                created_at: at,
                updated_at: at,
            });
        }
    }

    let paid = order.status.eq_ignore_ascii_case("COMPLETED")
        || captures.iter().any(|c| c.status == CaptureStatus::Completed);
    let payer = order.payer.unwrap_or_default();
    let name = payer
        .name
        .map(|n| format!("{} {}", n.given_name, n.surname).trim().to_string())
        .unwrap_or_default();

    Ok(NewOrder {
        id: order.id,
        merchant_id: merchant_id.to_string(),
        status: if paid {
            OrderStatus::Captured
        } else {
            OrderStatus::Created
        },
        source: OrderSource::Provider,
        payer: Payer {
            id: payer.payer_id,
            name,
            email: payer.email_address,
            phone: payer
                .phone
                .map(|p| p.phone_number.national_number)
                .filter(|n| !n.is_empty()),
        },
        line_items,
        captures,
        created_at,
    })
}

fn capture_event(capture: PayPalCapture) -> Result<CaptureEvent, ProviderError> {
    let (amount_cents, currency) = money_cents(capture.amount.as_ref())?;
    Ok(CaptureEvent {
        order_id: capture.order_id(),
        status: CaptureStatus::from_provider(&capture.status),
        amount_cents,
        currency,
        created_at: capture.create_time,
        id: capture.id,
    })
}

fn refund_event(refund: PayPalRefund) -> Result<RefundEvent, ProviderError> {
    let capture_id = refund
        .capture_id()
        .ok_or_else(|| ProviderError::Malformed(format!("Refund {} has no capture link", refund.id)))?;
    let (amount_cents, _) = money_cents(refund.amount.as_ref())?;
    Ok(RefundEvent {
        id: refund.id,
        capture_id,
        order_id: None,
        amount_cents,
    })
}

/// [`PaymentProvider`] for `PayPal` merchants.
pub struct PayPalProvider {
    api: Arc<dyn PayPalApi>,
    book: LocalBook,
}

impl PayPalProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new(api: Arc<dyn PayPalApi>, book: LocalBook) -> Self {
        Self { api, book }
    }
}

impl PaymentProvider for PayPalProvider {
    fn payment_type(&self) -> PaymentType {
        PaymentType::PayPal
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
            let target = self.book.refund_target(config, request).await?;
            let amount = Money {
                value: format_cents(target.amount_cents()),
                currency_code: config.currency.clone(),
            };
            let refund = self
                .api
                .refund_capture(config, &target.capture.id, &amount)
                .await?;
            self.book
                .record_refund(PaymentType::PayPal, &target, refund.id)
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
            let settings = config.paypal()?;
            let webhook_event: serde_json::Value = serde_json::from_slice(body)
                .map_err(|e| ProviderError::Authentication(format!("Body is not JSON: {e}")))?;
            let request = VerifySignatureRequest {
                auth_algo: headers.require("PAYPAL-AUTH-ALGO")?.to_string(),
                cert_url: headers.require("PAYPAL-CERT-URL")?.to_string(),
                transmission_id: headers.require("PAYPAL-TRANSMISSION-ID")?.to_string(),
                transmission_sig: headers.require("PAYPAL-TRANSMISSION-SIG")?.to_string(),
                transmission_time: headers.require("PAYPAL-TRANSMISSION-TIME")?.to_string(),
                webhook_id: settings.webhook_id.clone(),
                webhook_event,
            };

            if self.api.verify_signature(config, &request).await? {
                Ok(())
            } else {
                Err(ProviderError::Authentication(
                    "PayPal rejected the transmission signature".to_string(),
                ))
            }
        })
    }

    fn parse_event(&self, body: &[u8]) -> Result<ParsedEvent, ProviderError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| ProviderError::Malformed(format!("Invalid PayPal event: {e}")))?;
        let resource_id = envelope
            .resource
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        let resource = match envelope.resource_type.as_str() {
            "capture" => Resource::Capture(capture_event(decode(envelope.resource, "capture")?)?),
            "refund" => Resource::Refund(refund_event(decode(envelope.resource, "refund")?)?),
            "checkout-order" if envelope.event_type == "CHECKOUT.ORDER.COMPLETED" => {
                let order_id = resource_id.clone().ok_or_else(|| {
                    ProviderError::Malformed("Checkout order without id".to_string())
                })?;
                Resource::CheckoutCompleted {
                    order_id: Some(order_id.clone()),
                    locator: OrderLocator::Order(order_id),
                }
            }
            "sale" | "payment" => Resource::Payment {
                id: resource_id.clone().unwrap_or_default(),
            },
            _ => Resource::Unknown,
        };

        Ok(ParsedEvent {
            event_id: envelope.id,
            event_type: envelope.event_type,
            resource_type: envelope.resource_type,
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
            let order = match locator {
                OrderLocator::Order(order_id) => self.api.get_order(config, order_id).await?,
                OrderLocator::Capture(capture_id) => {
                    let capture = self.api.get_capture(config, capture_id).await?;
                    let order_id = capture.order_id().ok_or_else(|| {
                        ProviderError::Malformed(format!("Capture {capture_id} has no order link"))
                    })?;
                    self.api.get_order(config, &order_id).await?
                }
            };
            to_new_order(order, &config.merchant_id, self.book.now())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use slotledger_testing::test_clock;
    use slotledger_core::environment::Clock;

    fn order_json() -> PayPalOrder {
        serde_json::from_str(
            r#"{
              "id": "ORD1",
              "status": "COMPLETED",
              "payer": {
                "payer_id": "PAYER1",
                "name": {"given_name": "Ada", "surname": "Lovelace"},
                "email_address": "ada@example.com",
                "phone": {"phone_number": {"national_number": "5550101"}}
              },
              "purchase_units": [{
                "items": [
                  {"name": "Sunset cruise", "sku": "12AM1700000000", "quantity": "2",
                   "unit_amount": {"value": "25.00", "currency_code": "USD"}},
                  {"name": "Fees", "sku": "SVCFEE", "quantity": "1",
                   "unit_amount": {"value": "3.5", "currency_code": "USD"}}
                ],
                "payments": {"captures": [
                  {"id": "CAP1", "status": "COMPLETED",
                   "amount": {"value": "53.50", "currency_code": "USD"}}
                ]}
              }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn maps_order() {
        let now = test_clock().now();
        let order = to_new_order(order_json(), "M1", now).unwrap();

        assert_eq!(order.status, OrderStatus::Captured);
        assert_eq!(order.created_at, now);
        assert_eq!(order.payer.name, "Ada Lovelace");
        assert_eq!(order.payer.phone.as_deref(), Some("5550101"));
        assert_eq!(order.line_items[0].id, "ORD1-12AM1700000000");
        assert_eq!(order.line_items[0].quantity, 2);
        assert_eq!(order.line_items[0].unit_amount_cents, 2500);
        assert_eq!(order.line_items[1].unit_amount_cents, 350);
        assert_eq!(order.captures[0].amount_cents, 5350);
        assert_eq!(order.captures[0].status, CaptureStatus::Completed);
    }

    #[test]
    fn rejects_bad_quantity() {
        let mut order = order_json();
        order.purchase_units[0].items[0].quantity = "two".to_string();
        assert!(matches!(
            to_new_order(order, "M1", test_clock().now()),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn repeated_sku_gets_distinct_ids() {
        let mut order = order_json();
        let item = order.purchase_units[0].items[0].clone();
        order.purchase_units[0].items.push(item);
        let mapped = to_new_order(order, "M1", test_clock().now()).unwrap();
        assert_eq!(mapped.line_items[2].id, "ORD1-12AM1700000000-3");
    }
}
