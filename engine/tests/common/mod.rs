//! Shared harness for engine integration tests.
//!
//! Provider REST APIs are replaced by in-process mocks; storage is the
//! in-memory store.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::{Value, json};
use slotledger_core::environment::Clock;
use slotledger_core::merchant::MerchantConfig;
use slotledger_core::order::Order;
use slotledger_engine::app::{ProviderApis, assemble};
use slotledger_engine::notifier::{NotifyError, NotifyFuture, Notifier};
use slotledger_engine::providers::paypal_api::{
    Money, PayPalApi, PayPalCapture, PayPalOrder, PayPalRefund, VerifySignatureRequest,
};
use slotledger_engine::providers::stripe_api::{
    CheckoutSession, PaymentIntent, StripeApi, StripeRefund, StripeTransfer, TransferReversal,
};
use slotledger_engine::providers::stripe::{SIGNATURE_HEADER, signature_header};
use slotledger_engine::providers::{ProviderError, ProviderFuture, WebhookHeaders};
use slotledger_engine::{AppState, Config, Stores};
use slotledger_testing::{FixedClock, InMemoryStore, fixtures, test_clock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Merchant selling through `PayPal`.
pub const PAYPAL_MERCHANT: &str = "M-PP";
/// Merchant selling through Stripe.
pub const STRIPE_MERCHANT: &str = "M-ST";
/// Token guarding `/api` in router tests.
pub const ADMIN_TOKEN: &str = "secret-admin";

/// How the mocked `PayPal` signature check answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Authentic.
    Accept,
    /// `verification_status` is not `SUCCESS`.
    Reject,
    /// Verification endpoint unreachable.
    Unavailable,
}

/// In-process `PayPal` REST API.
pub struct MockPayPal {
    verification: Mutex<Verification>,
    orders: Mutex<HashMap<String, PayPalOrder>>,
    captures: Mutex<HashMap<String, PayPalCapture>>,
    pub refunds: Mutex<Vec<(String, Money)>>,
    pub order_fetches: AtomicUsize,
}

impl MockPayPal {
    pub fn new() -> Self {
        Self {
            verification: Mutex::new(Verification::Accept),
            orders: Mutex::new(HashMap::new()),
            captures: Mutex::new(HashMap::new()),
            refunds: Mutex::new(Vec::new()),
            order_fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_verification(&self, verification: Verification) {
        *self.verification.lock().unwrap() = verification;
    }

    /// Registers a completed order with one capture `{order_id}-CAP`.
    pub fn add_order(&self, order_id: &str, items: &[(&str, u32)]) {
        let order = paypal_order(order_id, items);
        let capture: PayPalCapture =
            serde_json::from_value(paypal_capture_json(order_id, "COMPLETED", total(items))).unwrap();
        self.captures
            .lock()
            .unwrap()
            .insert(capture.id.clone(), capture);
        self.orders
            .lock()
            .unwrap()
            .insert(order_id.to_string(), order);
    }

    pub fn fetch_count(&self) -> usize {
        self.order_fetches.load(Ordering::SeqCst)
    }
}

fn unavailable(operation: &str) -> ProviderError {
    ProviderError::Transport {
        provider: slotledger_core::merchant::PaymentType::PayPal,
        message: format!("{operation}: connection refused"),
    }
}

impl PayPalApi for MockPayPal {
    fn verify_signature<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        _request: &'a VerifySignatureRequest,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            match *self.verification.lock().unwrap() {
                Verification::Accept => Ok(true),
                Verification::Reject => Ok(false),
                Verification::Unavailable => Err(unavailable("verify_webhook")),
            }
        })
    }

    fn get_order<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        order_id: &'a str,
    ) -> ProviderFuture<'a, PayPalOrder> {
        Box::pin(async move {
            self.order_fetches.fetch_add(1, Ordering::SeqCst);
            self.orders
                .lock()
                .unwrap()
                .get(order_id)
                .cloned()
                .ok_or_else(|| ProviderError::Remote {
                    provider: slotledger_core::merchant::PaymentType::PayPal,
                    status: 404,
                    message: format!("Order {order_id} not found"),
                })
        })
    }

    fn get_capture<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        capture_id: &'a str,
    ) -> ProviderFuture<'a, PayPalCapture> {
        Box::pin(async move {
            self.captures
                .lock()
                .unwrap()
                .get(capture_id)
                .cloned()
                .ok_or_else(|| unavailable("get_capture"))
        })
    }

    fn refund_capture<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        capture_id: &'a str,
        amount: &'a Money,
    ) -> ProviderFuture<'a, PayPalRefund> {
        Box::pin(async move {
            let mut refunds = self.refunds.lock().unwrap();
            refunds.push((capture_id.to_string(), amount.clone()));
            Ok(serde_json::from_value(json!({
                "id": format!("RF{}", refunds.len()),
                "status": "COMPLETED",
                "amount": amount,
                "links": [{
                    "href": format!("https://api.paypal.com/v2/payments/captures/{capture_id}"),
                    "rel": "up"
                }]
            }))
            .unwrap())
        })
    }
}

/// In-process Stripe REST API.
pub struct MockStripe {
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    transfers: Mutex<Vec<StripeTransfer>>,
    pub reversals: Mutex<Vec<(String, i64)>>,
    pub refunds: Mutex<Vec<(String, i64)>>,
}

impl MockStripe {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            transfers: Mutex::new(Vec::new()),
            reversals: Mutex::new(Vec::new()),
            refunds: Mutex::new(Vec::new()),
        }
    }

    /// Registers a paid session `cs_{pi}` for payment intent `pi`, plus the
    /// payout transfers of a $25.00 ticket split 2000/500.
    pub fn add_session(&self, payment_intent: &str, items: &[(&str, u32)]) {
        let session: CheckoutSession =
            serde_json::from_value(stripe_session_json(payment_intent, items)).unwrap();
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);

        let tickets: u32 = items
            .iter()
            .filter(|(sku, _)| !sku.starts_with("SVCFEE"))
            .map(|(_, qty)| qty)
            .sum();
        let tickets = i64::from(tickets);
        let mut transfers = self.transfers.lock().unwrap();
        transfers.push(StripeTransfer {
            id: format!("tr_primary_{payment_intent}"),
            amount: 2000 * tickets,
            amount_reversed: 0,
            destination: "acct_primary".to_string(),
        });
        transfers.push(StripeTransfer {
            id: format!("tr_secondary_{payment_intent}"),
            amount: 500 * tickets,
            amount_reversed: 0,
            destination: "acct_secondary".to_string(),
        });
        transfers.push(StripeTransfer {
            id: format!("tr_fees_{payment_intent}"),
            amount: 350,
            amount_reversed: 0,
            destination: "acct_fees".to_string(),
        });
    }

    /// Records a refund made outside the engine (dashboard) and returns its id.
    pub fn external_refund(&self, payment_intent: &str, amount_cents: i64) -> String {
        let mut refunds = self.refunds.lock().unwrap();
        refunds.push((payment_intent.to_string(), amount_cents));
        format!("re_{}", refunds.len())
    }
}

impl StripeApi for MockStripe {
    fn get_checkout_session<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        session_id: &'a str,
    ) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(async move {
            self.sessions
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound {
                    resource: "checkout session",
                    id: session_id.to_string(),
                })
        })
    }

    fn find_checkout_session<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, Option<CheckoutSession>> {
        Box::pin(async move {
            Ok(self
                .sessions
                .lock()
                .unwrap()
                .values()
                .find(|s| s.payment_intent.as_deref() == Some(payment_intent))
                .cloned())
        })
    }

    fn get_payment_intent<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, PaymentIntent> {
        Box::pin(async move {
            Ok(PaymentIntent {
                id: payment_intent.to_string(),
                status: "succeeded".to_string(),
                amount: 0,
                transfer_group: Some(format!("group_{payment_intent}")),
            })
        })
    }

    fn list_transfers<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        transfer_group: &'a str,
    ) -> ProviderFuture<'a, Vec<StripeTransfer>> {
        Box::pin(async move {
            let payment_intent = transfer_group.trim_start_matches("group_");
            Ok(self
                .transfers
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.id.ends_with(payment_intent))
                .cloned()
                .collect())
        })
    }

    fn reverse_transfer<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        transfer_id: &'a str,
        amount_cents: i64,
    ) -> ProviderFuture<'a, TransferReversal> {
        Box::pin(async move {
            let mut reversals = self.reversals.lock().unwrap();
            reversals.push((transfer_id.to_string(), amount_cents));
            Ok(TransferReversal {
                id: format!("trr_{}", reversals.len()),
                amount: amount_cents,
            })
        })
    }

    fn create_refund<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        payment_intent: &'a str,
        amount_cents: i64,
    ) -> ProviderFuture<'a, StripeRefund> {
        Box::pin(async move {
            let mut refunds = self.refunds.lock().unwrap();
            refunds.push((payment_intent.to_string(), amount_cents));
            Ok(StripeRefund {
                id: format!("re_{}", refunds.len()),
                amount: amount_cents,
                status: Some("succeeded".to_string()),
            })
        })
    }

    fn list_refunds<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, Vec<StripeRefund>> {
        Box::pin(async move {
            let refunds = self.refunds.lock().unwrap();
            Ok(refunds
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, (pi, _))| pi == payment_intent)
                .map(|(index, (_, amount))| StripeRefund {
                    id: format!("re_{}", index + 1),
                    amount: *amount,
                    status: Some("succeeded".to_string()),
                })
                .collect())
        })
    }
}

/// Counts notifications and optionally fails every one.
pub struct TestNotifier {
    fail: bool,
    pub sent: AtomicUsize,
}

impl TestNotifier {
    pub const fn new(fail: bool) -> Self {
        Self {
            fail,
            sent: AtomicUsize::new(0),
        }
    }

    pub fn count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl Notifier for TestNotifier {
    fn order_placed<'a>(&'a self, _config: &'a MerchantConfig, _order: &'a Order) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Delivery("SMTP relay refused".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

/// Everything a test needs to drive and inspect the engine.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub paypal: Arc<MockPayPal>,
    pub stripe: Arc<MockStripe>,
    pub notifier: Arc<TestNotifier>,
    pub clock: FixedClock,
    pub state: AppState,
}

impl Harness {
    /// Default capacity 10, blind operator writes, no admin token.
    pub fn new() -> Self {
        Self::build(10, false, false, None)
    }

    pub fn build(
        default_capacity: i64,
        enforce_floor: bool,
        failing_notifier: bool,
        admin_token: Option<&str>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::with_default_capacity(default_capacity));
        store.insert_merchant(fixtures::paypal_merchant(PAYPAL_MERCHANT));
        store.insert_merchant(fixtures::stripe_merchant(STRIPE_MERCHANT));

        let paypal = Arc::new(MockPayPal::new());
        let stripe = Arc::new(MockStripe::new());
        let notifier = Arc::new(TestNotifier::new(failing_notifier));
        let clock = test_clock();

        let mut config = Config::default();
        config.ledger.default_capacity = default_capacity;
        config.ledger.enforce_floor = enforce_floor;
        config.server.admin_token = admin_token.map(ToString::to_string);

        let state = assemble(
            Stores::from_shared(store.clone()),
            ProviderApis {
                paypal: paypal.clone(),
                stripe: stripe.clone(),
            },
            notifier.clone(),
            Arc::new(clock.clone()),
            &config,
            None,
        );

        Self {
            store,
            paypal,
            stripe,
            notifier,
            clock,
            state,
        }
    }
}

fn total(items: &[(&str, u32)]) -> i64 {
    items.iter().map(|(_, qty)| 2500 * i64::from(*qty)).sum()
}

fn cents(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, amount % 100)
}

/// `PayPal` order `order_id` selling `items` at $25.00 each.
pub fn paypal_order(order_id: &str, items: &[(&str, u32)]) -> PayPalOrder {
    let line_items: Vec<Value> = items
        .iter()
        .map(|(sku, qty)| {
            json!({
                "name": if sku.starts_with("SVCFEE") { "Fees" } else { "Sunset cruise" },
                "sku": sku,
                "quantity": qty.to_string(),
                "unit_amount": {"value": "25.00", "currency_code": "USD"}
            })
        })
        .collect();
    serde_json::from_value(json!({
        "id": order_id,
        "status": "COMPLETED",
        "payer": {
            "payer_id": "PAYER1",
            "name": {"given_name": "Ada", "surname": "Lovelace"},
            "email_address": "ada@example.com"
        },
        "purchase_units": [{
            "items": line_items,
            "payments": {"captures": [paypal_capture_json(order_id, "COMPLETED", total(items))]}
        }]
    }))
    .unwrap()
}

fn paypal_capture_json(order_id: &str, status: &str, amount: i64) -> Value {
    json!({
        "id": format!("{order_id}-CAP"),
        "status": status,
        "amount": {"value": cents(amount), "currency_code": "USD"},
        "links": [{
            "href": format!("https://api.paypal.com/v2/checkout/orders/{order_id}"),
            "rel": "up"
        }]
    })
}

/// `PAYMENT.CAPTURE.COMPLETED` (or other status) notification body.
pub fn paypal_capture_event(event_id: &str, order_id: &str, status: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "event_type": format!("PAYMENT.CAPTURE.{status}"),
        "resource_type": "capture",
        "resource": paypal_capture_json(order_id, status, amount)
    }))
    .unwrap()
}

/// `PAYMENT.CAPTURE.REFUNDED` notification body.
pub fn paypal_refund_event(event_id: &str, refund_id: &str, order_id: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "event_type": "PAYMENT.CAPTURE.REFUNDED",
        "resource_type": "refund",
        "resource": {
            "id": refund_id,
            "status": "COMPLETED",
            "amount": {"value": cents(amount), "currency_code": "USD"},
            "links": [{
                "href": format!("https://api.paypal.com/v2/payments/captures/{order_id}-CAP"),
                "rel": "up"
            }]
        }
    }))
    .unwrap()
}

/// `CHECKOUT.ORDER.COMPLETED` notification body.
pub fn paypal_order_completed_event(event_id: &str, order_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "event_type": "CHECKOUT.ORDER.COMPLETED",
        "resource_type": "checkout-order",
        "resource": {"id": order_id, "status": "COMPLETED"}
    }))
    .unwrap()
}

/// Headers `PayPal` sends with every notification.
pub fn paypal_header_pairs() -> Vec<(&'static str, &'static str)> {
    vec![
        ("paypal-auth-algo", "SHA256withRSA"),
        ("paypal-cert-url", "https://api.paypal.com/v1/notifications/certs/CERT-1"),
        ("paypal-transmission-id", "trans-1"),
        ("paypal-transmission-sig", "c2lnbmF0dXJl"),
        ("paypal-transmission-time", "2025-01-01T00:00:00Z"),
    ]
}

pub fn paypal_headers() -> WebhookHeaders {
    paypal_header_pairs()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// `Stripe-Signature` for `body` signed now with the fixture secret.
pub fn stripe_headers(body: &[u8]) -> WebhookHeaders {
    let header = signature_header("whsec_test", test_clock().now().timestamp(), body).unwrap();
    WebhookHeaders::new().with(SIGNATURE_HEADER, header)
}

/// Expanded checkout session for `payment_intent`.
pub fn stripe_session_json(payment_intent: &str, items: &[(&str, u32)]) -> Value {
    let line_items: Vec<Value> = items
        .iter()
        .enumerate()
        .map(|(n, (sku, qty))| {
            json!({
                "id": format!("li_{n}"),
                "description": if sku.starts_with("SVCFEE") { "Fees" } else { "Sunset cruise" },
                "quantity": qty,
                "amount_total": 2500 * i64::from(*qty),
                "price": {
                    "id": format!("price_{n}"),
                    "unit_amount": 2500,
                    "product": {
                        "id": format!("prod_{n}"),
                        "name": if sku.starts_with("SVCFEE") { "Fees" } else { "Sunset cruise" },
                        "metadata": {"sku": sku}
                    }
                }
            })
        })
        .collect();
    json!({
        "id": format!("cs_{payment_intent}"),
        "object": "checkout.session",
        "payment_intent": payment_intent,
        "payment_status": "paid",
        "amount_total": total(items),
        "currency": "usd",
        "created": 1_735_689_600,
        "customer_details": {"name": "Ada Lovelace", "email": "ada@example.com"},
        "line_items": {"data": line_items, "has_more": false}
    })
}

/// `checkout.session.completed` event body.
pub fn stripe_checkout_event(event_id: &str, payment_intent: &str, payment_status: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {"object": {
            "id": format!("cs_{payment_intent}"),
            "object": "checkout.session",
            "payment_intent": payment_intent,
            "payment_status": payment_status
        }}
    }))
    .unwrap()
}

/// `charge.refunded` event body.
pub fn stripe_refund_event(event_id: &str, refund_id: &str, payment_intent: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": {"object": {
            "id": format!("ch_{payment_intent}"),
            "object": "charge",
            "payment_intent": payment_intent,
            "amount_refunded": amount,
            "refunds": {"data": [{"id": refund_id, "amount": amount}], "has_more": false}
        }}
    }))
    .unwrap()
}

/// `charge.refunded` as sent by API versions that no longer embed the refunds.
pub fn stripe_bare_refund_event(event_id: &str, payment_intent: &str, amount_refunded: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "charge.refunded",
        "data": {"object": {
            "id": format!("ch_{payment_intent}"),
            "object": "charge",
            "payment_intent": payment_intent,
            "amount_refunded": amount_refunded
        }}
    }))
    .unwrap()
}
