//! Payment provider adapters.
//!
//! Every merchant sells through exactly one provider. A [`PaymentProvider`]
//! exposes the operator capabilities (sold tickets, orders at a slot, pass
//! items, refund, transfer, manual entry) and the hooks the webhook pipeline
//! needs (signature check, event parsing, order hydration).
//!
//! [`ProviderRegistry::for_config`] is the only place that branches on
//! [`PaymentType`]. Store-backed capabilities are shared through
//! [`LocalBook`]; the provider-specific parts talk to the remote APIs through
//! the [`PayPalApi`] and [`StripeApi`] traits so tests can swap them out.

pub mod book;
pub mod paypal;
pub mod paypal_api;
pub mod stripe;
pub mod stripe_api;

pub use book::LocalBook;
pub use paypal::PayPalProvider;
pub use paypal_api::{HttpPayPalApi, PayPalApi};
pub use stripe::StripeProvider;
pub use stripe_api::{HttpStripeApi, StripeApi};

use crate::metrics;
use crate::transfer::BatchTransferError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use slotledger_core::merchant::{MerchantConfig, MerchantError, PaymentType};
use slotledger_core::order::{CaptureStatus, NewOrder, OrderSummary, Outcome, PassItems, SoldTickets};
use slotledger_core::store::StoreError;
use slotledger_core::transfer::{TransferRecord, TransferRequest};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors from provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Webhook signature missing or invalid.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Body or remote payload does not have the expected shape.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Provider answered with an error status.
    #[error("{provider} returned {status}: {message}")]
    Remote {
        /// Provider called.
        provider: PaymentType,
        /// HTTP status.
        status: u16,
        /// Response body or decode failure.
        message: String,
    },

    /// Provider could not be reached or timed out.
    #[error("{provider} unreachable: {message}")]
    Transport {
        /// Provider called.
        provider: PaymentType,
        /// Client error.
        message: String,
    },

    /// Merchant settings cannot support the operation.
    #[error("Misconfigured merchant: {0}")]
    Misconfigured(String),

    /// Order or line item does not exist for this merchant.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of resource.
        resource: &'static str,
        /// Its id.
        id: String,
    },

    /// Operator request cannot be applied.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Storage failure or rejection.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transfer batch stopped early.
    #[error(transparent)]
    Transfer(#[from] BatchTransferError),

    /// Merchant lookup failed.
    #[error(transparent)]
    Merchant(#[from] MerchantError),
}

impl ProviderError {
    /// `true` when the failure lies with the remote provider, not the request.
    #[must_use]
    pub const fn is_dependency_failure(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Transport { .. })
    }
}

/// Boxed future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operator refund request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    /// Order to refund.
    pub order_id: String,
    /// Items to refund; empty means every active item.
    #[serde(default)]
    pub line_item_ids: Vec<String>,
}

/// Result of an operator refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundConfirmation {
    /// Provider refund id.
    pub refund_id: String,
    /// Refunded order.
    pub order_id: String,
    /// Amount refunded in cents.
    pub amount_cents: i64,
    /// Items covered.
    pub line_item_ids: Vec<String>,
    /// Whether the refund was new.
    pub outcome: Outcome,
}

/// Sale entered by staff outside any provider checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntry {
    /// Product sold.
    pub product_id: i64,
    /// Departure, epoch seconds.
    pub timestamp: i64,
    /// Sales channel label (phone, walk-up, comp).
    #[serde(rename = "entry", default = "default_entry_type")]
    pub entry_type: String,
    /// Ticket category, e.g. `AM`.
    #[serde(alias = "ticket")]
    pub ticket_type: String,
    /// Tickets sold.
    pub quantity: u32,
    /// Display name for the line item.
    #[serde(rename = "desc", default)]
    pub description: String,
    /// Buyer name.
    pub name: String,
    /// Buyer email.
    pub email: String,
    /// Buyer phone.
    #[serde(default)]
    pub phone: Option<String>,
    /// Price per ticket in cents.
    #[serde(default)]
    pub unit_amount_cents: i64,
}

fn default_entry_type() -> String {
    "manual".to_string()
}

/// Identifiers of a recorded manual entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualEntryReceipt {
    /// Synthetic order id.
    pub order_id: String,
    /// Line item id.
    pub line_item_id: String,
    /// Encoded slot SKU.
    pub sku: String,
    /// Tickets recorded.
    pub quantity: u32,
}

/// Request headers relevant to webhook verification, case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct WebhookHeaders {
    pairs: Vec<(String, String)>,
}

impl WebhookHeaders {
    /// Empty header set.
    #[must_use]
    pub const fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Adds a header.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((name.into(), value.into()));
        self
    }

    /// First value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Value of `name`, failing verification when absent.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Authentication`] when the header is missing.
    pub fn require(&self, name: &str) -> Result<&str, ProviderError> {
        self.get(name)
            .ok_or_else(|| ProviderError::Authentication(format!("Missing {name} header")))
    }
}

impl FromIterator<(String, String)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// How to find an order at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderLocator {
    /// By provider order id (`PayPal` order, Stripe checkout session).
    Order(String),
    /// By a capture belonging to the order (`PayPal` capture, Stripe payment intent).
    Capture(String),
}

/// Capture announced by a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    /// Provider capture id.
    pub id: String,
    /// Parent order, when the payload names it.
    pub order_id: Option<String>,
    /// Capture state.
    pub status: CaptureStatus,
    /// Captured amount in cents.
    pub amount_cents: i64,
    /// ISO currency.
    pub currency: String,
    /// Provider timestamp.
    pub created_at: Option<DateTime<Utc>>,
}

/// Refund announced by a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundEvent {
    /// Provider refund id.
    pub id: String,
    /// Capture refunded.
    pub capture_id: String,
    /// Parent order, when the payload names it.
    pub order_id: Option<String>,
    /// Refunded amount in cents.
    pub amount_cents: i64,
}

/// What a webhook is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// A capture changed state.
    Capture(CaptureEvent),
    /// A checkout finished; the order must be fetched to see its items.
    CheckoutCompleted {
        /// Order id, when known before fetching.
        order_id: Option<String>,
        /// Where to fetch it.
        locator: OrderLocator,
    },
    /// Money went back to the buyer.
    Refund(RefundEvent),
    /// Every refund on a capture, oldest first.
    Refunds(Vec<RefundEvent>),
    /// A capture was refunded but the payload does not name the refunds;
    /// they must be fetched with [`PaymentProvider::fetch_refunds`].
    RefundLookup {
        /// Capture refunded.
        capture_id: String,
    },
    /// Payment-level notification kept for audit only.
    Payment {
        /// Provider id.
        id: String,
    },
    /// Anything else.
    Unknown,
}

/// Verified webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    /// Provider event id; the dedup key.
    pub event_id: String,
    /// Provider event type.
    pub event_type: String,
    /// Provider resource type.
    pub resource_type: String,
    /// Provider resource id.
    pub resource_id: Option<String>,
    /// Decoded resource.
    pub resource: Resource,
}

/// One payment backend.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so providers can be selected at runtime as
/// `Arc<dyn PaymentProvider>`.
pub trait PaymentProvider: Send + Sync {
    /// Backend implemented.
    fn payment_type(&self) -> PaymentType;

    /// Active tickets per slot with `from <= trip_at < to`.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Store`] on storage failure.
    fn fetch_sold_tickets<'a>(
        &'a self,
        config: &'a MerchantConfig,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ProviderFuture<'a, Vec<SoldTickets>>;

    /// Line items departing at `trip_at`, with buyer details.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Store`] on storage failure.
    fn fetch_orders_at_slot<'a>(
        &'a self,
        config: &'a MerchantConfig,
        trip_at: DateTime<Utc>,
    ) -> ProviderFuture<'a, Vec<OrderSummary>>;

    /// Ticket items of one order for pass rendering.
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotFound`] if the merchant has no such order.
    fn fetch_pass_items<'a>(
        &'a self,
        config: &'a MerchantConfig,
        order_id: &'a str,
    ) -> ProviderFuture<'a, PassItems>;

    /// Refunds items of an order at the provider and restores their capacity.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidRequest`] for nothing to refund, remote errors
    /// when the provider refuses.
    fn refund<'a>(
        &'a self,
        config: &'a MerchantConfig,
        request: &'a RefundRequest,
    ) -> ProviderFuture<'a, RefundConfirmation>;

    /// Applies transfers in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Transfer`] with the transfers already committed.
    fn transfer<'a>(
        &'a self,
        config: &'a MerchantConfig,
        requests: &'a [TransferRequest],
    ) -> ProviderFuture<'a, Vec<TransferRecord>>;

    /// Records a sale made outside the provider.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidRequest`] for an unencodable slot, capacity
    /// errors under the floor policy.
    fn manual_entry<'a>(
        &'a self,
        config: &'a MerchantConfig,
        entry: &'a ManualEntry,
    ) -> ProviderFuture<'a, ManualEntryReceipt>;

    /// Checks the webhook signature over the raw body.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Authentication`] when the signature does not verify.
    fn verify_webhook<'a>(
        &'a self,
        config: &'a MerchantConfig,
        headers: &'a WebhookHeaders,
        body: &'a [u8],
    ) -> ProviderFuture<'a, ()>;

    /// Parses a verified webhook body.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Malformed`] when the body is not a provider event.
    fn parse_event(&self, body: &[u8]) -> Result<ParsedEvent, ProviderError>;

    /// Fetches an order with its line items and captures from the provider.
    ///
    /// # Errors
    ///
    /// Remote and transport errors; [`ProviderError::Malformed`] for
    /// unexpected payloads.
    fn fetch_order<'a>(
        &'a self,
        config: &'a MerchantConfig,
        locator: &'a OrderLocator,
    ) -> ProviderFuture<'a, NewOrder>;

    /// Refunds issued against a capture, oldest first.
    ///
    /// Providers whose refund notifications always name the refund never
    /// emit [`Resource::RefundLookup`] and keep the empty default.
    ///
    /// # Errors
    ///
    /// Remote and transport errors.
    fn fetch_refunds<'a>(
        &'a self,
        _config: &'a MerchantConfig,
        _capture_id: &'a str,
    ) -> ProviderFuture<'a, Vec<RefundEvent>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// One adapter per payment type.
#[derive(Clone)]
pub struct ProviderRegistry {
    paypal: Arc<dyn PaymentProvider>,
    stripe: Arc<dyn PaymentProvider>,
}

impl ProviderRegistry {
    /// Creates a registry.
    #[must_use]
    pub fn new(paypal: Arc<dyn PaymentProvider>, stripe: Arc<dyn PaymentProvider>) -> Self {
        Self { paypal, stripe }
    }

    /// Adapter for a payment type.
    #[must_use]
    pub fn get(&self, payment_type: PaymentType) -> Arc<dyn PaymentProvider> {
        match payment_type {
            PaymentType::PayPal => self.paypal.clone(),
            PaymentType::Stripe => self.stripe.clone(),
        }
    }

    /// Adapter for a merchant.
    #[must_use]
    pub fn for_config(&self, config: &MerchantConfig) -> Arc<dyn PaymentProvider> {
        self.get(config.payment_type)
    }
}

/// Sends a provider request and decodes a JSON response, recording call metrics.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: PaymentType,
    operation: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let started = Instant::now();
    let result = exchange(provider, operation, request).await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::record_provider_call(
        provider.as_str(),
        operation,
        status,
        started.elapsed().as_secs_f64(),
    );
    result
}

async fn exchange<T: DeserializeOwned>(
    provider: PaymentType,
    operation: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(%provider, operation, error = %e, "Provider request failed");
        ProviderError::Transport {
            provider,
            message: e.to_string(),
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%provider, operation, status = status.as_u16(), body = %body, "Provider returned an error");
        return Err(ProviderError::Remote {
            provider,
            status: status.as_u16(),
            message: body,
        });
    }

    response.json::<T>().await.map_err(|e| ProviderError::Remote {
        provider,
        status: status.as_u16(),
        message: format!("Unexpected response body: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let headers = WebhookHeaders::new().with("Stripe-Signature", "t=1,v1=ab");
        assert_eq!(headers.get("stripe-signature"), Some("t=1,v1=ab"));
        assert!(matches!(
            headers.require("PAYPAL-TRANSMISSION-SIG"),
            Err(ProviderError::Authentication(msg)) if msg.contains("PAYPAL-TRANSMISSION-SIG")
        ));
    }

    #[test]
    fn dependency_failures() {
        let remote = ProviderError::Remote {
            provider: PaymentType::PayPal,
            status: 503,
            message: "down".to_string(),
        };
        assert!(remote.is_dependency_failure());
        assert!(!ProviderError::Malformed("x".to_string()).is_dependency_failure());
    }

    #[test]
    fn manual_entry_accepts_short_field_names() {
        let entry: ManualEntry = serde_json::from_str(
            r#"{"productId":12,"timestamp":1700000000,"ticket":"am","quantity":2,
                "desc":"Sunset cruise","name":"Ada","email":"ada@example.com"}"#,
        )
        .unwrap();
        assert_eq!(entry.ticket_type, "am");
        assert_eq!(entry.entry_type, "manual");
        assert_eq!(entry.description, "Sunset cruise");
        assert_eq!(entry.phone, None);
    }
}
