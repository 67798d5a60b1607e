//! `PayPal` REST client.
//!
//! Only the endpoints the engine needs: webhook signature verification,
//! order and capture lookup, and capture refunds. Access tokens come from
//! the OAuth2 client-credentials flow and are cached per client id until
//! shortly before they expire.

use super::{ProviderError, ProviderFuture, send_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotledger_core::merchant::{MerchantConfig, PaymentType};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Decimal money as `PayPal` spells it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Decimal amount, e.g. `"25.00"`.
    pub value: String,
    /// ISO currency.
    pub currency_code: String,
}

/// HATEOAS link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Target URL.
    pub href: String,
    /// Relation, e.g. `up`.
    pub rel: String,
}

fn last_segment_of_up_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|link| link.rel == "up")
        .and_then(|link| link.href.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

/// Capture resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPalCapture {
    /// Capture id.
    pub id: String,
    /// `COMPLETED`, `PENDING`, `DECLINED`, ...
    pub status: String,
    /// Captured amount.
    #[serde(default)]
    pub amount: Option<Money>,
    /// Links; `up` points at the order.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Creation time.
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

impl PayPalCapture {
    /// Parent order id from the `up` link.
    #[must_use]
    pub fn order_id(&self) -> Option<String> {
        last_segment_of_up_link(&self.links)
    }
}

/// Refund resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPalRefund {
    /// Refund id.
    pub id: String,
    /// Refund state.
    #[serde(default)]
    pub status: String,
    /// Refunded amount.
    #[serde(default)]
    pub amount: Option<Money>,
    /// Links; `up` points at the capture.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl PayPalRefund {
    /// Refunded capture id from the `up` link.
    #[must_use]
    pub fn capture_id(&self) -> Option<String> {
        last_segment_of_up_link(&self.links)
    }
}

/// Purchased item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPalItem {
    /// Display name.
    pub name: String,
    /// Merchant SKU.
    #[serde(default)]
    pub sku: String,
    /// Price per unit.
    #[serde(default)]
    pub unit_amount: Option<Money>,
    /// Quantity as a decimal string.
    pub quantity: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
}

/// Captures under a purchase unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payments {
    /// Captures.
    #[serde(default)]
    pub captures: Vec<PayPalCapture>,
}

/// Purchase unit of an order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseUnit {
    /// Items bought.
    #[serde(default)]
    pub items: Vec<PayPalItem>,
    /// Money movements.
    #[serde(default)]
    pub payments: Option<Payments>,
}

/// Buyer name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerName {
    /// Given name.
    #[serde(default)]
    pub given_name: String,
    /// Surname.
    #[serde(default)]
    pub surname: String,
}

/// National phone number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber {
    /// Digits.
    #[serde(default)]
    pub national_number: String,
}

/// Buyer phone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerPhone {
    /// Number.
    #[serde(default)]
    pub phone_number: PhoneNumber,
}

/// Buyer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPalPayer {
    /// `PayPal` payer id.
    #[serde(default)]
    pub payer_id: String,
    /// Name.
    #[serde(default)]
    pub name: Option<PayerName>,
    /// Email.
    #[serde(default)]
    pub email_address: String,
    /// Phone.
    #[serde(default)]
    pub phone: Option<PayerPhone>,
}

/// Checkout order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPalOrder {
    /// Order id.
    pub id: String,
    /// `CREATED`, `APPROVED`, `COMPLETED`, ...
    #[serde(default)]
    pub status: String,
    /// Purchase units.
    #[serde(default)]
    pub purchase_units: Vec<PurchaseUnit>,
    /// Buyer.
    #[serde(default)]
    pub payer: Option<PayPalPayer>,
    /// Creation time.
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

/// Transmission headers and event for signature verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifySignatureRequest {
    /// `PAYPAL-AUTH-ALGO`.
    pub auth_algo: String,
    /// `PAYPAL-CERT-URL`.
    pub cert_url: String,
    /// `PAYPAL-TRANSMISSION-ID`.
    pub transmission_id: String,
    /// `PAYPAL-TRANSMISSION-SIG`.
    pub transmission_sig: String,
    /// `PAYPAL-TRANSMISSION-TIME`.
    pub transmission_time: String,
    /// Merchant webhook id.
    pub webhook_id: String,
    /// The event exactly as received.
    pub webhook_event: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    amount: &'a Money,
}

/// Remote `PayPal` operations.
pub trait PayPalApi: Send + Sync {
    /// Asks `PayPal` whether a webhook transmission is authentic.
    fn verify_signature<'a>(
        &'a self,
        config: &'a MerchantConfig,
        request: &'a VerifySignatureRequest,
    ) -> ProviderFuture<'a, bool>;

    /// `GET /v2/checkout/orders/{id}`.
    fn get_order<'a>(
        &'a self,
        config: &'a MerchantConfig,
        order_id: &'a str,
    ) -> ProviderFuture<'a, PayPalOrder>;

    /// `GET /v2/payments/captures/{id}`.
    fn get_capture<'a>(
        &'a self,
        config: &'a MerchantConfig,
        capture_id: &'a str,
    ) -> ProviderFuture<'a, PayPalCapture>;

    /// `POST /v2/payments/captures/{id}/refund`.
    fn refund_capture<'a>(
        &'a self,
        config: &'a MerchantConfig,
        capture_id: &'a str,
        amount: &'a Money,
    ) -> ProviderFuture<'a, PayPalRefund>;
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Refresh tokens this long before `PayPal` says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// reqwest-backed [`PayPalApi`].
pub struct HttpPayPalApi {
    client: reqwest::Client,
    live_base_url: String,
    sandbox_base_url: String,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl HttpPayPalApi {
    /// Creates a client. `client` should carry the provider timeout.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        live_base_url: impl Into<String>,
        sandbox_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            live_base_url: live_base_url.into(),
            sandbox_base_url: sandbox_base_url.into(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn base_url(&self, config: &MerchantConfig) -> &str {
        let base = if config.sandbox {
            &self.sandbox_base_url
        } else {
            &self.live_base_url
        };
        base.trim_end_matches('/')
    }

    fn cached_token(&self, client_id: &str) -> Option<String> {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(client_id)
            .filter(|token| token.expires_at > Instant::now())
            .map(|token| token.access_token.clone())
    }

    async fn access_token(&self, config: &MerchantConfig) -> Result<String, ProviderError> {
        let settings = config.paypal()?;
        if let Some(token) = self.cached_token(&settings.client_id) {
            return Ok(token);
        }

        let request = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url(config)))
            .basic_auth(&settings.client_id, Some(&settings.client_secret))
            .form(&[("grant_type", "client_credentials")]);
        let token: TokenResponse = send_json(PaymentType::PayPal, "oauth_token", request).await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                settings.client_id.clone(),
                CachedToken {
                    access_token: token.access_token.clone(),
                    expires_at: Instant::now() + lifetime,
                },
            );
        tracing::debug!(client_id = %settings.client_id, "Fetched PayPal access token");
        Ok(token.access_token)
    }
}

impl PayPalApi for HttpPayPalApi {
    fn verify_signature<'a>(
        &'a self,
        config: &'a MerchantConfig,
        request: &'a VerifySignatureRequest,
    ) -> ProviderFuture<'a, bool> {
        Box::pin(async move {
            let token = self.access_token(config).await?;
            let response: VerifySignatureResponse = send_json(
                PaymentType::PayPal,
                "verify_webhook",
                self.client
                    .post(format!(
                        "{}/v1/notifications/verify-webhook-signature",
                        self.base_url(config)
                    ))
                    .bearer_auth(token)
                    .json(request),
            )
            .await?;
            Ok(response.verification_status == "SUCCESS")
        })
    }

    fn get_order<'a>(
        &'a self,
        config: &'a MerchantConfig,
        order_id: &'a str,
    ) -> ProviderFuture<'a, PayPalOrder> {
        Box::pin(async move {
            let token = self.access_token(config).await?;
            send_json(
                PaymentType::PayPal,
                "get_order",
                self.client
                    .get(format!("{}/v2/checkout/orders/{order_id}", self.base_url(config)))
                    .bearer_auth(token),
            )
            .await
        })
    }

    fn get_capture<'a>(
        &'a self,
        config: &'a MerchantConfig,
        capture_id: &'a str,
    ) -> ProviderFuture<'a, PayPalCapture> {
        Box::pin(async move {
            let token = self.access_token(config).await?;
            send_json(
                PaymentType::PayPal,
                "get_capture",
                self.client
                    .get(format!(
                        "{}/v2/payments/captures/{capture_id}",
                        self.base_url(config)
                    ))
                    .bearer_auth(token),
            )
            .await
        })
    }

    fn refund_capture<'a>(
        &'a self,
        config: &'a MerchantConfig,
        capture_id: &'a str,
        amount: &'a Money,
    ) -> ProviderFuture<'a, PayPalRefund> {
        Box::pin(async move {
            let token = self.access_token(config).await?;
            send_json(
                PaymentType::PayPal,
                "refund_capture",
                self.client
                    .post(format!(
                        "{}/v2/payments/captures/{capture_id}/refund",
                        self.base_url(config)
                    ))
                    .bearer_auth(token)
                    .json(&RefundBody { amount }),
            )
            .await
        })
    }
}
