//! Merchant configuration and provider selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;

/// Payment backend a merchant sells through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    /// `PayPal` checkout orders.
    PayPal,
    /// Stripe checkout sessions with connected-account transfers.
    Stripe,
}

impl PaymentType {
    /// Configuration and URL spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PayPal => "paypal",
            Self::Stripe => "stripe",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = MerchantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "paypal" => Ok(Self::PayPal),
            "stripe" => Ok(Self::Stripe),
            other => Err(MerchantError::UnknownPaymentType(other.to_string())),
        }
    }
}

/// `PayPal` REST credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayPalSettings {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Webhook id the notifications are signed for.
    pub webhook_id: String,
}

impl fmt::Debug for PayPalSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayPalSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("webhook_id", &self.webhook_id)
            .finish()
    }
}

fn default_secondary_share() -> i64 {
    500
}

/// Stripe credentials and payout split.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeSettings {
    /// Platform secret key.
    pub secret_key: String,
    /// Webhook endpoint signing secret (`whsec_...`).
    pub webhook_secret: String,
    /// Connected account the checkout ran on, if any.
    #[serde(default)]
    pub connected_account: Option<String>,
    /// Account receiving the ticket revenue.
    #[serde(default)]
    pub primary_account: Option<String>,
    /// Account receiving a fixed share per ticket.
    #[serde(default)]
    pub secondary_account: Option<String>,
    /// Account receiving booking fees; never reversed on refund.
    #[serde(default)]
    pub fee_account: Option<String>,
    /// Cents per ticket routed to the secondary account.
    #[serde(default = "default_secondary_share")]
    pub secondary_share_cents: i64,
}

impl fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeSettings")
            .field("secret_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("connected_account", &self.connected_account)
            .field("primary_account", &self.primary_account)
            .field("secondary_account", &self.secondary_account)
            .field("fee_account", &self.fee_account)
            .field("secondary_share_cents", &self.secondary_share_cents)
            .finish()
    }
}

/// Per-merchant configuration, selected once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantConfig {
    /// Merchant id used in routes and on orders.
    pub merchant_id: String,
    /// Backend that handles this merchant's payments.
    pub payment_type: PaymentType,
    /// Use provider sandbox endpoints.
    pub sandbox: bool,
    /// ISO currency code for refunds.
    pub currency: String,
    /// `PayPal` credentials when `payment_type` is `PayPal`.
    pub paypal: Option<PayPalSettings>,
    /// Stripe credentials when `payment_type` is `Stripe`.
    pub stripe: Option<StripeSettings>,
    /// Address for sale notifications.
    pub notify_email: Option<String>,
    /// Phone for sale notifications.
    pub notify_phone: Option<String>,
}

impl MerchantConfig {
    /// `PayPal` credentials.
    ///
    /// # Errors
    ///
    /// [`MerchantError::MissingCredentials`] if the merchant has none.
    pub fn paypal(&self) -> Result<&PayPalSettings, MerchantError> {
        self.paypal
            .as_ref()
            .ok_or_else(|| MerchantError::MissingCredentials {
                merchant_id: self.merchant_id.clone(),
                payment_type: PaymentType::PayPal,
            })
    }

    /// Stripe credentials.
    ///
    /// # Errors
    ///
    /// [`MerchantError::MissingCredentials`] if the merchant has none.
    pub fn stripe(&self) -> Result<&StripeSettings, MerchantError> {
        self.stripe
            .as_ref()
            .ok_or_else(|| MerchantError::MissingCredentials {
                merchant_id: self.merchant_id.clone(),
                payment_type: PaymentType::Stripe,
            })
    }
}

/// Errors from merchant lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerchantError {
    /// Payment type string not recognised.
    #[error("Unknown payment type: {0}")]
    UnknownPaymentType(String),

    /// Provider credentials missing for the merchant's payment type.
    #[error("Merchant {merchant_id} has no {payment_type} credentials")]
    MissingCredentials {
        /// Merchant.
        merchant_id: String,
        /// Provider whose credentials are missing.
        payment_type: PaymentType,
    },

    /// Backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Boxed future returned by [`MerchantDirectory`].
pub type MerchantFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MerchantError>> + Send + 'a>>;

/// Lookup of merchant configuration.
pub trait MerchantDirectory: Send + Sync {
    /// Configuration for `merchant_id`, if the merchant exists.
    ///
    /// # Errors
    ///
    /// [`MerchantError::Storage`] or [`MerchantError::UnknownPaymentType`] for
    /// a corrupt row.
    fn merchant<'a>(&'a self, merchant_id: &'a str) -> MerchantFuture<'a, Option<MerchantConfig>>;
}
