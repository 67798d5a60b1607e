//! Stripe REST client.

use super::{ProviderFuture, send_json};
use serde::{Deserialize, Serialize};
use slotledger_core::merchant::{MerchantConfig, PaymentType};
use std::collections::HashMap;

/// Paginated Stripe list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List<T> {
    /// Page items.
    pub data: Vec<T>,
    /// More pages follow.
    #[serde(default)]
    pub has_more: bool,
}

/// Product with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeProduct {
    /// Product id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Merchant metadata; `sku` carries the slot SKU.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Product reference, expanded or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductRef {
    /// Expanded product.
    Expanded(StripeProduct),
    /// Bare id.
    Id(String),
}

/// Price of a line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Price id.
    pub id: String,
    /// Cents per unit.
    #[serde(default)]
    pub unit_amount: Option<i64>,
    /// Product sold.
    #[serde(default)]
    pub product: Option<ProductRef>,
}

/// Checkout line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeLineItem {
    /// Line item id.
    pub id: String,
    /// Display text.
    #[serde(default)]
    pub description: String,
    /// Units bought.
    #[serde(default)]
    pub quantity: Option<u32>,
    /// Total in cents.
    #[serde(default)]
    pub amount_total: i64,
    /// Price.
    #[serde(default)]
    pub price: Option<Price>,
}

/// Buyer details collected at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    /// Name.
    #[serde(default)]
    pub name: Option<String>,
    /// Email.
    #[serde(default)]
    pub email: Option<String>,
    /// Phone.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Session id.
    pub id: String,
    /// Payment intent created by the session.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    #[serde(default)]
    pub payment_status: String,
    /// Total in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Lowercase ISO currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Creation time, epoch seconds.
    #[serde(default)]
    pub created: Option<i64>,
    /// Customer id.
    #[serde(default)]
    pub customer: Option<String>,
    /// Buyer.
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    /// Line items, when expanded.
    #[serde(default)]
    pub line_items: Option<List<StripeLineItem>>,
}

/// Payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Intent id.
    pub id: String,
    /// Intent state.
    #[serde(default)]
    pub status: String,
    /// Amount in cents.
    #[serde(default)]
    pub amount: i64,
    /// Group tying the split payout transfers to this payment.
    #[serde(default)]
    pub transfer_group: Option<String>,
}

/// Payout to a connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeTransfer {
    /// Transfer id.
    pub id: String,
    /// Amount in cents.
    pub amount: i64,
    /// Already reversed, in cents.
    #[serde(default)]
    pub amount_reversed: i64,
    /// Receiving account.
    pub destination: String,
}

/// Reversal of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReversal {
    /// Reversal id.
    pub id: String,
    /// Amount in cents.
    pub amount: i64,
}

/// Refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeRefund {
    /// Refund id.
    pub id: String,
    /// Amount in cents.
    pub amount: i64,
    /// Refund state.
    #[serde(default)]
    pub status: Option<String>,
}

impl StripeRefund {
    /// `false` once Stripe gave up on the refund; no money went back.
    #[must_use]
    pub fn is_effective(&self) -> bool {
        !matches!(self.status.as_deref(), Some("failed" | "canceled"))
    }
}

/// Remote Stripe operations.
pub trait StripeApi: Send + Sync {
    /// Session with line items and their products expanded.
    fn get_checkout_session<'a>(
        &'a self,
        config: &'a MerchantConfig,
        session_id: &'a str,
    ) -> ProviderFuture<'a, CheckoutSession>;

    /// Session that created a payment intent, line items expanded.
    fn find_checkout_session<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, Option<CheckoutSession>>;

    /// `GET /v1/payment_intents/{id}`.
    fn get_payment_intent<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, PaymentIntent>;

    /// Transfers in a transfer group.
    fn list_transfers<'a>(
        &'a self,
        config: &'a MerchantConfig,
        transfer_group: &'a str,
    ) -> ProviderFuture<'a, Vec<StripeTransfer>>;

    /// `POST /v1/transfers/{id}/reversals`.
    fn reverse_transfer<'a>(
        &'a self,
        config: &'a MerchantConfig,
        transfer_id: &'a str,
        amount_cents: i64,
    ) -> ProviderFuture<'a, TransferReversal>;

    /// `POST /v1/refunds`.
    fn create_refund<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
        amount_cents: i64,
    ) -> ProviderFuture<'a, StripeRefund>;

    /// Refunds issued against a payment intent, newest first.
    fn list_refunds<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, Vec<StripeRefund>>;
}

const EXPAND_LINE_ITEMS: (&str, &str) = ("expand[]", "line_items.data.price.product");

/// reqwest-backed [`StripeApi`].
pub struct HttpStripeApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStripeApi {
    /// Creates a client. `client` should carry the provider timeout.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Request on the platform account.
    fn platform(
        &self,
        method: reqwest::Method,
        config: &MerchantConfig,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, super::ProviderError> {
        let settings = config.stripe()?;
        Ok(self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&settings.secret_key))
    }

    /// Request on the account the checkout ran on.
    fn checkout_account(
        &self,
        method: reqwest::Method,
        config: &MerchantConfig,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, super::ProviderError> {
        let request = self.platform(method, config, path)?;
        Ok(match config.stripe()?.connected_account.as_deref() {
            Some(account) => request.header("Stripe-Account", account),
            None => request,
        })
    }
}

impl StripeApi for HttpStripeApi {
    fn get_checkout_session<'a>(
        &'a self,
        config: &'a MerchantConfig,
        session_id: &'a str,
    ) -> ProviderFuture<'a, CheckoutSession> {
        Box::pin(async move {
            let request = self
                .checkout_account(
                    reqwest::Method::GET,
                    config,
                    &format!("/v1/checkout/sessions/{session_id}"),
                )?
                .query(&[EXPAND_LINE_ITEMS]);
            send_json(PaymentType::Stripe, "get_checkout_session", request).await
        })
    }

    fn find_checkout_session<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, Option<CheckoutSession>> {
        Box::pin(async move {
            let request = self
                .checkout_account(reqwest::Method::GET, config, "/v1/checkout/sessions")?
                .query(&[("payment_intent", payment_intent), ("limit", "1")]);
            let sessions: List<CheckoutSession> =
                send_json(PaymentType::Stripe, "list_checkout_sessions", request).await?;
            match sessions.data.into_iter().next() {
                Some(session) => self.get_checkout_session(config, &session.id).await.map(Some),
                None => Ok(None),
            }
        })
    }

    fn get_payment_intent<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, PaymentIntent> {
        Box::pin(async move {
            let request = self.checkout_account(
                reqwest::Method::GET,
                config,
                &format!("/v1/payment_intents/{payment_intent}"),
            )?;
            send_json(PaymentType::Stripe, "get_payment_intent", request).await
        })
    }

    fn list_transfers<'a>(
        &'a self,
        config: &'a MerchantConfig,
        transfer_group: &'a str,
    ) -> ProviderFuture<'a, Vec<StripeTransfer>> {
        Box::pin(async move {
            let request = self
                .platform(reqwest::Method::GET, config, "/v1/transfers")?
                .query(&[("transfer_group", transfer_group), ("limit", "100")]);
            let transfers: List<StripeTransfer> =
                send_json(PaymentType::Stripe, "list_transfers", request).await?;
            Ok(transfers.data)
        })
    }

    fn reverse_transfer<'a>(
        &'a self,
        config: &'a MerchantConfig,
        transfer_id: &'a str,
        amount_cents: i64,
    ) -> ProviderFuture<'a, TransferReversal> {
        Box::pin(async move {
            let request = self
                .platform(
                    reqwest::Method::POST,
                    config,
                    &format!("/v1/transfers/{transfer_id}/reversals"),
                )?
                .form(&[("amount", amount_cents.to_string())]);
            send_json(PaymentType::Stripe, "reverse_transfer", request).await
        })
    }

    fn create_refund<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
        amount_cents: i64,
    ) -> ProviderFuture<'a, StripeRefund> {
        Box::pin(async move {
            let request = self
                .checkout_account(reqwest::Method::POST, config, "/v1/refunds")?
                .form(&[
                    ("payment_intent", payment_intent.to_string()),
                    ("amount", amount_cents.to_string()),
                ]);
            send_json(PaymentType::Stripe, "create_refund", request).await
        })
    }

    fn list_refunds<'a>(
        &'a self,
        config: &'a MerchantConfig,
        payment_intent: &'a str,
    ) -> ProviderFuture<'a, Vec<StripeRefund>> {
        Box::pin(async move {
            let request = self
                .checkout_account(reqwest::Method::GET, config, "/v1/refunds")?
                .query(&[("payment_intent", payment_intent), ("limit", "100")]);
            let refunds: List<StripeRefund> =
                send_json(PaymentType::Stripe, "list_refunds", request).await?;
            Ok(refunds.data)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn product_reference_expanded_or_bare() {
        let expanded: Price = serde_json::from_str(
            r#"{"id":"price_1","unit_amount":2500,
                "product":{"id":"prod_1","name":"Sunset cruise","metadata":{"sku":"12AM1700000000"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            expanded.product,
            Some(ProductRef::Expanded(ref p)) if p.metadata["sku"] == "12AM1700000000"
        ));

        let bare: Price = serde_json::from_str(r#"{"id":"price_1","product":"prod_1"}"#).unwrap();
        assert_eq!(bare.product, Some(ProductRef::Id("prod_1".to_string())));
    }
}
