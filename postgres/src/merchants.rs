//! Merchant configuration rows.

use crate::PostgresStore;
use slotledger_core::merchant::{
    MerchantConfig, MerchantDirectory, MerchantError, MerchantFuture, PayPalSettings, StripeSettings,
};

type MerchantRow = (
    String,
    String,
    bool,
    String,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    Option<String>,
    Option<String>,
);

fn settings<T: serde::de::DeserializeOwned>(
    value: Option<serde_json::Value>,
) -> Result<Option<T>, MerchantError> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| MerchantError::Storage(format!("Invalid provider settings: {e}")))
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<serde_json::Value>, MerchantError> {
    value
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| MerchantError::Storage(format!("Failed to serialize settings: {e}")))
}

impl PostgresStore {
    /// Inserts or replaces a merchant's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MerchantError::Storage`] on database failure.
    pub async fn upsert_merchant(&self, config: &MerchantConfig) -> Result<(), MerchantError> {
        sqlx::query(
            r"
            INSERT INTO merchant_configs
                (merchant_id, payment_type, sandbox, currency, paypal, stripe, notify_email, notify_phone)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (merchant_id) DO UPDATE SET
                payment_type = EXCLUDED.payment_type,
                sandbox = EXCLUDED.sandbox,
                currency = EXCLUDED.currency,
                paypal = EXCLUDED.paypal,
                stripe = EXCLUDED.stripe,
                notify_email = EXCLUDED.notify_email,
                notify_phone = EXCLUDED.notify_phone,
                updated_at = now()
            ",
        )
        .bind(&config.merchant_id)
        .bind(config.payment_type.as_str())
        .bind(config.sandbox)
        .bind(&config.currency)
        .bind(to_json(config.paypal.as_ref())?)
        .bind(to_json(config.stripe.as_ref())?)
        .bind(config.notify_email.as_deref())
        .bind(config.notify_phone.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| MerchantError::Storage(format!("Failed to save merchant: {e}")))?;

        Ok(())
    }
}

impl MerchantDirectory for PostgresStore {
    fn merchant<'a>(&'a self, merchant_id: &'a str) -> MerchantFuture<'a, Option<MerchantConfig>> {
        Box::pin(async move {
            let row: Option<MerchantRow> = sqlx::query_as(
                r"
                SELECT merchant_id, payment_type, sandbox, currency, paypal, stripe, notify_email, notify_phone
                FROM merchant_configs
                WHERE merchant_id = $1
                ",
            )
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MerchantError::Storage(format!("Failed to load merchant: {e}")))?;

            let Some((merchant_id, payment_type, sandbox, currency, paypal, stripe, notify_email, notify_phone)) =
                row
            else {
                return Ok(None);
            };

            Ok(Some(MerchantConfig {
                merchant_id,
                payment_type: payment_type.parse()?,
                sandbox,
                currency,
                paypal: settings::<PayPalSettings>(paypal)?,
                stripe: settings::<StripeSettings>(stripe)?,
                notify_email,
                notify_phone,
            }))
        })
    }
}
