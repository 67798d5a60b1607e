//! Application state shared by every handler.

use crate::providers::{PaymentProvider, ProviderRegistry};
use crate::stores::Stores;
use crate::webhook::WebhookPipeline;
use axum::extract::FromRef;
use metrics_exporter_prometheus::PrometheusHandle;
use slotledger_core::merchant::{MerchantConfig, MerchantDirectory};
use slotledger_web::AppError;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Storage contracts.
    pub stores: Stores,
    /// Provider adapters by payment type.
    pub providers: ProviderRegistry,
    /// Webhook ingestion.
    pub pipeline: Arc<WebhookPipeline>,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Bearer token guarding `/api`.
    pub admin_token: Option<String>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        stores: Stores,
        providers: ProviderRegistry,
        pipeline: Arc<WebhookPipeline>,
        metrics: Option<PrometheusHandle>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            stores,
            providers,
            pipeline,
            metrics,
            admin_token,
        }
    }

    /// Merchant configuration and its provider adapter.
    ///
    /// # Errors
    ///
    /// 404 for an unknown merchant, 500 when the lookup fails.
    pub async fn merchant(
        &self,
        merchant_id: &str,
    ) -> Result<(MerchantConfig, Arc<dyn PaymentProvider>), AppError> {
        let config = self
            .stores
            .merchants
            .merchant(merchant_id)
            .await
            .map_err(|e| AppError::internal(format!("Failed to load merchant: {e}")))?
            .ok_or_else(|| AppError::not_found("Merchant", merchant_id))?;
        let provider = self.providers.for_config(&config);
        Ok((config, provider))
    }
}

impl FromRef<AppState> for Arc<WebhookPipeline> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.pipeline.clone()
    }
}
