//! Provider webhook endpoints.
//!
//! - POST /webhooks/paypal/:merchant_id
//! - POST /webhooks/stripe/:merchant_id
//!
//! The raw body is handed to the pipeline untouched; signatures are computed
//! over the exact bytes received.

use crate::providers::WebhookHeaders;
use crate::webhook::{WebhookOutcome, WebhookPipeline};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use slotledger_core::merchant::PaymentType;
use slotledger_web::{AppError, CorrelationId};
use std::sync::Arc;

/// Acknowledgement returned to the provider.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    /// Final event status.
    pub status: &'static str,
}

fn webhook_headers(headers: &HeaderMap) -> WebhookHeaders {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

async fn receive(
    correlation_id: CorrelationId,
    pipeline: &WebhookPipeline,
    provider: PaymentType,
    merchant_id: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    tracing::debug!(
        correlation_id = %correlation_id.0,
        %provider,
        merchant_id,
        bytes = body.len(),
        "Webhook received"
    );
    let outcome: WebhookOutcome = pipeline
        .handle(provider, merchant_id, &webhook_headers(headers), body)
        .await?;
    Ok(Json(WebhookAck {
        status: outcome.status().as_str(),
    }))
}

/// `PayPal` notification endpoint.
pub async fn paypal(
    correlation_id: CorrelationId,
    State(pipeline): State<Arc<WebhookPipeline>>,
    Path(merchant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    receive(
        correlation_id,
        &pipeline,
        PaymentType::PayPal,
        &merchant_id,
        &headers,
        &body,
    )
    .await
}

/// Stripe notification endpoint.
pub async fn stripe(
    correlation_id: CorrelationId,
    State(pipeline): State<Arc<WebhookPipeline>>,
    Path(merchant_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    receive(
        correlation_id,
        &pipeline,
        PaymentType::Stripe,
        &merchant_id,
        &headers,
        &body,
    )
    .await
}
