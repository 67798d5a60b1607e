//! Webhook ingestion.
//!
//! One delivery goes through:
//!
//! 1. merchant lookup and provider check
//! 2. signature verification (`no verify` on failure, nothing else written)
//! 3. parsing (`malformed` on failure, raw body kept)
//! 4. logging by provider event id; a redelivery of a settled event stops here
//! 5. applying the resource through the idempotent store writes
//! 6. notifying the merchant when an order was recorded for the first time
//! 7. recording the final status
//!
//! Provider retries are safe at every step: the event log dedups by event
//! id and every store write dedups by resource id.

use crate::metrics;
use crate::notifier::{self, Notifier};
use crate::providers::{
    CaptureEvent, OrderLocator, ParsedEvent, PaymentProvider, ProviderError, ProviderRegistry,
    RefundEvent, Resource, WebhookHeaders,
};
use slotledger_core::codec::ItemKind;
use slotledger_core::environment::Clock;
use slotledger_core::ledger::CapacityPolicy;
use slotledger_core::merchant::{MerchantConfig, MerchantDirectory, PaymentType};
use slotledger_core::order::{Capture, CaptureStatus, NewOrder, Order, Outcome, RefundRecord};
use slotledger_core::store::{EventStatus, OrderStore, WebhookEvent, WebhookEventLog};
use std::sync::Arc;
use thiserror::Error;

/// Why a delivery was refused or failed.
#[derive(Error, Debug)]
pub enum WebhookError {
    /// No merchant with this id.
    #[error("Unknown merchant {0}")]
    UnknownMerchant(String),

    /// Merchant sells through another provider.
    #[error("Merchant {merchant_id} does not accept {provider} webhooks")]
    ProviderMismatch {
        /// Merchant addressed.
        merchant_id: String,
        /// Provider of the endpoint.
        provider: PaymentType,
    },

    /// Signature did not verify.
    #[error("Webhook verification failed: {0}")]
    Verification(String),

    /// Body is not a provider event.
    #[error("Malformed webhook: {0}")]
    Malformed(String),

    /// Provider API failed while verifying or hydrating; the provider should retry.
    #[error("Provider dependency failed: {0}")]
    Dependency(ProviderError),

    /// Storage or processing failure.
    #[error("Webhook processing failed: {0}")]
    Processing(String),
}

/// Final state of an accepted delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Resource applied.
    Processed,
    /// Event or resource seen before.
    Duplicate,
    /// Resource type not handled.
    Ignored,
}

impl WebhookOutcome {
    /// Event log status for this outcome.
    #[must_use]
    pub const fn status(self) -> EventStatus {
        match self {
            Self::Processed => EventStatus::Processed,
            Self::Duplicate => EventStatus::Duplicate,
            Self::Ignored => EventStatus::Ignored,
        }
    }

    const fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Applied => Self::Processed,
            Outcome::AlreadyProcessed => Self::Duplicate,
        }
    }
}

/// Webhook ingestion service.
#[derive(Clone)]
pub struct WebhookPipeline {
    merchants: Arc<dyn MerchantDirectory>,
    events: Arc<dyn WebhookEventLog>,
    orders: Arc<dyn OrderStore>,
    providers: ProviderRegistry,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

/// What applying a resource produced.
struct Applied {
    outcome: WebhookOutcome,
    notify: Option<Order>,
}

impl Applied {
    const fn quiet(outcome: WebhookOutcome) -> Self {
        Self {
            outcome,
            notify: None,
        }
    }
}

fn slot_tickets(order: &NewOrder) -> u64 {
    order
        .line_items
        .iter()
        .filter(|item| matches!(item.kind(), ItemKind::Slot(_)))
        .map(|item| u64::from(item.quantity))
        .sum()
}

impl WebhookPipeline {
    /// Creates the pipeline.
    #[must_use]
    pub fn new(
        merchants: Arc<dyn MerchantDirectory>,
        events: Arc<dyn WebhookEventLog>,
        orders: Arc<dyn OrderStore>,
        providers: ProviderRegistry,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            merchants,
            events,
            orders,
            providers,
            notifier,
            clock,
        }
    }

    /// Processes one delivery.
    ///
    /// # Errors
    ///
    /// [`WebhookError`]; [`WebhookError::Dependency`] and
    /// [`WebhookError::Processing`] leave the event `failed` so a provider
    /// retry reprocesses it.
    #[allow(clippy::too_many_lines)]
    #[tracing::instrument(skip(self, headers, body), fields(body_len = body.len()))]
    pub async fn handle(
        &self,
        provider: PaymentType,
        merchant_id: &str,
        headers: &WebhookHeaders,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookError> {
        let config = self
            .merchants
            .merchant(merchant_id)
            .await
            .map_err(|e| WebhookError::Processing(e.to_string()))?
            .ok_or_else(|| WebhookError::UnknownMerchant(merchant_id.to_string()))?;
        if config.payment_type != provider {
            return Err(WebhookError::ProviderMismatch {
                merchant_id: merchant_id.to_string(),
                provider,
            });
        }

        let adapter = self.providers.get(provider);
        let raw = String::from_utf8_lossy(body).into_owned();
        let unidentified = WebhookEvent {
            provider,
            merchant_id: merchant_id.to_string(),
            event_id: None,
            event_type: None,
            resource_type: None,
            resource_id: None,
            body: raw,
            received_at: self.clock.now(),
        };

        if let Err(e) = adapter.verify_webhook(&config, headers, body).await {
            if e.is_dependency_failure() {
                self.log_rejected(&unidentified, EventStatus::Failed).await;
                metrics::record_webhook(provider.as_str(), "failed");
                return Err(WebhookError::Dependency(e));
            }
            tracing::warn!(%provider, merchant_id, error = %e, "Webhook signature rejected");
            self.log_rejected(&unidentified, EventStatus::NoVerify).await;
            metrics::record_webhook(provider.as_str(), "no_verify");
            return Err(WebhookError::Verification(e.to_string()));
        }

        let event = match adapter.parse_event(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%provider, merchant_id, error = %e, "Webhook body rejected");
                self.log_rejected(&unidentified, EventStatus::Malformed).await;
                metrics::record_webhook(provider.as_str(), "malformed");
                return Err(WebhookError::Malformed(e.to_string()));
            }
        };

        let logged = WebhookEvent {
            event_id: Some(event.event_id.clone()),
            event_type: Some(event.event_type.clone()),
            resource_type: Some(event.resource_type.clone()),
            resource_id: event.resource_id.clone(),
            ..unidentified
        };
        let record = self
            .events
            .record(&logged, EventStatus::Received)
            .await
            .map_err(|e| WebhookError::Processing(e.to_string()))?;
        if record.previous.is_some_and(EventStatus::is_settled) {
            tracing::info!(event_id = %event.event_id, "Webhook event already handled");
            metrics::record_webhook(provider.as_str(), "duplicate");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.apply(&config, adapter.as_ref(), &event).await {
            Ok(applied) => {
                if let Some(order) = &applied.notify {
                    notifier::dispatch(self.notifier.as_ref(), &config, order).await;
                }
                self.events
                    .set_status(record.log_id, applied.outcome.status(), None)
                    .await
                    .map_err(|e| WebhookError::Processing(e.to_string()))?;
                metrics::record_webhook(provider.as_str(), applied.outcome.status().as_str());
                tracing::info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    outcome = ?applied.outcome,
                    "Webhook processed"
                );
                Ok(applied.outcome)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %message,
                    "Webhook processing failed"
                );
                if let Err(log_err) = self
                    .events
                    .set_status(record.log_id, EventStatus::Failed, Some(&message))
                    .await
                {
                    tracing::error!(error = %log_err, "Failed to mark webhook event failed");
                }
                metrics::record_webhook(provider.as_str(), "failed");
                Err(if e.is_dependency_failure() {
                    WebhookError::Dependency(e)
                } else if let ProviderError::Malformed(msg) = e {
                    WebhookError::Malformed(msg)
                } else {
                    WebhookError::Processing(message)
                })
            }
        }
    }

    async fn log_rejected(&self, event: &WebhookEvent, status: EventStatus) {
        if let Err(e) = self.events.record(event, status).await {
            tracing::error!(error = %e, status = status.as_str(), "Failed to log rejected webhook");
        }
    }

    async fn apply(
        &self,
        config: &MerchantConfig,
        adapter: &dyn PaymentProvider,
        event: &ParsedEvent,
    ) -> Result<Applied, ProviderError> {
        match &event.resource {
            Resource::Capture(capture) => self.apply_capture(config, adapter, capture).await,
            Resource::CheckoutCompleted { order_id, locator } => {
                if let Some(order_id) = order_id {
                    if self.orders.find_order(order_id).await?.is_some() {
                        return Ok(Applied::quiet(WebhookOutcome::Duplicate));
                    }
                }
                self.hydrate(config, adapter, locator, None).await
            }
            Resource::Refund(refund) => self.apply_refund(config, adapter, refund).await,
            Resource::Refunds(refunds) => self.apply_refunds(config, adapter, refunds).await,
            Resource::RefundLookup { capture_id } => {
                let refunds = adapter.fetch_refunds(config, capture_id).await?;
                self.apply_refunds(config, adapter, &refunds).await
            }
            Resource::Payment { id } => {
                tracing::debug!(payment_id = %id, "Payment notification kept for audit");
                Ok(Applied::quiet(WebhookOutcome::Processed))
            }
            Resource::Unknown => Ok(Applied::quiet(WebhookOutcome::Ignored)),
        }
    }

    async fn apply_capture(
        &self,
        config: &MerchantConfig,
        adapter: &dyn PaymentProvider,
        event: &CaptureEvent,
    ) -> Result<Applied, ProviderError> {
        let order_id = match &event.order_id {
            Some(id) => Some(id.clone()),
            None => self.orders.find_capture_order(&event.id).await?,
        };

        let known = match &order_id {
            Some(id) => self.orders.find_order(id).await?.is_some(),
            None => false,
        };

        if known {
            let now = self.clock.now();
            let capture = Capture {
                id: event.id.clone(),
                order_id: order_id.unwrap_or_default(),
                status: event.status,
                amount_cents: event.amount_cents,
                currency: event.currency.clone(),
                created_at: event.created_at.unwrap_or(now),
                updated_at: now,
            };
            let outcome = self.orders.record_capture(&capture).await?;
            return Ok(Applied::quiet(WebhookOutcome::from_outcome(outcome)));
        }

        if event.status != CaptureStatus::Completed {
            tracing::info!(
                capture_id = %event.id,
                status = %event.status,
                "Capture for an unknown order is not completed; not hydrating"
            );
            return Ok(Applied::quiet(WebhookOutcome::Ignored));
        }

        let locator = order_id.map_or_else(
            || OrderLocator::Capture(event.id.clone()),
            OrderLocator::Order,
        );
        self.hydrate(config, adapter, &locator, Some(event)).await
    }

    /// Fetches an order from the provider and records it with its sale.
    async fn hydrate(
        &self,
        config: &MerchantConfig,
        adapter: &dyn PaymentProvider,
        locator: &OrderLocator,
        capture: Option<&CaptureEvent>,
    ) -> Result<Applied, ProviderError> {
        let mut order = adapter.fetch_order(config, locator).await?;
        order.merchant_id.clone_from(&config.merchant_id);
        if let Some(event) = capture {
            if !order.captures.iter().any(|c| c.id == event.id) {
                let now = self.clock.now();
                order.captures.push(Capture {
                    id: event.id.clone(),
                    order_id: order.id.clone(),
                    status: event.status,
                    amount_cents: event.amount_cents,
                    currency: event.currency.clone(),
                    created_at: event.created_at.unwrap_or(now),
                    updated_at: now,
                });
            }
        }

        let outcome = self.orders.record_order(&order, CapacityPolicy::Blind).await?;
        if !outcome.is_applied() {
            return Ok(Applied::quiet(WebhookOutcome::Duplicate));
        }

        metrics::record_capacity_change("sale");
        metrics::record_tickets("sold", slot_tickets(&order));
        tracing::info!(
            merchant_id = %config.merchant_id,
            order_id = %order.id,
            items = order.line_items.len(),
            "Order recorded"
        );

        let stored = self.orders.find_order(&order.id).await?;
        Ok(Applied {
            outcome: WebhookOutcome::Processed,
            notify: stored,
        })
    }

    /// Applies each refund in order. Refunds recorded earlier, by an operator
    /// refund or a previous delivery, are skipped by id.
    async fn apply_refunds(
        &self,
        config: &MerchantConfig,
        adapter: &dyn PaymentProvider,
        refunds: &[RefundEvent],
    ) -> Result<Applied, ProviderError> {
        if refunds.is_empty() {
            tracing::warn!(merchant_id = %config.merchant_id, "Refund notification names no refund");
            return Ok(Applied::quiet(WebhookOutcome::Ignored));
        }
        let mut outcome = WebhookOutcome::Duplicate;
        for refund in refunds {
            if self.apply_refund(config, adapter, refund).await?.outcome == WebhookOutcome::Processed
            {
                outcome = WebhookOutcome::Processed;
            }
        }
        Ok(Applied::quiet(outcome))
    }

    async fn apply_refund(
        &self,
        config: &MerchantConfig,
        adapter: &dyn PaymentProvider,
        event: &RefundEvent,
    ) -> Result<Applied, ProviderError> {
        let known = match &event.order_id {
            Some(id) => self
                .orders
                .find_order(id)
                .await?
                .map(|order| order.id),
            None => self.orders.find_capture_order(&event.capture_id).await?,
        };

        let order_id = if let Some(id) = known {
            id
        } else {
            // Sale never reached us: record it before refunding.
            let locator = OrderLocator::Capture(event.capture_id.clone());
            let mut order = adapter.fetch_order(config, &locator).await?;
            order.merchant_id.clone_from(&config.merchant_id);
            if self.orders.record_order(&order, CapacityPolicy::Blind).await?.is_applied() {
                metrics::record_capacity_change("sale");
                metrics::record_tickets("sold", slot_tickets(&order));
            }
            order.id
        };

        let refund = RefundRecord {
            id: event.id.clone(),
            capture_id: event.capture_id.clone(),
            order_id,
            amount_cents: event.amount_cents,
            line_item_ids: Vec::new(),
            created_at: self.clock.now(),
        };
        let outcome = self.orders.record_refund(&refund).await?;

        if outcome.is_applied() {
            metrics::record_refund(config.payment_type.as_str(), refund.amount_cents);
            metrics::record_capacity_change("refund");
        }
        tracing::info!(
            order_id = %refund.order_id,
            refund_id = %refund.id,
            ?outcome,
            "Refund webhook applied"
        );
        Ok(Applied::quiet(WebhookOutcome::from_outcome(outcome)))
    }
}
