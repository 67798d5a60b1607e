//! Sale notifications.
//!
//! Sending is best effort: a failed notification is logged and counted but
//! never fails the webhook that triggered it.

use slotledger_core::merchant::MerchantConfig;
use slotledger_core::order::Order;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from a notification channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The channel refused or could not be reached.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Boxed future returned by [`Notifier`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Tells a merchant that an order was placed.
pub trait Notifier: Send + Sync {
    /// Sends the notification for a newly recorded order.
    ///
    /// # Errors
    ///
    /// [`NotifyError::Delivery`] when the channel fails.
    fn order_placed<'a>(&'a self, config: &'a MerchantConfig, order: &'a Order) -> NotifyFuture<'a>;
}

/// Notifier that writes a structured log line per sale.
///
/// Email and SMS delivery are left to whatever consumes these logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn order_placed<'a>(&'a self, config: &'a MerchantConfig, order: &'a Order) -> NotifyFuture<'a> {
        Box::pin(async move {
            let tickets: u32 = order.active_items().map(|item| item.quantity).sum();
            tracing::info!(
                merchant_id = %config.merchant_id,
                order_id = %order.id,
                payer = %order.payer.name,
                tickets,
                email = config.notify_email.as_deref().unwrap_or(""),
                phone = config.notify_phone.as_deref().unwrap_or(""),
                "Order placed"
            );
            Ok(())
        })
    }
}

/// Sends a notification, logging and counting any failure.
pub async fn dispatch(notifier: &dyn Notifier, config: &MerchantConfig, order: &Order) {
    if let Err(e) = notifier.order_placed(config, order).await {
        crate::metrics::record_notification_failed();
        tracing::error!(
            merchant_id = %config.merchant_id,
            order_id = %order.id,
            error = %e,
            "Failed to send order notification"
        );
    }
}
