//! HTTP handlers.
//!
//! - [`webhooks`]: provider notifications
//! - [`merchants`]: operator reads and writes scoped to one merchant
//! - [`capacity`]: ledger inspection and overrides

pub mod capacity;
pub mod merchants;
pub mod webhooks;

use crate::providers::ProviderError;
use crate::webhook::WebhookError;
use chrono::{DateTime, Utc};
use slotledger_core::ledger::CapacityError;
use slotledger_core::store::StoreError;
use slotledger_core::transfer::TransferError;
use slotledger_web::AppError;

/// Instant from an epoch-seconds query or path parameter.
pub(crate) fn epoch(name: &str, seconds: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| AppError::bad_request(format!("{name} is not a valid epoch: {seconds}")))
}

pub(crate) fn capacity_error(err: &CapacityError) -> AppError {
    match err {
        CapacityError::Insufficient { .. } | CapacityError::Cancelled(_) => {
            AppError::conflict(err.to_string())
        }
        CapacityError::Storage(_) => AppError::internal(err.to_string()),
    }
}

fn store_error(err: &StoreError) -> AppError {
    match err {
        StoreError::NotFound { resource, id } => AppError::not_found(resource, id),
        StoreError::Capacity(capacity) => capacity_error(capacity),
        StoreError::Storage(_) => AppError::internal(err.to_string()),
    }
}

fn transfer_error(err: &TransferError, message: String) -> AppError {
    match err {
        TransferError::InvalidSku { .. } => AppError::validation(message),
        TransferError::LineItemNotFound(_) => AppError::new(
            axum::http::StatusCode::NOT_FOUND,
            message,
            "NOT_FOUND".to_string(),
        ),
        TransferError::LineItemRefunded(_) | TransferError::Capacity(_) => {
            AppError::conflict(message)
        }
        TransferError::Storage(_) => AppError::internal(message),
    }
}

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::Remote { .. }
            | ProviderError::Transport { .. }
            | ProviderError::Malformed(_) => Self::failed_dependency(err.to_string()),
            ProviderError::Authentication(_) => Self::bad_request(err.to_string()),
            ProviderError::InvalidRequest(_) => Self::validation(err.to_string()),
            ProviderError::NotFound { resource, id } => Self::not_found(resource, id),
            ProviderError::Store(store) => store_error(store),
            ProviderError::Transfer(batch) => transfer_error(&batch.source, err.to_string()),
            ProviderError::Misconfigured(_) | ProviderError::Merchant(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match &err {
            WebhookError::UnknownMerchant(id) => Self::not_found("Merchant", id),
            WebhookError::ProviderMismatch { .. }
            | WebhookError::Verification(_)
            | WebhookError::Malformed(_) => Self::bad_request(err.to_string()),
            WebhookError::Dependency(_) => Self::failed_dependency(err.to_string()),
            WebhookError::Processing(_) => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::BatchTransferError;
    use axum::http::StatusCode;
    use slotledger_core::merchant::PaymentType;

    #[test]
    fn provider_errors_map_to_status() {
        let remote = ProviderError::Remote {
            provider: PaymentType::Stripe,
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(AppError::from(remote).status(), StatusCode::FAILED_DEPENDENCY);

        let missing = ProviderError::NotFound {
            resource: "order",
            id: "ORD1".to_string(),
        };
        assert_eq!(AppError::from(missing).status(), StatusCode::NOT_FOUND);

        let invalid = ProviderError::InvalidRequest("nothing to refund".to_string());
        assert_eq!(AppError::from(invalid).status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn transfer_errors_map_to_status() {
        let batch = |source| {
            ProviderError::Transfer(BatchTransferError {
                line_item_id: "LI1".to_string(),
                applied: Vec::new(),
                source,
            })
        };
        assert_eq!(
            AppError::from(batch(TransferError::LineItemRefunded("LI1".to_string()))).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(batch(TransferError::LineItemNotFound("LI1".to_string()))).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn webhook_errors_map_to_status() {
        assert_eq!(
            AppError::from(WebhookError::Verification("bad".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(WebhookError::UnknownMerchant("M9".to_string())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(WebhookError::Processing("db".to_string())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
