//! Ticket transfers between slots.
//!
//! The storage layer does the atomic work (increment origin, decrement
//! destination, append the log row). This service adds the configured
//! capacity policy, the clock, logging and metrics.

use crate::metrics;
use slotledger_core::environment::Clock;
use slotledger_core::ledger::CapacityPolicy;
use slotledger_core::store::OrderStore;
use slotledger_core::transfer::{TransferError, TransferRecord, TransferRequest};
use std::sync::Arc;
use thiserror::Error;

/// A batch stopped at its first failing transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transfer of {line_item_id} failed after {} applied: {source}", .applied.len())]
pub struct BatchTransferError {
    /// Line item whose transfer failed.
    pub line_item_id: String,
    /// Transfers committed before the failure.
    pub applied: Vec<TransferRecord>,
    /// Why it failed.
    #[source]
    pub source: TransferError,
}

/// Applies operator transfers.
#[derive(Clone)]
pub struct TransferService {
    orders: Arc<dyn OrderStore>,
    clock: Arc<dyn Clock>,
    policy: CapacityPolicy,
}

impl TransferService {
    /// Creates a transfer service.
    #[must_use]
    pub fn new(orders: Arc<dyn OrderStore>, clock: Arc<dyn Clock>, policy: CapacityPolicy) -> Self {
        Self {
            orders,
            clock,
            policy,
        }
    }

    /// Moves one line item to the slot named by `request.new_sku`.
    ///
    /// # Errors
    ///
    /// Any [`TransferError`]; the ledger and transfer log are untouched.
    pub async fn apply(
        &self,
        merchant_id: &str,
        request: &TransferRequest,
    ) -> Result<TransferRecord, TransferError> {
        let applied_at = self.clock.now();
        match self
            .orders
            .apply_transfer(merchant_id, request, self.policy, applied_at)
            .await
        {
            Ok(record) => {
                if request.is_stale_against(&record.old_sku) {
                    tracing::warn!(
                        line_item_id = %record.line_item_id,
                        requested = request.old_sku.as_deref().unwrap_or_default(),
                        effective = %record.old_sku,
                        "Transfer requested from a stale SKU; used the effective one"
                    );
                }
                metrics::record_transfer("applied");
                metrics::record_capacity_change("transfer");
                metrics::record_tickets("transferred", u64::from(record.quantity));
                tracing::info!(
                    merchant_id,
                    line_item_id = %record.line_item_id,
                    from = %record.old_sku,
                    to = %record.new_sku,
                    quantity = record.quantity,
                    "Transfer applied"
                );
                Ok(record)
            }
            Err(e) => {
                metrics::record_transfer("rejected");
                tracing::warn!(
                    merchant_id,
                    line_item_id = %request.line_item_id,
                    new_sku = %request.new_sku,
                    error = %e,
                    "Transfer rejected"
                );
                Err(e)
            }
        }
    }

    /// Applies transfers in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// [`BatchTransferError`] carrying the transfers that were committed
    /// before the failing one.
    pub async fn apply_batch(
        &self,
        merchant_id: &str,
        requests: &[TransferRequest],
    ) -> Result<Vec<TransferRecord>, BatchTransferError> {
        let mut applied = Vec::with_capacity(requests.len());
        for request in requests {
            match self.apply(merchant_id, request).await {
                Ok(record) => applied.push(record),
                Err(source) => {
                    return Err(BatchTransferError {
                        line_item_id: request.line_item_id.clone(),
                        applied,
                        source,
                    });
                }
            }
        }
        Ok(applied)
    }

    /// Transfer log for a line item, oldest first.
    ///
    /// # Errors
    ///
    /// [`TransferError::Storage`] on backend failure.
    pub async fn history(&self, line_item_id: &str) -> Result<Vec<TransferRecord>, TransferError> {
        self.orders
            .transfer_history(line_item_id)
            .await
            .map_err(|e| TransferError::Storage(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use slotledger_core::ledger::{CapacityError, CapacityLedger};
    use slotledger_testing::{InMemoryStore, fixtures, test_clock};

    const FROM: &str = "12AM1700000000";
    const TO: &str = "12AM1700003600";

    fn request(line_item_id: &str, new_sku: &str) -> TransferRequest {
        TransferRequest {
            line_item_id: line_item_id.to_string(),
            old_sku: Some(FROM.to_string()),
            new_sku: new_sku.to_string(),
            new_name: None,
        }
    }

    async fn service(policy: CapacityPolicy) -> (Arc<InMemoryStore>, TransferService) {
        let store = Arc::new(InMemoryStore::with_default_capacity(10));
        let order = fixtures::paid_order("ORD1", "M1", &[(FROM, 3)]);
        store
            .record_order(&order, CapacityPolicy::Blind)
            .await
            .unwrap();
        let service = TransferService::new(store.clone(), Arc::new(test_clock()), policy);
        (store, service)
    }

    #[tokio::test]
    async fn moves_capacity_between_slots() {
        let (store, service) = service(CapacityPolicy::Blind).await;

        let record = service
            .apply("M1", &request("ORD1-12AM1700000000", TO))
            .await
            .unwrap();

        assert_eq!(record.old_sku, FROM);
        assert_eq!(record.quantity, 3);
        assert_eq!(record.applied_at, test_clock().now());
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_000_000)).unwrap().available, 10);
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_003_600)).unwrap().available, 7);
        assert_eq!(service.history("ORD1-12AM1700000000").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_stops_at_first_failure() {
        let (store, service) = service(CapacityPolicy::Blind).await;
        let requests = vec![
            request("ORD1-12AM1700000000", TO),
            request("missing", TO),
            request("ORD1-12AM1700000000", FROM),
        ];

        let err = service.apply_batch("M1", &requests).await.unwrap_err();

        assert_eq!(err.line_item_id, "missing");
        assert_eq!(err.applied.len(), 1);
        assert_eq!(err.source, TransferError::LineItemNotFound("missing".to_string()));
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_003_600)).unwrap().available, 7);
    }

    #[tokio::test]
    async fn floor_policy_rejects_full_destination() {
        let (store, service) = service(CapacityPolicy::Floor).await;
        store
            .set_available(fixtures::slot(12, 1_700_003_600), 2)
            .await
            .unwrap();

        let err = service
            .apply("M1", &request("ORD1-12AM1700000000", TO))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Capacity(CapacityError::Insufficient { requested: 3, .. })
        ));
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_000_000)).unwrap().available, 7);
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_003_600)).unwrap().available, 2);
        assert!(service.history("ORD1-12AM1700000000").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn chained_transfer_releases_the_current_slot() {
        const LAST: &str = "12AM1700007200";
        let (store, service) = service(CapacityPolicy::Blind).await;
        let line_item_id = "ORD1-12AM1700000000";

        service.apply("M1", &request(line_item_id, TO)).await.unwrap();
        let second = TransferRequest {
            old_sku: Some(TO.to_string()),
            ..request(line_item_id, LAST)
        };
        let record = service.apply("M1", &second).await.unwrap();

        assert_eq!(record.old_sku, TO);
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_000_000)).unwrap().available, 10);
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_003_600)).unwrap().available, 10);
        assert_eq!(store.capacity(fixtures::slot(12, 1_700_007_200)).unwrap().available, 7);

        let order = store.find_order("ORD1").await.unwrap().unwrap();
        assert_eq!(order.line_items[0].sku, LAST);
        assert_eq!(order.line_items[0].original_sku, FROM);
        let hops: Vec<(String, String)> = service
            .history(line_item_id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.old_sku, r.new_sku))
            .collect();
        assert_eq!(
            hops,
            [(FROM.to_string(), TO.to_string()), (TO.to_string(), LAST.to_string())]
        );
    }
}
