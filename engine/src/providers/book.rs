//! Store-backed operations shared by every provider.

use super::{ManualEntry, ManualEntryReceipt, ProviderError, RefundConfirmation, RefundRequest};
use crate::metrics;
use crate::transfer::TransferService;
use chrono::{DateTime, Utc};
use slotledger_core::codec::{self, ItemKind};
use slotledger_core::environment::Clock;
use slotledger_core::ledger::CapacityPolicy;
use slotledger_core::merchant::{MerchantConfig, PaymentType};
use slotledger_core::order::{
    Capture, LineItem, LineItemStatus, NewLineItem, NewOrder, Order, OrderSource, OrderStatus,
    OrderSummary, PassItems, Payer, RefundRecord, SoldTickets,
};
use slotledger_core::store::OrderStore;
use slotledger_core::transfer::{TransferRecord, TransferRequest};
use std::sync::Arc;
use uuid::Uuid;

/// Items chosen for an operator refund.
#[derive(Debug, Clone)]
pub struct RefundTarget {
    /// Order refunded.
    pub order: Order,
    /// Capture the refund is issued against.
    pub capture: Capture,
    /// Active items being refunded.
    pub items: Vec<LineItem>,
}

impl RefundTarget {
    /// Sum of the item totals.
    #[must_use]
    pub fn amount_cents(&self) -> i64 {
        self.items.iter().map(LineItem::total_cents).sum()
    }

    /// Ids of the refunded items.
    #[must_use]
    pub fn line_item_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }
}

fn slot_tickets<'a>(items: impl Iterator<Item = &'a LineItem>) -> u64 {
    items
        .filter(|item| matches!(item.kind(), ItemKind::Slot(_)))
        .map(|item| u64::from(item.quantity))
        .sum()
}

/// Local view of a merchant's sales.
#[derive(Clone)]
pub struct LocalBook {
    orders: Arc<dyn OrderStore>,
    transfers: TransferService,
    clock: Arc<dyn Clock>,
    manual_policy: CapacityPolicy,
}

impl LocalBook {
    /// Creates the book. `manual_policy` governs manual-entry decrements.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        transfers: TransferService,
        clock: Arc<dyn Clock>,
        manual_policy: CapacityPolicy,
    ) -> Self {
        Self {
            orders,
            transfers,
            clock,
            manual_policy,
        }
    }

    /// Current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Active tickets per slot.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidRequest`] for an empty range, store errors.
    pub async fn sold_tickets(
        &self,
        config: &MerchantConfig,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SoldTickets>, ProviderError> {
        if from >= to {
            return Err(ProviderError::InvalidRequest(format!(
                "Range start {from} is not before its end {to}"
            )));
        }
        Ok(self
            .orders
            .sold_tickets(&config.merchant_id, from, to)
            .await?)
    }

    /// Line items departing at `trip_at`.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn orders_at_slot(
        &self,
        config: &MerchantConfig,
        trip_at: DateTime<Utc>,
    ) -> Result<Vec<OrderSummary>, ProviderError> {
        Ok(self
            .orders
            .orders_at_slot(&config.merchant_id, trip_at)
            .await?)
    }

    /// Loads an order owned by the merchant.
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotFound`] when missing or owned by someone else.
    pub async fn order(&self, config: &MerchantConfig, order_id: &str) -> Result<Order, ProviderError> {
        self.orders
            .find_order(order_id)
            .await?
            .filter(|order| order.merchant_id == config.merchant_id)
            .ok_or_else(|| ProviderError::NotFound {
                resource: "order",
                id: order_id.to_string(),
            })
    }

    /// Ticket items of an order, transfers applied.
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotFound`] for an unknown order.
    pub async fn pass_items(
        &self,
        config: &MerchantConfig,
        order_id: &str,
    ) -> Result<PassItems, ProviderError> {
        let order = self.order(config, order_id).await?;
        Ok(PassItems::from_order(&order))
    }

    /// Applies transfers in order.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Transfer`] with the transfers already committed.
    pub async fn transfer(
        &self,
        config: &MerchantConfig,
        requests: &[TransferRequest],
    ) -> Result<Vec<TransferRecord>, ProviderError> {
        Ok(self
            .transfers
            .apply_batch(&config.merchant_id, requests)
            .await?)
    }

    /// Records a staff sale as a captured order without provider captures.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidRequest`] for a zero quantity or unencodable
    /// slot; [`ProviderError::Store`] for capacity rejections.
    pub async fn manual_entry(
        &self,
        config: &MerchantConfig,
        entry: &ManualEntry,
    ) -> Result<ManualEntryReceipt, ProviderError> {
        if entry.quantity == 0 {
            return Err(ProviderError::InvalidRequest(
                "Quantity must be at least 1".to_string(),
            ));
        }
        let trip_at = DateTime::from_timestamp(entry.timestamp, 0).ok_or_else(|| {
            ProviderError::InvalidRequest(format!("Invalid timestamp {}", entry.timestamp))
        })?;
        let sku = codec::encode(entry.product_id, &entry.ticket_type, trip_at, None)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        let order_id = format!("manual-{}", Uuid::new_v4());
        let line_item_id = format!("{order_id}-{sku}");
        let name = if entry.description.trim().is_empty() {
            format!("{} ticket", entry.ticket_type.to_ascii_uppercase())
        } else {
            entry.description.clone()
        };

        let order = NewOrder {
            id: order_id.clone(),
            merchant_id: config.merchant_id.clone(),
            status: OrderStatus::Captured,
            source: OrderSource::Manual,
            payer: Payer {
                id: Uuid::new_v4().to_string(),
                name: entry.name.clone(),
                email: entry.email.clone(),
                phone: entry.phone.clone(),
            },
            line_items: vec![NewLineItem {
                id: line_item_id.clone(),
                sku: sku.clone(),
                name,
                unit_amount_cents: entry.unit_amount_cents,
                quantity: entry.quantity,
                description: entry.entry_type.clone(),
            }],
            captures: Vec::new(),
            created_at: self.clock.now(),
        };

        self.orders.record_order(&order, self.manual_policy).await?;

        metrics::record_capacity_change("manual");
        metrics::record_tickets("sold", u64::from(entry.quantity));
        tracing::info!(
            merchant_id = %config.merchant_id,
            order_id = %order_id,
            sku = %sku,
            quantity = entry.quantity,
            entry_type = %entry.entry_type,
            "Manual entry recorded"
        );

        Ok(ManualEntryReceipt {
            order_id,
            line_item_id,
            sku,
            quantity: entry.quantity,
        })
    }

    /// Resolves the order, capture and items an operator refund covers.
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotFound`] for an unknown order or item,
    /// [`ProviderError::InvalidRequest`] when nothing is refundable.
    pub async fn refund_target(
        &self,
        config: &MerchantConfig,
        request: &RefundRequest,
    ) -> Result<RefundTarget, ProviderError> {
        let order = self.order(config, &request.order_id).await?;

        let items: Vec<LineItem> = if request.line_item_ids.is_empty() {
            order.active_items().cloned().collect()
        } else {
            let mut items: Vec<LineItem> = Vec::with_capacity(request.line_item_ids.len());
            for id in &request.line_item_ids {
                if items.iter().any(|item| &item.id == id) {
                    continue;
                }
                let item = order
                    .line_items
                    .iter()
                    .find(|item| &item.id == id)
                    .ok_or_else(|| ProviderError::NotFound {
                        resource: "line item",
                        id: id.clone(),
                    })?;
                if item.status == LineItemStatus::Refunded {
                    return Err(ProviderError::InvalidRequest(format!(
                        "Line item {id} is already refunded"
                    )));
                }
                items.push(item.clone());
            }
            items
        };

        if items.is_empty() {
            return Err(ProviderError::InvalidRequest(format!(
                "Order {} has nothing left to refund",
                order.id
            )));
        }

        let capture = order.refundable_capture().cloned().ok_or_else(|| {
            ProviderError::InvalidRequest(format!("Order {} has no completed capture", order.id))
        })?;

        Ok(RefundTarget {
            order,
            capture,
            items,
        })
    }

    /// Records a refund the provider accepted and restores capacity.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn record_refund(
        &self,
        provider: PaymentType,
        target: &RefundTarget,
        refund_id: String,
    ) -> Result<RefundConfirmation, ProviderError> {
        let refund = RefundRecord {
            id: refund_id,
            capture_id: target.capture.id.clone(),
            order_id: target.order.id.clone(),
            amount_cents: target.amount_cents(),
            line_item_ids: target.line_item_ids(),
            created_at: self.clock.now(),
        };

        let outcome = self.orders.record_refund(&refund).await?;
        if outcome.is_applied() {
            metrics::record_refund(provider.as_str(), refund.amount_cents);
            metrics::record_capacity_change("refund");
            metrics::record_tickets("refunded", slot_tickets(target.items.iter()));
        }
        tracing::info!(
            %provider,
            order_id = %refund.order_id,
            refund_id = %refund.id,
            amount_cents = refund.amount_cents,
            ?outcome,
            "Refund recorded"
        );

        Ok(RefundConfirmation {
            refund_id: refund.id,
            order_id: refund.order_id,
            amount_cents: refund.amount_cents,
            line_item_ids: refund.line_item_ids,
            outcome,
        })
    }
}
