//! In-memory implementation of every storage contract.
//!
//! All state sits behind a single `RwLock`, so each trait call is atomic the
//! same way a database transaction is: either every row and ledger change
//! lands or none does.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use slotledger_core::codec::{ItemKind, Slot, classify};
use slotledger_core::ledger::{
    CapacityEntry, CapacityError, CapacityLedger, CapacityPolicy, LedgerFuture,
};
use slotledger_core::merchant::{MerchantConfig, MerchantDirectory, MerchantFuture};
use slotledger_core::order::{
    Capture, CaptureStatus, LineItem, LineItemStatus, NewOrder, Order, OrderSource, OrderStatus,
    OrderSummary, Outcome, Payer, RefundRecord, SoldTickets,
};
use slotledger_core::store::{
    EventRecord, EventStatus, OrderStore, StoreError, StoreFuture, TransferFuture,
    WebhookEvent, WebhookEventLog,
};
use slotledger_core::transfer::{TransferError, TransferPlan, TransferRecord, TransferRequest};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct StoredOrder {
    merchant_id: String,
    status: OrderStatus,
    source: OrderSource,
    payer: Payer,
    created_at: DateTime<Utc>,
    item_ids: Vec<String>,
    capture_ids: Vec<String>,
}

#[derive(Debug, Clone)]
struct StoredItem {
    order_id: String,
    sku: String,
    name: String,
    unit_amount_cents: i64,
    quantity: u32,
    description: String,
    status: LineItemStatus,
}

/// A logged webhook delivery, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    /// Log row id.
    pub log_id: i64,
    /// Delivery as logged.
    pub event: WebhookEvent,
    /// Current processing status.
    pub status: EventStatus,
    /// Last processing error.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    ledger: BTreeMap<Slot, CapacityEntry>,
    ledger_log: Vec<(Slot, i64)>,
    orders: BTreeMap<String, StoredOrder>,
    items: HashMap<String, StoredItem>,
    captures: HashMap<String, Capture>,
    refunds: HashMap<String, RefundRecord>,
    transfers: Vec<TransferRecord>,
    events: Vec<LoggedEvent>,
    merchants: HashMap<String, MerchantConfig>,
}

impl State {
    fn apply_delta(&mut self, slot: Slot, delta: i64, default_capacity: i64) -> CapacityEntry {
        let entry = self
            .ledger
            .entry(slot)
            .or_insert_with(|| CapacityEntry::new(slot, default_capacity));
        entry.apply_delta(delta);
        let entry = *entry;
        self.ledger_log.push((slot, delta));
        entry
    }

    fn take(
        &mut self,
        slot: Slot,
        quantity: u32,
        default_capacity: i64,
    ) -> Result<CapacityEntry, CapacityError> {
        let mut entry = self
            .ledger
            .get(&slot)
            .copied()
            .unwrap_or_else(|| CapacityEntry::new(slot, default_capacity));
        entry.try_take(quantity)?;
        self.ledger.insert(slot, entry);
        self.ledger_log.push((slot, -i64::from(quantity)));
        Ok(entry)
    }

    fn consume(
        &mut self,
        slot: Slot,
        quantity: u32,
        policy: CapacityPolicy,
        default_capacity: i64,
    ) -> Result<CapacityEntry, CapacityError> {
        match policy {
            CapacityPolicy::Blind => {
                Ok(self.apply_delta(slot, -i64::from(quantity), default_capacity))
            }
            CapacityPolicy::Floor => self.take(slot, quantity, default_capacity),
        }
    }

    /// Snapshot of the ledger, restored when a multi-step write fails.
    fn checkpoint(&self) -> (BTreeMap<Slot, CapacityEntry>, usize) {
        (self.ledger.clone(), self.ledger_log.len())
    }

    fn rollback(&mut self, checkpoint: (BTreeMap<Slot, CapacityEntry>, usize)) {
        self.ledger = checkpoint.0;
        self.ledger_log.truncate(checkpoint.1);
    }

    /// Latest transfer wins for the SKU; latest named transfer wins for the name.
    fn effective(&self, item_id: &str, item: &StoredItem) -> (String, String) {
        let mut sku = item.sku.clone();
        let mut name = item.name.clone();
        for transfer in self.transfers.iter().filter(|t| t.line_item_id == item_id) {
            sku.clone_from(&transfer.new_sku);
            if let Some(new_name) = &transfer.new_name {
                name.clone_from(new_name);
            }
        }
        (sku, name)
    }

    fn line_item(&self, item_id: &str) -> Option<LineItem> {
        let item = self.items.get(item_id)?;
        let (sku, name) = self.effective(item_id, item);
        Some(LineItem {
            id: item_id.to_string(),
            order_id: item.order_id.clone(),
            sku,
            name,
            original_sku: item.sku.clone(),
            original_name: item.name.clone(),
            unit_amount_cents: item.unit_amount_cents,
            quantity: item.quantity,
            description: item.description.clone(),
            status: item.status,
        })
    }

    fn order(&self, order_id: &str) -> Option<Order> {
        let stored = self.orders.get(order_id)?;
        Some(Order {
            id: order_id.to_string(),
            merchant_id: stored.merchant_id.clone(),
            status: stored.status,
            source: stored.source,
            payer: stored.payer.clone(),
            line_items: stored
                .item_ids
                .iter()
                .filter_map(|id| self.line_item(id))
                .collect(),
            captures: stored
                .capture_ids
                .iter()
                .filter_map(|id| self.captures.get(id).cloned())
                .collect(),
            created_at: stored.created_at,
        })
    }

    fn merchant_orders<'a>(&'a self, merchant_id: &'a str) -> impl Iterator<Item = Order> + 'a {
        self.orders
            .iter()
            .filter(move |(_, o)| o.merchant_id == merchant_id)
            .filter_map(|(id, _)| self.order(id))
    }
}

/// In-memory store for fast, deterministic tests.
///
/// Implements [`CapacityLedger`], [`OrderStore`], [`WebhookEventLog`] and
/// [`MerchantDirectory`]. Clones share state.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    default_capacity: i64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Empty store in pure delta mode (lazily created rows start at zero).
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_capacity(0)
    }

    /// Empty store whose lazily created ledger rows start at `default_capacity`.
    #[must_use]
    pub fn with_default_capacity(default_capacity: i64) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            default_capacity,
        }
    }

    /// Registers a merchant.
    pub fn insert_merchant(&self, config: MerchantConfig) {
        self.state
            .write()
            .unwrap()
            .merchants
            .insert(config.merchant_id.clone(), config);
    }

    /// Stored ledger row, without defaulting.
    #[must_use]
    pub fn capacity(&self, slot: Slot) -> Option<CapacityEntry> {
        self.state.read().unwrap().ledger.get(&slot).copied()
    }

    /// Every delta applied to `slot`, in order.
    #[must_use]
    pub fn ledger_deltas(&self, slot: Slot) -> Vec<i64> {
        self.state
            .read()
            .unwrap()
            .ledger_log
            .iter()
            .filter(|(s, _)| *s == slot)
            .map(|(_, delta)| *delta)
            .collect()
    }

    /// Total ledger writes across all slots.
    #[must_use]
    pub fn ledger_write_count(&self) -> usize {
        self.state.read().unwrap().ledger_log.len()
    }

    /// Stored orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.state.read().unwrap().orders.len()
    }

    /// Stored captures.
    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.state.read().unwrap().captures.len()
    }

    /// Stored refunds.
    #[must_use]
    pub fn refund_count(&self) -> usize {
        self.state.read().unwrap().refunds.len()
    }

    /// Webhook log, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<LoggedEvent> {
        self.state.read().unwrap().events.clone()
    }
}

impl CapacityLedger for InMemoryStore {
    fn decrement(&self, slot: Slot, quantity: u32) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            Ok(state.apply_delta(slot, -i64::from(quantity), self.default_capacity))
        })
    }

    fn increment(&self, slot: Slot, quantity: u32) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            Ok(state.apply_delta(slot, i64::from(quantity), self.default_capacity))
        })
    }

    fn decrement_if_available(
        &self,
        slot: Slot,
        quantity: u32,
    ) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            state.take(slot, quantity, self.default_capacity)
        })
    }

    fn set_cancelled(&self, slot: Slot, cancelled: bool) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let entry = state
                .ledger
                .entry(slot)
                .or_insert_with(|| CapacityEntry::new(slot, self.default_capacity));
            entry.cancelled = cancelled;
            Ok(*entry)
        })
    }

    fn set_available(&self, slot: Slot, available: i64) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let entry = state
                .ledger
                .entry(slot)
                .or_insert_with(|| CapacityEntry::new(slot, self.default_capacity));
            entry.available = available;
            Ok(*entry)
        })
    }

    fn get(&self, slot: Slot) -> LedgerFuture<'_, CapacityEntry> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .ledger
                .get(&slot)
                .copied()
                .unwrap_or_else(|| CapacityEntry::new(slot, self.default_capacity)))
        })
    }

    fn list(
        &self,
        product_id: Option<i64>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerFuture<'_, Vec<CapacityEntry>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .ledger
                .values()
                .filter(|e| product_id.is_none_or(|p| e.slot.product_id == p))
                .filter(|e| e.slot.trip_at >= from && e.slot.trip_at < to)
                .copied()
                .collect())
        })
    }
}

impl OrderStore for InMemoryStore {
    fn record_order<'a>(
        &'a self,
        order: &'a NewOrder,
        policy: CapacityPolicy,
    ) -> StoreFuture<'a, Outcome> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if state.orders.contains_key(&order.id) {
                return Ok(Outcome::AlreadyProcessed);
            }
            if let Some(dup) = order.line_items.iter().find(|i| state.items.contains_key(&i.id)) {
                return Err(StoreError::Storage(format!(
                    "Duplicate line item id {}",
                    dup.id
                )));
            }

            let checkpoint = state.checkpoint();
            for item in &order.line_items {
                if let ItemKind::Slot(key) = item.kind() {
                    if let Err(err) =
                        state.consume(key.slot(), item.quantity, policy, self.default_capacity)
                    {
                        state.rollback(checkpoint);
                        return Err(err.into());
                    }
                }
            }

            for item in &order.line_items {
                state.items.insert(
                    item.id.clone(),
                    StoredItem {
                        order_id: order.id.clone(),
                        sku: item.sku.clone(),
                        name: item.name.clone(),
                        unit_amount_cents: item.unit_amount_cents,
                        quantity: item.quantity,
                        description: item.description.clone(),
                        status: LineItemStatus::Active,
                    },
                );
            }

            let mut capture_ids = Vec::new();
            for capture in &order.captures {
                if !state.captures.contains_key(&capture.id) {
                    let mut capture = capture.clone();
                    capture.order_id.clone_from(&order.id);
                    capture_ids.push(capture.id.clone());
                    state.captures.insert(capture.id.clone(), capture);
                }
            }

            state.orders.insert(
                order.id.clone(),
                StoredOrder {
                    merchant_id: order.merchant_id.clone(),
                    status: order.status,
                    source: order.source,
                    payer: order.payer.clone(),
                    created_at: order.created_at,
                    item_ids: order.line_items.iter().map(|i| i.id.clone()).collect(),
                    capture_ids,
                },
            );

            Ok(Outcome::Applied)
        })
    }

    fn record_capture<'a>(&'a self, capture: &'a Capture) -> StoreFuture<'a, Outcome> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if state.captures.contains_key(&capture.id) {
                return Ok(Outcome::AlreadyProcessed);
            }
            let order = state
                .orders
                .get_mut(&capture.order_id)
                .ok_or_else(|| StoreError::NotFound {
                    resource: "order",
                    id: capture.order_id.clone(),
                })?;
            order.capture_ids.push(capture.id.clone());
            if capture.status == CaptureStatus::Completed && order.status == OrderStatus::Created {
                order.status = OrderStatus::Captured;
            }
            state.captures.insert(capture.id.clone(), capture.clone());
            Ok(Outcome::Applied)
        })
    }

    fn record_refund<'a>(&'a self, refund: &'a RefundRecord) -> StoreFuture<'a, Outcome> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if state.refunds.contains_key(&refund.id) {
                return Ok(Outcome::AlreadyProcessed);
            }
            let item_ids = state
                .orders
                .get(&refund.order_id)
                .map(|o| o.item_ids.clone())
                .ok_or_else(|| StoreError::NotFound {
                    resource: "order",
                    id: refund.order_id.clone(),
                })?;

            let affected: Vec<LineItem> = item_ids
                .iter()
                .filter(|id| refund.line_item_ids.is_empty() || refund.line_item_ids.contains(id))
                .filter_map(|id| state.line_item(id))
                .filter(|item| item.status == LineItemStatus::Active)
                .collect();

            for item in &affected {
                if let Some(stored) = state.items.get_mut(&item.id) {
                    stored.status = LineItemStatus::Refunded;
                }
                if let ItemKind::Slot(key) = classify(&item.sku, &item.name) {
                    state.apply_delta(key.slot(), i64::from(item.quantity), self.default_capacity);
                }
            }

            let all_refunded = item_ids.iter().all(|id| {
                state
                    .items
                    .get(id)
                    .is_none_or(|i| i.status == LineItemStatus::Refunded)
            });
            if all_refunded {
                if let Some(order) = state.orders.get_mut(&refund.order_id) {
                    order.status = OrderStatus::Refunded;
                }
                if let Some(capture) = state.captures.get_mut(&refund.capture_id) {
                    capture.status = CaptureStatus::Refunded;
                    capture.updated_at = refund.created_at;
                }
            }

            let mut record = refund.clone();
            record.line_item_ids = affected.into_iter().map(|i| i.id).collect();
            state.refunds.insert(record.id.clone(), record);
            Ok(Outcome::Applied)
        })
    }

    fn find_order<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, Option<Order>> {
        Box::pin(async move { Ok(self.state.read().unwrap().order(order_id)) })
    }

    fn find_capture_order<'a>(&'a self, capture_id: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .captures
                .get(capture_id)
                .map(|c| c.order_id.clone()))
        })
    }

    fn sold_tickets<'a>(
        &'a self,
        merchant_id: &'a str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<SoldTickets>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut totals: BTreeMap<Slot, i64> = BTreeMap::new();
            for order in state.merchant_orders(merchant_id) {
                if order.status == OrderStatus::Refunded {
                    continue;
                }
                for item in order.active_items() {
                    if let ItemKind::Slot(key) = item.kind() {
                        let slot = key.slot();
                        if slot.trip_at >= from && slot.trip_at < to {
                            *totals.entry(slot).or_default() += i64::from(item.quantity);
                        }
                    }
                }
            }
            Ok(totals
                .into_iter()
                .map(|(slot, quantity)| SoldTickets {
                    product_id: slot.product_id,
                    trip_at: slot.trip_at,
                    quantity,
                })
                .collect())
        })
    }

    fn orders_at_slot<'a>(
        &'a self,
        merchant_id: &'a str,
        trip_at: DateTime<Utc>,
    ) -> StoreFuture<'a, Vec<OrderSummary>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            let mut summaries = Vec::new();
            for order in state.merchant_orders(merchant_id) {
                for item in &order.line_items {
                    let at_slot = item
                        .kind()
                        .slot_key()
                        .is_some_and(|key| key.trip_at() == trip_at);
                    if !at_slot {
                        continue;
                    }
                    summaries.push(OrderSummary {
                        order_id: order.id.clone(),
                        line_item_id: item.id.clone(),
                        order_status: order.status,
                        item_status: item.status,
                        sku: item.sku.clone(),
                        name: item.name.clone(),
                        original_sku: item.original_sku.clone(),
                        original_name: item.original_name.clone(),
                        description: item.description.clone(),
                        unit_amount_cents: item.unit_amount_cents,
                        quantity: item.quantity,
                        payer: order.payer.clone(),
                    });
                }
            }
            Ok(summaries)
        })
    }

    fn apply_transfer<'a>(
        &'a self,
        merchant_id: &'a str,
        request: &'a TransferRequest,
        policy: CapacityPolicy,
        applied_at: DateTime<Utc>,
    ) -> TransferFuture<'a> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let not_found = || TransferError::LineItemNotFound(request.line_item_id.clone());

            let item = state.line_item(&request.line_item_id).ok_or_else(not_found)?;
            let owned = state
                .orders
                .get(&item.order_id)
                .is_some_and(|o| o.merchant_id == merchant_id);
            if !owned {
                return Err(not_found());
            }
            if item.status == LineItemStatus::Refunded {
                return Err(TransferError::LineItemRefunded(item.id));
            }

            let plan = TransferPlan::new(&item.sku, request, item.quantity)?;

            let checkpoint = state.checkpoint();
            state.apply_delta(
                plan.from.slot(),
                i64::from(plan.quantity),
                self.default_capacity,
            );
            if let Err(err) =
                state.consume(plan.to.slot(), plan.quantity, policy, self.default_capacity)
            {
                state.rollback(checkpoint);
                return Err(err.into());
            }

            let id = i64::try_from(state.transfers.len()).unwrap() + 1;
            let record = plan.into_record(id, applied_at);
            state.transfers.push(record.clone());
            Ok(record)
        })
    }

    fn transfer_history<'a>(
        &'a self,
        line_item_id: &'a str,
    ) -> StoreFuture<'a, Vec<TransferRecord>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .transfers
                .iter()
                .filter(|t| t.line_item_id == line_item_id)
                .cloned()
                .collect())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

impl WebhookEventLog for InMemoryStore {
    fn record<'a>(
        &'a self,
        event: &'a WebhookEvent,
        status: EventStatus,
    ) -> StoreFuture<'a, EventRecord> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(event_id) = &event.event_id {
                let existing = state.events.iter().find(|logged| {
                    logged.event.provider == event.provider
                        && logged.event.event_id.as_ref() == Some(event_id)
                });
                if let Some(existing) = existing {
                    return Ok(EventRecord {
                        log_id: existing.log_id,
                        previous: Some(existing.status),
                    });
                }
            }

            let log_id = i64::try_from(state.events.len()).unwrap() + 1;
            state.events.push(LoggedEvent {
                log_id,
                event: event.clone(),
                status,
                error: None,
            });
            Ok(EventRecord {
                log_id,
                previous: None,
            })
        })
    }

    fn set_status<'a>(
        &'a self,
        log_id: i64,
        status: EventStatus,
        error: Option<&'a str>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let logged = state
                .events
                .iter_mut()
                .find(|e| e.log_id == log_id)
                .ok_or_else(|| StoreError::NotFound {
                    resource: "webhook event",
                    id: log_id.to_string(),
                })?;
            logged.status = status;
            logged.error = error.map(str::to_string);
            Ok(())
        })
    }
}

impl MerchantDirectory for InMemoryStore {
    fn merchant<'a>(&'a self, merchant_id: &'a str) -> MerchantFuture<'a, Option<MerchantConfig>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .merchants
                .get(merchant_id)
                .cloned())
        })
    }
}
