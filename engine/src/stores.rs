//! Storage handles shared by every service.

use slotledger_core::ledger::CapacityLedger;
use slotledger_core::merchant::MerchantDirectory;
use slotledger_core::store::{OrderStore, WebhookEventLog};
use std::sync::Arc;

/// The four storage contracts, usually backed by one store.
#[derive(Clone)]
pub struct Stores {
    /// Orders, captures, refunds and transfers.
    pub orders: Arc<dyn OrderStore>,
    /// Capacity counters.
    pub ledger: Arc<dyn CapacityLedger>,
    /// Webhook audit log.
    pub events: Arc<dyn WebhookEventLog>,
    /// Merchant configuration.
    pub merchants: Arc<dyn MerchantDirectory>,
}

impl Stores {
    /// Uses one backend for every contract.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: OrderStore + CapacityLedger + WebhookEventLog + MerchantDirectory + 'static,
    {
        Self {
            orders: store.clone(),
            ledger: store.clone(),
            events: store.clone(),
            merchants: store,
        }
    }
}
