//! # Slotledger Engine
//!
//! Reconciles ticket sales from `PayPal` and Stripe against a per-slot
//! capacity ledger.
//!
//! ## Flow
//!
//! ```text
//! provider webhook ──► WebhookPipeline ──► PaymentProvider::fetch_order
//!                            │                        │
//!                            ▼                        ▼
//!                   WebhookEventLog            OrderStore::record_order
//!                                                     │
//!                                                     ▼
//!                                             CapacityLedger (-qty)
//! ```
//!
//! Operators reach the same stores through `/api`: sold-ticket reports,
//! refunds, transfers between slots, manual entries and ledger overrides.
//!
//! ## Modules
//!
//! - [`providers`]: one adapter per payment backend behind [`PaymentProvider`]
//! - [`webhook`]: verify, log, dedupe and apply inbound notifications
//! - [`transfer`]: move sold tickets between slots
//! - [`server`] and [`api`]: the Axum HTTP surface
//! - [`app`]: wiring and startup

pub mod api;
pub mod app;
pub mod config;
pub mod metrics;
pub mod notifier;
pub mod providers;
pub mod server;
pub mod stores;
pub mod transfer;
pub mod webhook;

pub use app::{assemble, run, ProviderApis, StartupError};
pub use config::Config;
pub use providers::{PaymentProvider, ProviderError, ProviderRegistry};
pub use server::{build_router, AppState};
pub use stores::Stores;
pub use transfer::{BatchTransferError, TransferService};
pub use webhook::{WebhookError, WebhookOutcome, WebhookPipeline};
