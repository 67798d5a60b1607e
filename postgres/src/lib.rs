//! `PostgreSQL` storage for Slotledger.
//!
//! [`PostgresStore`] implements every repository contract from
//! `slotledger-core` on one connection pool:
//!
//! - [`CapacityLedger`](slotledger_core::CapacityLedger): one row per slot,
//!   mutated with single-statement upserts so concurrent writers never lose
//!   an update
//! - [`OrderStore`](slotledger_core::store::OrderStore): orders, captures,
//!   refunds and transfers, each written in one transaction together with its
//!   ledger deltas
//! - [`WebhookEventLog`](slotledger_core::store::WebhookEventLog): raw
//!   deliveries deduplicated by `(provider, event_id)`
//! - [`MerchantDirectory`](slotledger_core::merchant::MerchantDirectory)
//!
//! # Example
//!
//! ```ignore
//! use slotledger_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/slotledger", 40).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod events;
mod ledger;
mod merchants;
mod orders;
mod transfer;

use slotledger_core::store::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Repository backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    default_capacity: i64,
}

impl PostgresStore {
    /// Wraps an existing pool.
    ///
    /// `default_capacity` seeds ledger rows created on first touch.
    #[must_use]
    pub const fn new(pool: PgPool, default_capacity: i64) -> Self {
        Self {
            pool,
            default_capacity,
        }
    }

    /// Connects with a small default pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, default_capacity: i64) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool, default_capacity))
    }

    /// Runs the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Seats a ledger row starts with when first touched.
    #[must_use]
    pub const fn default_capacity(&self) -> i64 {
        self.default_capacity
    }
}

/// Maps a driver error into [`StoreError::Storage`] with context.
fn storage(context: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| StoreError::Storage(format!("Failed to {context}: {e}"))
}

/// Rolls back a transaction that has nothing to commit. A failed rollback
/// is logged; the connection is discarded and the server aborts the
/// transaction anyway.
async fn abandon(tx: sqlx::Transaction<'_, sqlx::Postgres>, context: &'static str) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, context, "Rollback failed");
    }
}
