//! # Slotledger Core
//!
//! Domain types and storage contracts for the ticket inventory and order
//! reconciliation engine.
//!
//! ## Layout
//!
//! - [`codec`]: the one place that knows how a sellable slot is spelled as a SKU
//! - [`ledger`]: remaining capacity per slot
//! - [`order`]: orders, line items, captures and refunds
//! - [`transfer`]: moving sold tickets between slots
//! - [`merchant`]: per-merchant provider selection and credentials
//! - [`store`]: repository contracts implemented by the storage crates
//! - [`environment`]: injectable dependencies such as the clock
//!
//! Nothing in this crate performs I/O. Storage backends live in
//! `slotledger-postgres` (production) and `slotledger-testing` (in memory).

pub mod codec;
pub mod ledger;
pub mod merchant;
pub mod order;
pub mod store;
pub mod transfer;

pub use codec::{DecodeError, EncodeError, ItemKind, Slot, SlotKey};
pub use ledger::{CapacityEntry, CapacityError, CapacityLedger, CapacityPolicy};
pub use order::Outcome;

/// Injectable environment dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
