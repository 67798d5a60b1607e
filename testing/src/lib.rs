//! # Slotledger Testing
//!
//! Testing utilities for the Slotledger workspace.
//!
//! This crate provides:
//! - [`FixedClock`] and [`test_clock`] for deterministic time
//! - [`InMemoryStore`]: every storage contract behind one lock, so each
//!   write is atomic exactly like a database transaction
//! - [`fixtures`]: merchants, orders and slots used across test suites
//!
//! ## Example
//!
//! ```ignore
//! use slotledger_testing::{InMemoryStore, fixtures};
//!
//! #[tokio::test]
//! async fn sale_decrements_capacity() {
//!     let store = InMemoryStore::with_default_capacity(10);
//!     let order = fixtures::paid_order("ORD1", "M1", &[("12AM1700000000", 2)]);
//!     store.record_order(&order, CapacityPolicy::Blind).await.unwrap();
//!     assert_eq!(store.capacity(fixtures::slot(12, 1_700_000_000)).unwrap().available, 8);
//! }
//! ```

use chrono::{DateTime, Utc};
use slotledger_core::environment::Clock;

pub mod fixtures;
mod memory;

pub use memory::{InMemoryStore, LoggedEvent};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use slotledger_testing::mocks::FixedClock;
    /// use slotledger_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

pub use mocks::{FixedClock, test_clock};
