//! # Turnstile Testing
//!
//! Testing utilities and helpers for the Turnstile check-in architecture.
//!
//! This crate provides:
//! - Deterministic clocks for timestamping sessions and arrivals
//! - A Given-When-Then builder for reducer transitions
//! - Assertion helpers for effect lists (futures, streams, cancellations)
//!
//! ## Example
//!
//! ```ignore
//! use turnstile_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(ScannerReducer::new())
//!     .with_env(test_environment())
//!     .given_state(ScannerState::default())
//!     .when_action(ScannerAction::Logout)
//!     .then_state(|state| assert!(state.session.is_none()))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use turnstile_core::environment::Clock;

/// Fluent reducer testing
pub mod reducer_test;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::FixedClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
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

    /// Clock that advances by one second on every read
    ///
    /// Useful where ordering by timestamp must be observable, e.g. arrivals
    /// published by several door devices.
    #[derive(Debug)]
    pub struct TickingClock {
        start: DateTime<Utc>,
        ticks: AtomicI64,
    }

    impl TickingClock {
        /// Create a clock whose first reading is `start`
        #[must_use]
        pub const fn new(start: DateTime<Utc>) -> Self {
            Self {
                start,
                ticks: AtomicI64::new(0),
            }
        }
    }

    impl Clock for TickingClock {
        fn now(&self) -> DateTime<Utc> {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
            self.start + chrono::Duration::seconds(tick)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_735_689_600))
    }
}

// Re-export commonly used items
pub use mocks::{test_clock, FixedClock, TickingClock};
pub use reducer_test::{assertions, ReducerTest};
