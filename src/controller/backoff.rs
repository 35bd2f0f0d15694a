//! # Fibonacci Backoff
//!
//! Progressive retry delays for failed reconciliation passes. Grows more
//! slowly than exponential backoff, so a resource that keeps failing on a
//! transient platform error is retried often at first without hammering the
//! API server later.
//!
//! Sequence with the operator defaults (5s floor, 300s ceiling):
//! 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s, 275s, 300s, 300s, ...
//!
//! ## Usage
//!
//! ```rust
//! use license_service_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(5, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! assert_eq!(backoff.next_backoff_seconds(), 15);
//! ```

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, starting from `min_seconds`
/// and capped at `max_seconds`. One instance is kept per resource.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Floor, used for the first two delays and after a reset
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a backoff between `min_seconds` and `max_seconds`
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds.min(max_seconds),
            max_seconds,
        }
    }

    /// Get the next delay in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        result
    }

    /// Get the next delay as a `Duration` and advance the sequence
    ///
    /// # Example
    ///
    /// ```
    /// use license_service_operator::controller::backoff::FibonacciBackoff;
    /// use std::time::Duration;
    ///
    /// let mut backoff = FibonacciBackoff::new(5, 300);
    /// assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
    /// ```
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Restart the sequence after a successful pass
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds.min(self.max_seconds);
    }
}
