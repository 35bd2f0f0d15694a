//! # Outcome
//!
//! The requeue decision each step returns to the driver.

use kube_runtime::controller::Action;
use std::time::Duration;

/// Whether a pass should run again, and when
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    pub requeue: bool,
    pub requeue_after: Option<Duration>,
}

impl Outcome {
    /// Nothing left to do for this step
    pub const fn done() -> Self {
        Self {
            requeue: false,
            requeue_after: None,
        }
    }

    /// Run the pass again after `delay`
    pub const fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: Some(delay),
        }
    }

    pub const fn is_done(&self) -> bool {
        !self.requeue
    }

    /// Convert into a controller action, resyncing after `resync` when done
    pub fn into_action(self, resync: Duration) -> Action {
        if self.requeue {
            Action::requeue(self.requeue_after.unwrap_or(Duration::from_secs(1)))
        } else {
            Action::requeue(resync)
        }
    }
}
