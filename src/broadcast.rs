//! # Namespace-Scope Broadcast
//!
//! Hands the active instance's namespace-scope flag from the reconciliation
//! driver to the discovery task. The channel holds a single value: publishing
//! replaces whatever is there, so a slow consumer only ever sees the newest
//! flag and intermediate values are dropped.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected publisher and subscriber with no value yet
pub fn scope_channel() -> (ScopePublisher, ScopeSubscriber) {
    let (sender, receiver) = watch::channel(None);
    (
        ScopePublisher {
            sender: Arc::new(sender),
        },
        ScopeSubscriber { receiver },
    )
}

/// Write side, shared by every reconciliation pass
#[derive(Debug, Clone)]
pub struct ScopePublisher {
    sender: Arc<watch::Sender<Option<bool>>>,
}

impl ScopePublisher {
    /// Replace the current value; never blocks and never fails, even without
    /// subscribers
    pub fn publish(&self, namespace_scoped: bool) {
        self.sender.send_replace(Some(namespace_scoped));
    }

    /// A new subscriber that has not seen the current value yet
    pub fn subscribe(&self) -> ScopeSubscriber {
        let mut receiver = self.sender.subscribe();
        if receiver.borrow().is_some() {
            receiver.mark_changed();
        }
        ScopeSubscriber { receiver }
    }
}

/// Read side, owned by the discovery task
#[derive(Debug)]
pub struct ScopeSubscriber {
    receiver: watch::Receiver<Option<bool>>,
}

impl ScopeSubscriber {
    /// Wait until a value has been published and consume it
    ///
    /// Returns `None` when every publisher is gone before a value arrived.
    pub async fn first(&mut self) -> Option<bool> {
        self.receiver
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|value| *value)
    }

    /// The newest value published since the last read, without waiting
    pub fn latest(&mut self) -> Option<bool> {
        match self.receiver.has_changed() {
            Ok(true) => *self.receiver.borrow_and_update(),
            _ => None,
        }
    }
}
