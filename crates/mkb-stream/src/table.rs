//! Subscription table

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use mkb_core::error::StreamError;
use mkb_protocol::{ChannelEvent, SubscriptionId};

/// Handler invoked for every event on a subscription
pub type Callback = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Concurrent map from subscription id to callback
#[derive(Default)]
pub struct SubscriptionTable {
    /// Callbacks indexed by subscription ID
    callbacks: DashMap<SubscriptionId, Callback>,
}

impl SubscriptionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            callbacks: DashMap::new(),
        }
    }

    /// Register a callback under `id`
    pub fn add(&self, id: SubscriptionId, callback: Callback) -> Result<(), StreamError> {
        match self.callbacks.entry(id) {
            Entry::Occupied(_) => Err(StreamError::DuplicateSubscription(id)),
            Entry::Vacant(slot) => {
                slot.insert(callback);
                Ok(())
            }
        }
    }

    /// Remove the callback under `id`, returning whether one was registered
    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    /// Invoke the callback registered under `id`, if any.
    ///
    /// The callback runs on the caller's task after the table lock has been
    /// released, so it may add or remove subscriptions itself. A panicking
    /// callback is logged and the event counts as delivered.
    pub fn dispatch(&self, id: SubscriptionId, event: ChannelEvent) -> bool {
        let callback = self.callbacks.get(&id).map(|r| Arc::clone(&r));
        let Some(callback) = callback else {
            return false;
        };

        if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::error!(%id, "Subscription callback panicked; event dropped");
        }
        true
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.callbacks.contains_key(&id)
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.callbacks.clear();
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}
