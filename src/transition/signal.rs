use crate::util::lock;
use log::trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Ordered set of callbacks that are invoked whenever the signal is emitted.
pub struct Signal {
    name: &'static str,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl Signal {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscribers).push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` wasn't subscribed (anymore), which is not an error.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|(subscribed, _)| *subscribed != id);
        before != subscribers.len()
    }

    pub fn emit(&self) {
        // Callbacks may (un)subscribe, so they must not run under the lock.
        let callbacks = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect::<Vec<_>>();

        trace!("{}: notifying {} subscribers", self.name, callbacks.len());
        for callback in callbacks {
            callback();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}
