//! Reference-counted background refresh timers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::cache::KeyMap;
use crate::key::QueryKey;

struct IntervalEntry {
    subscribers: usize,
    period: Duration,
    task: AbortHandle,
}

/// One timer task per key, shared by all of the key's subscribers.
#[derive(Default)]
pub(super) struct IntervalRegistry {
    entries: Mutex<KeyMap<IntervalEntry>>,
}

impl IntervalRegistry {
    /// Adds a subscriber for `key`, starting the timer through `spawn` if
    /// this is the first subscriber or `period` is shorter than the running
    /// one.
    pub(super) fn register<S>(
        self: &Arc<Self>,
        key: &QueryKey,
        period: Duration,
        spawn: S,
    ) -> RefetchSubscription
    where
        S: FnOnce() -> AbortHandle,
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.subscribers += 1;
                if period < entry.period {
                    entry.task.abort();
                    entry.task = spawn();
                    entry.period = period;
                    tracing::debug!(key = %key, ?period, "background refresh period shortened");
                }
            }
            None => {
                entries.insert(
                    key.clone(),
                    IntervalEntry {
                        subscribers: 1,
                        period,
                        task: spawn(),
                    },
                );
                tracing::debug!(key = %key, ?period, "background refresh started");
            }
        }
        RefetchSubscription {
            key: key.clone(),
            registry: Arc::clone(self),
        }
    }

    fn unregister(&self, key: &QueryKey) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        entry.subscribers -= 1;
        if entry.subscribers == 0 {
            entry.task.abort();
            entries.remove(key);
            tracing::debug!(key = %key, "background refresh stopped");
        }
    }

    pub(super) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Keeps a key's background refresh alive.
///
/// The timer stops when the last subscription for the key is dropped.
pub struct RefetchSubscription {
    key: QueryKey,
    registry: Arc<IntervalRegistry>,
}

impl RefetchSubscription {
    /// The refreshed key.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl std::fmt::Debug for RefetchSubscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RefetchSubscription")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl Drop for RefetchSubscription {
    fn drop(&mut self) {
        self.registry.unregister(&self.key);
    }
}
