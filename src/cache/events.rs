//! Change notification for cache entries.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::key::QueryKey;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// New data was written (fetch result or direct write).
    Updated,
    /// A speculative value was written by a mutation.
    Speculated,
    /// A mutation snapshot was restored.
    Restored,
    /// The entry was marked stale.
    Invalidated,
    /// A fetch started.
    FetchStarted,
    /// A fetch failed; existing data was kept.
    FetchFailed,
    /// An in-flight fetch was cancelled.
    FetchCancelled,
    /// The entry was evicted.
    Removed,
    /// The subscriber fell behind and missed events; re-read everything
    /// under the subscription's prefix.
    Lagged,
}

/// A change to one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    /// The affected key. For [`CacheEventKind::Lagged`], the subscription
    /// prefix.
    pub key: QueryKey,
    /// What happened.
    pub kind: CacheEventKind,
}

/// A stream of [`CacheEvent`]s for keys under one prefix.
///
/// Dropping the subscription unsubscribes.
pub struct CacheSubscription {
    prefix: QueryKey,
    receiver: broadcast::Receiver<CacheEvent>,
}

impl CacheSubscription {
    pub(crate) const fn new(prefix: QueryKey, receiver: broadcast::Receiver<CacheEvent>) -> Self {
        Self { prefix, receiver }
    }

    /// The prefix this subscription watches.
    #[must_use]
    pub const fn prefix(&self) -> &QueryKey {
        &self.prefix
    }

    /// Waits for the next matching event.
    ///
    /// Returns `None` once the cache has been dropped.
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(prefix = %self.prefix, skipped, "cache subscriber lagged");
                    return Some(self.lagged());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.key.starts_with(&self.prefix) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => return Some(self.lagged()),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drains every queued matching event.
    pub fn drain(&mut self) -> Vec<CacheEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    fn lagged(&self) -> CacheEvent {
        CacheEvent {
            key: self.prefix.clone(),
            kind: CacheEventKind::Lagged,
        }
    }
}
