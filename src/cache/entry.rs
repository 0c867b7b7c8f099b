//! Cache entry types.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::QueryError;
use crate::key::QueryKey;

/// Type-erased cached value. Downcast on read.
pub(crate) type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    /// Created but never fetched.
    #[default]
    Idle,
    /// A fetch is in flight. Existing data, if any, is still served.
    Loading,
    /// The last fetch (or write) succeeded.
    Success,
    /// The last fetch failed. Existing data, if any, is still served.
    Error,
}

/// A typed, read-only view of one cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The entry's key.
    pub key: QueryKey,
    /// Last known data.
    pub data: Option<Arc<T>>,
    /// When `data` was last confirmed by a fetch or a direct write.
    pub fetched_at: Option<Instant>,
    /// Lifecycle status.
    pub status: QueryStatus,
    /// Error from the most recent failed fetch.
    pub error: Option<QueryError>,
    /// Marked stale by an invalidation; the next access refetches.
    pub is_invalidated: bool,
    /// Holds a speculative value from an unsettled mutation.
    pub is_provisional: bool,
}

impl<T> CacheEntry<T> {
    /// Returns `true` if the entry should be refetched on its next access.
    ///
    /// An entry is stale when it was invalidated, never fetched, or is at
    /// least `stale_time` old.
    #[must_use]
    pub fn is_stale(&self, stale_time: Duration, now: Instant) -> bool {
        self.is_invalidated
            || self
                .fetched_at
                .is_none_or(|fetched_at| now.saturating_duration_since(fetched_at) >= stale_time)
    }

    /// Returns `true` while a fetch is in flight.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.status == QueryStatus::Loading
    }
}

// =============================================================================
// Internal State
// =============================================================================

/// The part of an entry a mutation snapshot captures and restores.
#[derive(Clone)]
pub(crate) struct EntryState {
    pub(crate) data: Option<ErasedValue>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) status: QueryStatus,
    pub(crate) error: Option<QueryError>,
    pub(crate) invalidated: bool,
    pub(crate) provisional: bool,
}

impl EntryState {
    pub(crate) const fn empty() -> Self {
        Self {
            data: None,
            fetched_at: None,
            status: QueryStatus::Idle,
            error: None,
            invalidated: false,
            provisional: false,
        }
    }

    /// Status to fall back to when an in-flight fetch is abandoned.
    pub(crate) const fn settled_status(&self) -> QueryStatus {
        if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }
}

/// A stored entry: snapshot-able state plus bookkeeping.
pub(crate) struct RawEntry {
    pub(crate) state: EntryState,
    /// Identifies the in-flight fetch allowed to write this entry.
    pub(crate) fetch_generation: u64,
    /// Fetches with a lower generation started before the last
    /// invalidation, so their results land already stale.
    pub(crate) stale_below: u64,
    pub(crate) observers: usize,
    pub(crate) last_accessed: Instant,
    pub(crate) gc_time: Duration,
}

impl RawEntry {
    pub(crate) const fn new(now: Instant, gc_time: Duration) -> Self {
        Self {
            state: EntryState::empty(),
            fetch_generation: 0,
            stale_below: 0,
            observers: 0,
            last_accessed: now,
            gc_time,
        }
    }

    pub(crate) fn typed<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
    ) -> Result<CacheEntry<T>, QueryError> {
        let data = self
            .state
            .data
            .clone()
            .map(|value| {
                value.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
                    key: key.clone(),
                    expected: std::any::type_name::<T>(),
                })
            })
            .transpose()?;
        Ok(CacheEntry {
            key: key.clone(),
            data,
            fetched_at: self.state.fetched_at,
            status: self.state.status,
            error: self.state.error.clone(),
            is_invalidated: self.state.invalidated,
            is_provisional: self.state.provisional,
        })
    }
}

/// A captured entry, or the fact that there was none.
#[derive(Clone)]
pub(crate) struct EntrySnapshot {
    pub(crate) state: Option<EntryState>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(fetched_at: Option<Instant>, invalidated: bool) -> CacheEntry<u32> {
        CacheEntry {
            key: QueryKey::root("rates"),
            data: Some(Arc::new(1)),
            fetched_at,
            status: QueryStatus::Success,
            error: None,
            is_invalidated: invalidated,
            is_provisional: false,
        }
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn staleness_follows_age_and_invalidation() {
        let stale_time = Duration::from_secs(30);
        let fetched_at = Instant::now();

        tokio::time::advance(Duration::from_secs(10)).await;
        let now = Instant::now();
        assert!(!entry(Some(fetched_at), false).is_stale(stale_time, now));
        assert!(entry(Some(fetched_at), true).is_stale(stale_time, now));
        assert!(entry(None, false).is_stale(stale_time, now));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(entry(Some(fetched_at), false).is_stale(stale_time, Instant::now()));
    }

    #[rstest]
    fn settled_status_prefers_error_then_data() {
        let mut state = EntryState::empty();
        assert_eq!(state.settled_status(), QueryStatus::Idle);
        state.data = Some(Arc::new(3_u8));
        assert_eq!(state.settled_status(), QueryStatus::Success);
        state.error = Some(QueryError::Cancelled(QueryKey::root("deals")));
        assert_eq!(state.settled_status(), QueryStatus::Error);
    }
}
