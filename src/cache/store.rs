//! The query cache store.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::QueryError;
use crate::key::QueryKey;

use super::entry::{EntrySnapshot, EntryState, ErasedValue, RawEntry};
use super::{CacheEntry, CacheEvent, CacheEventKind, CacheSubscription, KeyMap, QueryStatus};

/// Default time an unobserved entry survives before garbage collection.
const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Capacity of the change-event channel per subscriber.
const EVENT_CAPACITY: usize = 1024;

type ErasedUpdater =
    Box<dyn FnOnce(&QueryKey, Option<ErasedValue>) -> Result<Option<ErasedValue>, QueryError> + Send>;

/// One typed read-modify-write in a speculative batch.
pub(crate) struct SpeculativeWrite {
    pub(crate) key: QueryKey,
    update: ErasedUpdater,
}

impl SpeculativeWrite {
    pub(crate) fn new<T, F>(key: QueryKey, updater: F) -> Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T> + Send + 'static,
    {
        Self {
            key,
            update: Box::new(move |key, current| {
                let current = current
                    .map(|value| {
                        value.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
                            key: key.clone(),
                            expected: std::any::type_name::<T>(),
                        })
                    })
                    .transpose()?;
                Ok(updater(current.as_deref()).map(|next| Arc::new(next) as ErasedValue))
            }),
        }
    }
}

// =============================================================================
// Query Cache
// =============================================================================

/// In-memory store of `key → entry`.
///
/// Cloning is cheap and yields a handle to the same store. All operations
/// are synchronous and hold the internal lock only for their own duration,
/// never across an `.await`.
///
/// # Examples
///
/// ```rust
/// use dealboard::cache::{QueryCache, QueryStatus};
/// use dealboard::key::QueryKey;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = QueryCache::new();
/// let key = QueryKey::root("interest_rates").child("current");
///
/// cache.set(&key, 6.25_f64);
/// let entry = cache.get::<f64>(&key).unwrap().unwrap();
/// assert_eq!(entry.status, QueryStatus::Success);
/// assert_eq!(*entry.data.unwrap(), 6.25);
///
/// cache.invalidate(&QueryKey::root("interest_rates"));
/// let entry = cache.get::<f64>(&key).unwrap().unwrap();
/// assert!(entry.is_invalidated);
/// assert!(entry.data.is_some());
/// # }
/// ```
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
    default_gc_time: Duration,
}

struct CacheState {
    entries: KeyMap<RawEntry>,
    /// `(source, dependent)`: invalidating under `source` also invalidates
    /// under `dependent`.
    dependencies: Vec<(QueryKey, QueryKey)>,
    next_generation: u64,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("QueryCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    /// Creates an empty cache with the default GC time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_gc_time(DEFAULT_GC_TIME)
    }

    /// Creates an empty cache whose entries default to `gc_time`.
    #[must_use]
    pub fn with_gc_time(gc_time: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: KeyMap::default(),
                    dependencies: Vec::new(),
                    next_generation: 1,
                }),
                events,
                default_gc_time: gc_time,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Returns the entry under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TypeMismatch`] if the cached data is not a `T`.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        key: &QueryKey,
    ) -> Result<Option<CacheEntry<T>>, QueryError> {
        let mut state = self.inner.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return Ok(None);
        };
        entry.last_accessed = Instant::now();
        entry.typed(key).map(Some)
    }

    /// Returns the data under `key`, or `None` if absent or of another type.
    #[must_use]
    pub fn get_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        match self.get::<T>(key) {
            Ok(entry) => entry.and_then(|entry| entry.data),
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "cached value has unexpected type");
                None
            }
        }
    }

    /// Returns `true` if an entry exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &QueryKey) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key starting with `prefix`, sorted.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let state = self.inner.state.lock();
        let mut keys: Vec<QueryKey> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Returns `true` if the entry under `key` is missing or stale.
    #[must_use]
    pub fn is_stale(&self, key: &QueryKey, stale_time: Duration) -> bool {
        let state = self.inner.state.lock();
        state.entries.get(key).is_none_or(|entry| {
            entry.state.invalidated
                || entry.state.fetched_at.is_none_or(|fetched_at| {
                    Instant::now().saturating_duration_since(fetched_at) >= stale_time
                })
        })
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Writes confirmed data: status `Success`, `fetched_at = now`, any
    /// error and invalidation cleared.
    pub fn set<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
        self.set_erased(key, Arc::new(data));
    }

    pub(crate) fn set_erased(&self, key: &QueryKey, data: ErasedValue) {
        {
            let mut state = self.inner.state.lock();
            let gc_time = self.inner.default_gc_time;
            let now = Instant::now();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| RawEntry::new(now, gc_time));
            entry.state = EntryState {
                data: Some(data),
                fetched_at: Some(now),
                status: QueryStatus::Success,
                error: None,
                invalidated: false,
                provisional: false,
            };
            entry.last_accessed = now;
        }
        self.emit(key, CacheEventKind::Updated);
    }

    /// Read-modify-write of the data under `key`, marked provisional.
    ///
    /// `updater` receives the current data (or `None`) and returns the new
    /// data; returning `None` leaves the entry untouched. `fetched_at` is not
    /// changed: a speculative value is not confirmed server state.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::TypeMismatch`] if the cached data is not a `T`.
    pub(crate) fn speculate<T, F>(&self, key: &QueryKey, updater: F) -> Result<bool, QueryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let written = {
            let mut state = self.inner.state.lock();
            let gc_time = self.inner.default_gc_time;
            let now = Instant::now();
            let current = match state.entries.get(key) {
                Some(entry) => entry.typed::<T>(key)?.data,
                None => None,
            };
            match updater(current.as_deref()) {
                Some(next) => {
                    let entry = state
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| RawEntry::new(now, gc_time));
                    entry.state.data = Some(Arc::new(next));
                    entry.state.provisional = true;
                    entry.state.status = entry.state.settled_status();
                    entry.last_accessed = now;
                    true
                }
                None => false,
            }
        };
        if written {
            self.emit(key, CacheEventKind::Speculated);
        }
        Ok(written)
    }

    /// Applies several speculative writes under one lock, so no reader sees
    /// some of them without the others. Each updater sees the value left by
    /// earlier writes in the batch.
    ///
    /// Nothing is written if any updater hits a type mismatch. Returns the
    /// keys written, in batch order.
    pub(crate) fn speculate_many(&self, writes: Vec<SpeculativeWrite>) -> Result<Vec<QueryKey>, QueryError> {
        let written = {
            let mut state = self.inner.state.lock();
            let mut staged: Vec<(QueryKey, ErasedValue)> = Vec::with_capacity(writes.len());
            for write in writes {
                let current = staged
                    .iter()
                    .rev()
                    .find(|(key, _)| key == &write.key)
                    .map(|(_, value)| Arc::clone(value))
                    .or_else(|| state.entries.get(&write.key).and_then(|entry| entry.state.data.clone()));
                if let Some(next) = (write.update)(&write.key, current)? {
                    staged.push((write.key, next));
                }
            }

            let gc_time = self.inner.default_gc_time;
            let now = Instant::now();
            let mut written: Vec<QueryKey> = Vec::with_capacity(staged.len());
            for (key, next) in staged {
                let entry = state
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| RawEntry::new(now, gc_time));
                entry.state.data = Some(next);
                entry.state.provisional = true;
                entry.state.status = entry.state.settled_status();
                entry.last_accessed = now;
                if !written.contains(&key) {
                    written.push(key);
                }
            }
            written
        };
        for key in &written {
            self.emit(key, CacheEventKind::Speculated);
        }
        Ok(written)
    }

    /// Marks every entry under `prefix` stale, fanning out through declared
    /// dependencies. Data is kept so views can keep rendering it while the
    /// refetch is in flight.
    ///
    /// Returns the number of entries marked.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marked = {
            let mut state = self.inner.state.lock();
            let prefixes = state.expand_dependencies(prefix);
            let cutoff = state.next_generation;
            let mut marked: Vec<QueryKey> = state
                .entries
                .iter_mut()
                .filter(|(key, _)| prefixes.iter().any(|prefix| key.starts_with(prefix)))
                .map(|(key, entry)| {
                    entry.state.invalidated = true;
                    entry.stale_below = cutoff;
                    key.clone()
                })
                .collect();
            marked.sort();
            marked
        };
        tracing::debug!(prefix = %prefix, count = marked.len(), "invalidated cache entries");
        for key in &marked {
            self.emit(key, CacheEventKind::Invalidated);
        }
        marked.len()
    }

    /// Declares that invalidating under `source` must also invalidate under
    /// `dependent`. Dependencies are transitive.
    pub fn add_dependency(&self, source: QueryKey, dependent: QueryKey) {
        let mut state = self.inner.state.lock();
        if !state
            .dependencies
            .iter()
            .any(|(existing_source, existing_dependent)| {
                existing_source == &source && existing_dependent == &dependent
            })
        {
            state.dependencies.push((source, dependent));
        }
    }

    /// Evicts the entry under `key`.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.inner.state.lock().entries.remove(key).is_some();
        if removed {
            self.emit(key, CacheEventKind::Removed);
        }
        removed
    }

    /// Evicts every entry.
    pub fn clear(&self) {
        let keys: Vec<QueryKey> = {
            let mut state = self.inner.state.lock();
            state.entries.drain().map(|(key, _)| key).collect()
        };
        for key in &keys {
            self.emit(key, CacheEventKind::Removed);
        }
    }

    /// Evicts unobserved, idle entries older than their GC time.
    ///
    /// Entries with a fetch in flight or a speculative value are kept.
    /// Returns the number of entries evicted.
    pub fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let evicted: Vec<QueryKey> = {
            let mut state = self.inner.state.lock();
            let expired: Vec<QueryKey> = state
                .entries
                .iter()
                .filter(|(_, entry)| {
                    entry.observers == 0
                        && entry.state.status != QueryStatus::Loading
                        && !entry.state.provisional
                        && now.saturating_duration_since(entry.last_accessed) >= entry.gc_time
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                state.entries.remove(key);
            }
            expired
        };
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "garbage-collected cache entries");
        }
        for key in &evicted {
            self.emit(key, CacheEventKind::Removed);
        }
        evicted.len()
    }

    /// Subscribes to changes for keys under `prefix`.
    #[must_use]
    pub fn subscribe(&self, prefix: &QueryKey) -> CacheSubscription {
        CacheSubscription::new(prefix.clone(), self.inner.events.subscribe())
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Registers an observer on `key`, creating an idle entry if needed.
    /// Observed entries are never garbage-collected.
    pub(crate) fn retain(&self, key: &QueryKey, gc_time: Duration) {
        let mut state = self.inner.state.lock();
        let now = Instant::now();
        let entry = state
            .entries
            .entry(key.clone())
            .or_insert_with(|| RawEntry::new(now, gc_time));
        entry.observers += 1;
        entry.gc_time = gc_time;
        entry.last_accessed = now;
    }

    /// Drops an observer registered with [`QueryCache::retain`].
    pub(crate) fn release(&self, key: &QueryKey) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
            entry.last_accessed = Instant::now();
        }
    }

    /// Number of observers registered on `key`.
    #[must_use]
    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map_or(0, |entry| entry.observers)
    }

    // -------------------------------------------------------------------------
    // Fetch Bookkeeping
    // -------------------------------------------------------------------------

    /// Marks `key` as loading and returns the generation the eventual result
    /// must carry to be written.
    pub(crate) fn begin_fetch(&self, key: &QueryKey) -> u64 {
        let generation = {
            let mut state = self.inner.state.lock();
            let generation = state.next_generation;
            state.next_generation += 1;
            let gc_time = self.inner.default_gc_time;
            let now = Instant::now();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| RawEntry::new(now, gc_time));
            entry.fetch_generation = generation;
            entry.state.status = QueryStatus::Loading;
            entry.last_accessed = now;
            generation
        };
        self.emit(key, CacheEventKind::FetchStarted);
        generation
    }

    /// Writes a fetch result if `generation` is still current and the entry
    /// holds no speculative value.
    ///
    /// Returns `true` if the cache was updated.
    pub(crate) fn complete_fetch(
        &self,
        key: &QueryKey,
        generation: u64,
        result: &Result<ErasedValue, QueryError>,
    ) -> bool {
        let kind = {
            let mut state = self.inner.state.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                tracing::debug!(key = %key, "fetch result for evicted entry discarded");
                return false;
            };
            if entry.fetch_generation != generation {
                tracing::debug!(key = %key, generation, "superseded fetch result discarded");
                return false;
            }
            entry.fetch_generation = 0;
            let now = Instant::now();
            entry.last_accessed = now;
            if entry.state.provisional {
                // A mutation owns this entry until it settles.
                entry.state.status = entry.state.settled_status();
                entry.state.invalidated = true;
                tracing::debug!(key = %key, "fetch result discarded over speculative value");
                return false;
            }
            match result {
                Ok(data) => {
                    let invalidated = generation < entry.stale_below;
                    if invalidated {
                        tracing::debug!(key = %key, generation, "fetch predates invalidation; entry stays stale");
                    }
                    entry.state = EntryState {
                        data: Some(Arc::clone(data)),
                        fetched_at: Some(now),
                        status: QueryStatus::Success,
                        error: None,
                        invalidated,
                        provisional: false,
                    };
                    CacheEventKind::Updated
                }
                Err(error) => {
                    entry.state.status = QueryStatus::Error;
                    entry.state.error = Some(error.clone());
                    CacheEventKind::FetchFailed
                }
            }
        };
        self.emit(key, kind);
        true
    }

    /// Voids the in-flight fetch for `key`: its eventual result will not be
    /// written, and the entry's status reverts to what it was before.
    pub(crate) fn cancel_fetch(&self, key: &QueryKey) -> bool {
        let cancelled = {
            let mut state = self.inner.state.lock();
            match state.entries.get_mut(key) {
                Some(entry) if entry.fetch_generation != 0 => {
                    entry.fetch_generation = 0;
                    entry.state.status = entry.state.settled_status();
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.emit(key, CacheEventKind::FetchCancelled);
        }
        cancelled
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Captures the restorable state under `key`.
    pub(crate) fn snapshot(&self, key: &QueryKey) -> EntrySnapshot {
        EntrySnapshot {
            state: self
                .inner
                .state
                .lock()
                .entries
                .get(key)
                .map(|entry| entry.state.clone()),
        }
    }

    /// Restores a snapshot. An absent snapshot removes the entry unless
    /// something is observing it, in which case it is reset to idle.
    ///
    /// Invalidation is sticky: if the entry was invalidated while the
    /// snapshot was held (a commit, a discarded fetch, a manual
    /// invalidate), the restored data is stale too.
    pub(crate) fn restore(&self, key: &QueryKey, snapshot: EntrySnapshot) {
        {
            let mut state = self.inner.state.lock();
            match snapshot.state {
                Some(restored) => {
                    let gc_time = self.inner.default_gc_time;
                    let now = Instant::now();
                    let entry = state
                        .entries
                        .entry(key.clone())
                        .or_insert_with(|| RawEntry::new(now, gc_time));
                    let invalidated = entry.state.invalidated;
                    entry.state = restored;
                    entry.state.invalidated |= invalidated;
                }
                None => {
                    let observed = state
                        .entries
                        .get(key)
                        .is_some_and(|entry| entry.observers > 0);
                    if observed {
                        if let Some(entry) = state.entries.get_mut(key) {
                            entry.state = EntryState::empty();
                        }
                    } else {
                        state.entries.remove(key);
                    }
                }
            }
        }
        self.emit(key, CacheEventKind::Restored);
    }

    /// Marks an existing entry provisional without changing its data, so
    /// fetch results landing while a mutation is open are discarded.
    pub(crate) fn hold(&self, key: &QueryKey) {
        if let Some(entry) = self.inner.state.lock().entries.get_mut(key) {
            entry.state.provisional = true;
        }
    }

    /// Clears the provisional flag once no mutation holds `key`.
    pub(crate) fn settle(&self, key: &QueryKey) {
        if let Some(entry) = self.inner.state.lock().entries.get_mut(key) {
            entry.state.provisional = false;
        }
    }

    fn emit(&self, key: &QueryKey, kind: CacheEventKind) {
        // Sending fails only when nobody is subscribed.
        let _ = self.inner.events.send(CacheEvent {
            key: key.clone(),
            kind,
        });
    }
}

impl CacheState {
    /// `prefix` plus every dependent prefix reachable from it.
    fn expand_dependencies(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let mut expanded = vec![prefix.clone()];
        let mut cursor = 0;
        while cursor < expanded.len() {
            let current = expanded[cursor].clone();
            for (source, dependent) in &self.dependencies {
                // Invalidating ["deals"] covers a source of ["deals","list"]
                // just as invalidating ["deals","list",{..}] does.
                let overlaps = source.starts_with(&current) || current.starts_with(source);
                if overlaps && !expanded.contains(dependent) {
                    expanded.push(dependent.clone());
                }
            }
            cursor += 1;
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DealKeys, PropertyKeys};
    use crate::pipeline::DealFilters;
    use rstest::rstest;

    #[rstest]
    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 42_u32);

        let entry = cache.get::<u32>(&key).unwrap().unwrap();
        assert_eq!(*entry.data.unwrap(), 42);
        assert_eq!(entry.status, QueryStatus::Success);
        assert!(entry.fetched_at.is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn get_with_wrong_type_is_a_mismatch() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 42_u32);

        assert!(matches!(
            cache.get::<String>(&key),
            Err(QueryError::TypeMismatch { .. })
        ));
        assert!(cache.get_data::<String>(&key).is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn invalidate_fans_out_through_dependencies() {
        let cache = QueryCache::new();
        cache.add_dependency(DealKeys::lists(), DealKeys::pipeline());
        cache.set(&DealKeys::list(&DealFilters::default()), 1_u8);
        cache.set(&DealKeys::pipeline(), 2_u8);
        cache.set(&PropertyKeys::detail("p-1"), 3_u8);

        assert_eq!(cache.invalidate(&DealKeys::list(&DealFilters::default())), 2);
        assert!(cache.get::<u8>(&DealKeys::pipeline()).unwrap().unwrap().is_invalidated);
        assert!(!cache.get::<u8>(&PropertyKeys::detail("p-1")).unwrap().unwrap().is_invalidated);
    }

    #[rstest]
    #[tokio::test]
    async fn superseded_fetch_result_is_discarded() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        let first = cache.begin_fetch(&key);
        let second = cache.begin_fetch(&key);

        assert!(!cache.complete_fetch(&key, first, &Ok(Arc::new(1_u8))));
        assert!(cache.complete_fetch(&key, second, &Ok(Arc::new(2_u8))));
        assert_eq!(cache.get_data::<u8>(&key).as_deref(), Some(&2));
    }

    #[rstest]
    #[tokio::test]
    async fn fetch_started_before_invalidation_lands_stale() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 1_u8);
        let generation = cache.begin_fetch(&key);
        cache.invalidate(&key);

        assert!(cache.complete_fetch(&key, generation, &Ok(Arc::new(2_u8))));
        let entry = cache.get::<u8>(&key).unwrap().unwrap();
        assert_eq!(entry.data.as_deref(), Some(&2));
        assert!(entry.is_invalidated);
        assert!(cache.is_stale(&key, Duration::from_secs(3600)));

        let generation = cache.begin_fetch(&key);
        assert!(cache.complete_fetch(&key, generation, &Ok(Arc::new(3_u8))));
        assert!(!cache.is_stale(&key, Duration::from_secs(3600)));
    }

    #[rstest]
    #[tokio::test]
    async fn restore_keeps_invalidation_set_while_held() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 1_u8);
        let snapshot = cache.snapshot(&key);
        cache.invalidate(&key);

        cache.restore(&key, snapshot);
        let entry = cache.get::<u8>(&key).unwrap().unwrap();
        assert_eq!(entry.data.as_deref(), Some(&1));
        assert!(entry.is_invalidated);
    }

    #[rstest]
    #[tokio::test]
    async fn failed_fetch_keeps_data() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 7_u8);
        let generation = cache.begin_fetch(&key);
        let error = QueryError::Cancelled(key.clone());
        cache.complete_fetch(&key, generation, &Err(error.clone()));

        let entry = cache.get::<u8>(&key).unwrap().unwrap();
        assert_eq!(entry.status, QueryStatus::Error);
        assert_eq!(entry.error, Some(error));
        assert_eq!(entry.data.as_deref(), Some(&7));
    }

    #[rstest]
    #[tokio::test]
    async fn cancel_fetch_reverts_status() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 7_u8);
        let generation = cache.begin_fetch(&key);

        assert!(cache.cancel_fetch(&key));
        assert_eq!(cache.get::<u8>(&key).unwrap().unwrap().status, QueryStatus::Success);
        assert!(!cache.complete_fetch(&key, generation, &Ok(Arc::new(9_u8))));
        assert_eq!(cache.get_data::<u8>(&key).as_deref(), Some(&7));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn garbage_collection_skips_observed_entries() {
        let cache = QueryCache::with_gc_time(Duration::from_secs(60));
        cache.set(&DealKeys::stats(), 1_u8);
        cache.set(&DealKeys::pipeline(), 2_u8);
        cache.retain(&DealKeys::pipeline(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.collect_garbage(), 1);
        assert!(!cache.contains(&DealKeys::stats()));
        assert!(cache.contains(&DealKeys::pipeline()));
    }

    #[rstest]
    #[tokio::test]
    async fn snapshot_restore_is_verbatim() {
        let cache = QueryCache::new();
        let key = DealKeys::stats();
        cache.set(&key, 1_u8);
        let snapshot = cache.snapshot(&key);

        cache.speculate::<u8, _>(&key, |current| current.map(|value| value + 1)).unwrap();
        assert!(cache.get::<u8>(&key).unwrap().unwrap().is_provisional);

        cache.restore(&key, snapshot);
        let entry = cache.get::<u8>(&key).unwrap().unwrap();
        assert_eq!(entry.data.as_deref(), Some(&1));
        assert!(!entry.is_provisional);
    }

    #[rstest]
    #[tokio::test]
    async fn subscription_filters_by_prefix() {
        let cache = QueryCache::new();
        let mut subscription = cache.subscribe(&DealKeys::all());
        cache.set(&PropertyKeys::detail("p-1"), 1_u8);
        cache.set(&DealKeys::stats(), 1_u8);

        let events = subscription.drain();
        assert_eq!(
            events,
            vec![CacheEvent {
                key: DealKeys::stats(),
                kind: CacheEventKind::Updated,
            }]
        );
    }
}
