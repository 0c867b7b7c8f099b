//! Query client: the read-side surface used by views.
//!
//! [`QueryClient`] ties a [`QueryCache`] to a [`FetchCoordinator`] and applies
//! each query's staleness policy:
//!
//! - fresh data is served from the cache with no network call;
//! - stale data is served immediately while a background refetch runs;
//! - missing data is fetched and awaited.
//!
//! [`QueryClient::watch`] returns a [`QueryObserver`], which keeps the entry
//! alive, optionally refreshes it on an interval, and lets a view wait for
//! changes. Dropping the observer unsubscribes.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::cache::{CacheEventKind, CacheSubscription, QueryCache, QueryStatus};
use crate::error::QueryError;
use crate::fetch::{FetchCoordinator, Loader, RefetchSubscription};
use crate::key::QueryKey;

// =============================================================================
// Options
// =============================================================================

/// Per-query caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long fetched data counts as fresh.
    pub stale_time: Duration,
    /// Background refresh period while observed.
    pub refetch_interval: Option<Duration>,
    /// How long an unobserved entry survives before eviction.
    pub gc_time: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            refetch_interval: None,
            gc_time: Duration::from_secs(5 * 60),
        }
    }
}

impl QueryOptions {
    /// Sets the stale time.
    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Enables background refresh.
    #[must_use]
    pub const fn with_refetch_interval(mut self, period: Duration) -> Self {
        self.refetch_interval = Some(period);
        self
    }

    /// Sets the GC time.
    #[must_use]
    pub const fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }
}

// =============================================================================
// Query Client
// =============================================================================

/// Read-side entry point.
///
/// Cloning yields a handle to the same cache and coordinator.
#[derive(Debug, Clone)]
pub struct QueryClient {
    cache: QueryCache,
    coordinator: FetchCoordinator,
}

impl QueryClient {
    /// Creates a client over `cache`.
    #[must_use]
    pub fn new(cache: QueryCache) -> Self {
        let coordinator = FetchCoordinator::new(cache.clone());
        Self { cache, coordinator }
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// The underlying fetch coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Reads `key` according to its staleness policy.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when there was no cached data to fall back
    /// on, or [`QueryError::TypeMismatch`] if the cached data is not a `T`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn fetch_query<T>(
        &self,
        key: &QueryKey,
        loader: &Loader<T>,
        options: &QueryOptions,
    ) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
    {
        if let Some(entry) = self.cache.get::<T>(key)? {
            if let Some(data) = entry.data.clone() {
                if entry.is_stale(options.stale_time, Instant::now()) {
                    tracing::trace!(key = %key, "serving stale data while revalidating");
                    self.coordinator.prefetch(key, loader);
                }
                return Ok(data);
            }
        }
        self.coordinator.fetch_with(key, loader).await
    }

    /// Marks every entry under `prefix` stale.
    ///
    /// Use after out-of-band events (an import completed, another tool
    /// edited data). Observed entries refetch on their next read.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.cache.invalidate(prefix)
    }

    /// Starts observing `key`.
    ///
    /// Kicks off a fetch if the entry is missing or stale and, if
    /// `options.refetch_interval` is set, keeps it refreshed while the
    /// observer lives.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use = "the query is unsubscribed when the observer is dropped"]
    pub fn watch<T>(&self, key: &QueryKey, loader: Loader<T>, options: QueryOptions) -> QueryObserver<T>
    where
        T: Send + Sync + 'static,
    {
        self.cache.retain(key, options.gc_time);
        let events = self.cache.subscribe(key);
        if self.cache.is_stale(key, options.stale_time) && !self.coordinator.is_fetching(key) {
            self.coordinator.prefetch(key, &loader);
        }
        let refetch = options
            .refetch_interval
            .map(|period| self.coordinator.subscribe_interval(key, period, loader.clone()));
        QueryObserver {
            client: self.clone(),
            key: key.clone(),
            loader,
            options,
            events,
            _refetch: refetch,
            _data: PhantomData,
        }
    }

    /// Runs [`QueryCache::collect_garbage`] every `period` until the handle
    /// is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use = "garbage collection stops when the handle is dropped"]
    pub fn spawn_gc(&self, period: Duration) -> GcHandle {
        let cache = self.cache.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let evicted = cache.collect_garbage();
                tracing::trace!(evicted, "gc sweep");
            }
        });
        GcHandle {
            task: task.abort_handle(),
        }
    }
}

/// Stops the periodic GC sweep when dropped.
#[derive(Debug)]
pub struct GcHandle {
    task: AbortHandle,
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Observer
// =============================================================================

/// What a view renders for one query.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    /// Last known data, possibly stale or provisional.
    pub data: Option<Arc<T>>,
    /// Lifecycle status.
    pub status: QueryStatus,
    /// Most recent fetch error.
    pub error: Option<QueryError>,
    /// Whether the data is due for a refetch.
    pub is_stale: bool,
    /// Whether a fetch is in flight.
    pub is_fetching: bool,
}

/// A live subscription to one query.
pub struct QueryObserver<T> {
    client: QueryClient,
    key: QueryKey,
    loader: Loader<T>,
    options: QueryOptions,
    events: CacheSubscription,
    _refetch: Option<RefetchSubscription>,
    _data: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for QueryObserver<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("QueryObserver")
            .field("key", &self.key)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
    /// The observed key.
    #[must_use]
    pub const fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Reads the current state. A stale entry is refetched in the
    /// background as a side effect.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn result(&self) -> QueryResult<T> {
        let cache = self.client.cache();
        let coordinator = self.client.coordinator();
        let entry = match cache.get::<T>(&self.key) {
            Ok(entry) => entry,
            Err(error) => {
                return QueryResult {
                    data: None,
                    status: QueryStatus::Error,
                    error: Some(error),
                    is_stale: true,
                    is_fetching: false,
                };
            }
        };
        let is_stale = entry
            .as_ref()
            .is_none_or(|entry| entry.is_stale(self.options.stale_time, Instant::now()));
        let provisional = entry.as_ref().is_some_and(|entry| entry.is_provisional);
        if is_stale && !provisional && !coordinator.is_fetching(&self.key) {
            coordinator.prefetch(&self.key, &self.loader);
        }
        match entry {
            Some(entry) => QueryResult {
                is_fetching: coordinator.is_fetching(&self.key),
                data: entry.data,
                status: entry.status,
                error: entry.error,
                is_stale,
            },
            None => QueryResult {
                data: None,
                status: QueryStatus::Idle,
                error: None,
                is_stale,
                is_fetching: coordinator.is_fetching(&self.key),
            },
        }
    }

    /// Fetches now, joining any request already in flight.
    ///
    /// # Errors
    ///
    /// Returns the loader's error.
    pub async fn refetch(&self) -> Result<Arc<T>, QueryError> {
        self.client
            .coordinator()
            .fetch_with(&self.key, &self.loader)
            .await
    }

    /// Waits until the observed entry changes.
    ///
    /// Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<CacheEventKind> {
        loop {
            let event = self.events.recv().await?;
            if event.key == self.key || event.kind == CacheEventKind::Lagged {
                return Some(event.kind);
            }
        }
    }
}

impl<T> Drop for QueryObserver<T> {
    fn drop(&mut self) {
        self.client.cache().release(&self.key);
    }
}
