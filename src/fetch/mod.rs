//! Fetch coordination: de-duplicated loads and background refresh.
//!
//! The [`FetchCoordinator`] guarantees at most one in-flight request per key.
//! The first caller for a key spawns the loader on the runtime; later callers
//! attach to the same shared result. When the loader finishes, the cache is
//! written exactly once (from inside the spawned task) and every waiter
//! receives the same value or error.
//!
//! # Cancellation
//!
//! [`FetchCoordinator::cancel`] is cooperative: it voids the fetch's
//! generation in the cache, so a late result can no longer be written, and
//! aborts the task. Waiters observe [`QueryError::Cancelled`].
//!
//! # Background Refresh
//!
//! [`FetchCoordinator::subscribe_interval`] re-runs a loader on a fixed
//! period while at least one [`RefetchSubscription`] for the key is alive.

mod interval;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::cache::{ErasedValue, KeyMap, QueryCache};
use crate::error::QueryError;
use crate::key::QueryKey;

pub use interval::RefetchSubscription;

use interval::IntervalRegistry;

type SharedFetch = Shared<BoxFuture<'static, Result<ErasedValue, QueryError>>>;

// =============================================================================
// Loader
// =============================================================================

/// A reusable async function producing a query's data.
///
/// Loaders are expected to call the transport and normalize the response
/// before returning, so everything that reaches the cache is already a
/// well-formed domain value.
pub struct Loader<T> {
    load: Arc<dyn Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>,
}

impl<T> Clone for Loader<T> {
    fn clone(&self) -> Self {
        Self {
            load: Arc::clone(&self.load),
        }
    }
}

impl<T> std::fmt::Debug for Loader<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("Loader").finish_non_exhaustive()
    }
}

impl<T: 'static> Loader<T> {
    /// Wraps an async closure.
    pub fn new<F, Fut>(load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        Self {
            load: Arc::new(move || load().boxed()),
        }
    }

    /// Starts one load.
    #[must_use]
    pub fn load(&self) -> BoxFuture<'static, Result<T, QueryError>> {
        (self.load)()
    }
}

// =============================================================================
// Fetch Coordinator
// =============================================================================

struct InFlight {
    generation: u64,
    future: SharedFetch,
    abort: AbortHandle,
}

/// De-duplicates concurrent fetches and resolves them against a cache.
///
/// Cloning yields a handle to the same coordinator.
#[derive(Clone)]
pub struct FetchCoordinator {
    cache: QueryCache,
    in_flight: Arc<Mutex<KeyMap<InFlight>>>,
    intervals: Arc<IntervalRegistry>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FetchCoordinator")
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    /// Creates a coordinator writing into `cache`.
    #[must_use]
    pub fn new(cache: QueryCache) -> Self {
        Self {
            cache,
            in_flight: Arc::new(Mutex::new(KeyMap::default())),
            intervals: Arc::new(IntervalRegistry::default()),
        }
    }

    /// The cache this coordinator writes into.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Fetches `key`, joining an in-flight request if one exists.
    ///
    /// `loader` runs only if no request for `key` is outstanding. It runs
    /// on a spawned task, so it completes (and the cache is updated) even if
    /// every caller stops waiting.
    ///
    /// # Errors
    ///
    /// Returns the loader's error, [`QueryError::Cancelled`] if the fetch was
    /// cancelled, or [`QueryError::TypeMismatch`] if a joined request for the
    /// same key produces a different type.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, loader: F) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        let shared = self.join_or_start(key, loader);
        let value = shared.await?;
        value.downcast::<T>().map_err(|_| QueryError::TypeMismatch {
            key: key.clone(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Fetches `key` with a reusable [`Loader`].
    ///
    /// # Errors
    ///
    /// See [`FetchCoordinator::fetch`].
    pub async fn fetch_with<T>(&self, key: &QueryKey, loader: &Loader<T>) -> Result<Arc<T>, QueryError>
    where
        T: Send + Sync + 'static,
    {
        let loader = loader.clone();
        self.fetch(key, move || loader.load()).await
    }

    /// Starts fetching `key` in the background unless a request is already
    /// outstanding. Does not wait for the result.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn prefetch<T>(&self, key: &QueryKey, loader: &Loader<T>)
    where
        T: Send + Sync + 'static,
    {
        let loader = loader.clone();
        drop(self.join_or_start(key, move || loader.load()));
    }

    fn join_or_start<T, F, Fut>(&self, key: &QueryKey, loader: F) -> SharedFetch
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        // Held until the new request is registered, so the task's own
        // cleanup cannot run before the registration it removes.
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(key) {
            tracing::trace!(key = %key, "joining in-flight fetch");
            return existing.future.clone();
        }

        let generation = self.cache.begin_fetch(key);
        tracing::debug!(key = %key, generation, "fetch started");

        let cache = self.cache.clone();
        let registry = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let result = match AssertUnwindSafe(loader()).catch_unwind().await {
                Ok(result) => result.map(|value| Arc::new(value) as ErasedValue),
                Err(_) => {
                    tracing::error!(key = %task_key, "loader panicked");
                    Err(QueryError::Aborted(task_key.clone()))
                }
            };
            if let Err(error) = &result {
                tracing::warn!(key = %task_key, error = %error, "fetch failed");
            }
            cache.complete_fetch(&task_key, generation, &result);

            let mut in_flight = registry.lock();
            if in_flight
                .get(&task_key)
                .is_some_and(|entry| entry.generation == generation)
            {
                in_flight.remove(&task_key);
            }
            result
        });

        let abort = handle.abort_handle();
        let waiter_key = key.clone();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) if join_error.is_cancelled() => Err(QueryError::Cancelled(waiter_key)),
                Err(_) => Err(QueryError::Aborted(waiter_key)),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                future: future.clone(),
                abort,
            },
        );
        future
    }

    /// Cancels the in-flight fetch for `key`, if any.
    ///
    /// The fetch's result is voided even if the task has already produced it
    /// but not yet written it.
    pub fn cancel(&self, key: &QueryKey) -> bool {
        let Some(entry) = self.in_flight.lock().remove(key) else {
            return false;
        };
        entry.abort.abort();
        self.cache.cancel_fetch(key);
        tracing::debug!(key = %key, generation = entry.generation, "fetch cancelled");
        true
    }

    /// Cancels every in-flight fetch under `prefix`. Returns how many.
    pub fn cancel_prefix(&self, prefix: &QueryKey) -> usize {
        let keys: Vec<QueryKey> = self
            .in_flight
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }

    /// Returns `true` while a request for `key` is outstanding.
    #[must_use]
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Number of outstanding requests.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Re-runs `loader` for `key` every `period` while the returned
    /// subscription (or another one for the same key) is alive.
    ///
    /// The first tick fires one `period` after the first subscription. When
    /// several subscribers ask for different periods, the shortest wins.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use = "the background refresh stops when the subscription is dropped"]
    pub fn subscribe_interval<T>(
        &self,
        key: &QueryKey,
        period: std::time::Duration,
        loader: Loader<T>,
    ) -> RefetchSubscription
    where
        T: Send + Sync + 'static,
    {
        let coordinator = self.clone();
        let task_key = key.clone();
        let spawn = move || {
            let coordinator = coordinator.clone();
            let key = task_key.clone();
            let loader = loader.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tracing::trace!(key = %key, "background refetch");
                    // Failures are recorded on the cache entry.
                    let _ = coordinator.fetch_with(&key, &loader).await;
                }
            })
            .abort_handle()
        };
        self.intervals.register(key, period, spawn)
    }

    /// Number of keys with an active background refresh.
    #[must_use]
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::key::DealKeys;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_share_one_call() {
        let coordinator = FetchCoordinator::new(QueryCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = DealKeys::stats();

        let fetches = (0..5).map(|_| {
            let calls = Arc::clone(&calls);
            coordinator.fetch(&key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, QueryError>(7_u32)
            })
        });
        let results = futures::future::join_all(fetches).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|result| result.as_deref() == Ok(&7)));
        assert_eq!(coordinator.cache().get_data::<u32>(&key).as_deref(), Some(&7));
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn failure_reaches_every_waiter() {
        let coordinator = FetchCoordinator::new(QueryCache::new());
        let key = DealKeys::stats();
        let error = QueryError::Transport(TransportError::status(502, "bad gateway"));
        let expected = error.clone();

        let first = coordinator.fetch(&key, move || async move { Err::<u32, _>(error) });
        let second = coordinator.fetch(&key, || async { Ok::<u32, QueryError>(1) });
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, Err(expected.clone()));
        assert_eq!(second, Err(expected));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn cancelled_fetch_does_not_write() {
        let coordinator = FetchCoordinator::new(QueryCache::new());
        let key = DealKeys::stats();
        coordinator.cache().set(&key, 1_u32);

        let pending = coordinator.fetch(&key, || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, QueryError>(2_u32)
        });
        let cancel = async {
            tokio::task::yield_now().await;
            assert!(coordinator.cancel(&key));
        };
        let (result, ()) = tokio::join!(pending, cancel);

        assert_eq!(result, Err(QueryError::Cancelled(key.clone())));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(coordinator.cache().get_data::<u32>(&key).as_deref(), Some(&1));
    }

    #[rstest]
    #[tokio::test]
    async fn panicking_loader_is_reported_as_aborted() {
        let coordinator = FetchCoordinator::new(QueryCache::new());
        let key = DealKeys::stats();

        async fn explode() -> Result<u32, QueryError> {
            panic!("loader exploded")
        }

        let result = coordinator.fetch(&key, explode).await;

        assert_eq!(result, Err(QueryError::Aborted(key)));
        assert_eq!(coordinator.in_flight_count(), 0);
    }
}
