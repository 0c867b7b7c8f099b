//! The `mutate(input)` surface over [`OptimisticEngine`].

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::MutationError;
use crate::key::QueryKey;
use crate::notify::{Notification, Notifier};

use super::{MutationSession, OptimisticEngine};

/// Lifecycle of the most recent `mutate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationState {
    /// Nothing has run yet.
    #[default]
    Idle,
    /// Speculative values are in the cache and the remote call is pending.
    Speculating,
    /// The remote call succeeded.
    Committed,
    /// The remote call failed and the cache was restored.
    RolledBack,
}

type MutationFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, Result<O, MutationError>> + Send + Sync>;
type KeysFn<I> = Arc<dyn Fn(&I) -> Vec<QueryKey> + Send + Sync>;
type MutateHook<I> = Arc<dyn Fn(&I, &mut MutationSession) -> Result<(), MutationError> + Send + Sync>;
type SuccessHook<I, O> = Arc<dyn Fn(&I, &O) + Send + Sync>;
type ErrorHook<I> = Arc<dyn Fn(&I, &MutationError) + Send + Sync>;
type SettledHook<I, O> = Arc<dyn Fn(&I, Result<&O, &MutationError>) + Send + Sync>;

#[derive(Default)]
struct Status {
    pending: usize,
    state: MutationState,
}

/// A reusable optimistic mutation.
///
/// Each [`mutate`](Self::mutate) call opens a session over the keys returned
/// by [`affects`](Self::affects), runs [`on_mutate`](Self::on_mutate) to
/// apply speculative writes, then calls the remote function. On failure the
/// session is rolled back *before* the error is reported through the
/// notifier, `on_error` and the returned `Err`.
///
/// Cloning yields a handle sharing the same pending state.
pub struct Mutation<I, O> {
    engine: OptimisticEngine,
    mutation_fn: MutationFn<I, O>,
    affects: Option<KeysFn<I>>,
    invalidates: Option<KeysFn<I>>,
    on_mutate: Option<MutateHook<I>>,
    on_success: Option<SuccessHook<I, O>>,
    on_error: Option<ErrorHook<I>>,
    on_settled: Option<SettledHook<I, O>>,
    notifier: Option<Arc<dyn Notifier>>,
    failure_title: String,
    status: Arc<Mutex<Status>>,
}

impl<I, O> Clone for Mutation<I, O> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            mutation_fn: Arc::clone(&self.mutation_fn),
            affects: self.affects.clone(),
            invalidates: self.invalidates.clone(),
            on_mutate: self.on_mutate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
            notifier: self.notifier.clone(),
            failure_title: self.failure_title.clone(),
            status: Arc::clone(&self.status),
        }
    }
}

impl<I, O> std::fmt::Debug for Mutation<I, O> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Mutation")
            .field("state", &self.state())
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

impl<I, O> Mutation<I, O> {
    /// Creates a mutation calling `mutation_fn` for the remote write.
    pub fn new<F, Fut, E>(engine: OptimisticEngine, mutation_fn: F) -> Self
    where
        I: 'static,
        O: 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        E: Into<MutationError>,
    {
        Self {
            engine,
            mutation_fn: Arc::new(move |input| {
                mutation_fn(input)
                    .map(|result| result.map_err(Into::into))
                    .boxed()
            }),
            affects: None,
            invalidates: None,
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
            notifier: None,
            failure_title: String::from("Change failed"),
            status: Arc::new(Mutex::new(Status::default())),
        }
    }

    /// Key prefixes to snapshot before speculating.
    #[must_use]
    pub fn affects<F>(mut self, keys: F) -> Self
    where
        F: Fn(&I) -> Vec<QueryKey> + Send + Sync + 'static,
    {
        self.affects = Some(Arc::new(keys));
        self
    }

    /// Extra prefixes to invalidate on success.
    #[must_use]
    pub fn invalidates<F>(mut self, prefixes: F) -> Self
    where
        F: Fn(&I) -> Vec<QueryKey> + Send + Sync + 'static,
    {
        self.invalidates = Some(Arc::new(prefixes));
        self
    }

    /// Runs after snapshots are taken and before the remote call; apply
    /// speculative writes here. An error aborts the mutation.
    #[must_use]
    pub fn on_mutate<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I, &mut MutationSession) -> Result<(), MutationError> + Send + Sync + 'static,
    {
        self.on_mutate = Some(Arc::new(hook));
        self
    }

    /// Runs after a successful commit.
    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I, &O) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    /// Runs after a rollback.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I, &MutationError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Runs last, whatever the outcome.
    #[must_use]
    pub fn on_settled<F>(mut self, hook: F) -> Self
    where
        F: Fn(&I, Result<&O, &MutationError>) + Send + Sync + 'static,
    {
        self.on_settled = Some(Arc::new(hook));
        self
    }

    /// Reports failures through `notifier` under `title`.
    #[must_use]
    pub fn notify_with(mut self, notifier: Arc<dyn Notifier>, title: impl Into<String>) -> Self {
        self.notifier = Some(notifier);
        self.failure_title = title.into();
        self
    }

    /// Whether a `mutate` call is in progress.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status.lock().pending > 0
    }

    /// State of the most recent `mutate` call.
    #[must_use]
    pub fn state(&self) -> MutationState {
        self.status.lock().state
    }

    /// Runs the optimistic protocol for `input`.
    ///
    /// # Errors
    ///
    /// Returns the hook's or remote call's error after the cache has been
    /// rolled back and the failure reported.
    pub async fn mutate(&self, input: I) -> Result<O, MutationError>
    where
        I: Clone,
    {
        let mut pending = PendingGuard::enter(&self.status);
        let affected = self.affects.as_ref().map(|keys| keys(&input)).unwrap_or_default();
        let mut session = self.engine.begin(&affected);
        if let Some(prefixes) = &self.invalidates {
            for prefix in prefixes(&input) {
                session.invalidates(prefix);
            }
        }

        if let Some(hook) = &self.on_mutate {
            if let Err(error) = hook(&input, &mut session) {
                return Err(self.fail(&input, session, &mut pending, error));
            }
        }

        match (self.mutation_fn)(input.clone()).await {
            Ok(output) => {
                session.commit();
                pending.finish(MutationState::Committed);
                if let Some(hook) = &self.on_success {
                    hook(&input, &output);
                }
                if let Some(hook) = &self.on_settled {
                    hook(&input, Ok(&output));
                }
                Ok(output)
            }
            Err(error) => Err(self.fail(&input, session, &mut pending, error)),
        }
    }

    fn fail(
        &self,
        input: &I,
        session: MutationSession,
        pending: &mut PendingGuard<'_>,
        error: MutationError,
    ) -> MutationError {
        let id = session.id();
        session.rollback();
        pending.finish(MutationState::RolledBack);
        tracing::warn!(mutation = %id, error = %error, "mutation failed");
        match &self.notifier {
            Some(notifier) => notifier.notify(Notification::error(self.failure_title.clone(), &error)),
            None => tracing::warn!(mutation = %id, "no notifier configured for failed mutation"),
        }
        if let Some(hook) = &self.on_error {
            hook(input, &error);
        }
        if let Some(hook) = &self.on_settled {
            hook(input, Err(&error));
        }
        error
    }
}

/// Tracks one `mutate` call; a call dropped mid-flight counts as rolled
/// back, matching what its session's drop does to the cache.
struct PendingGuard<'a> {
    status: &'a Mutex<Status>,
    finished: bool,
}

impl<'a> PendingGuard<'a> {
    fn enter(status: &'a Mutex<Status>) -> Self {
        {
            let mut status = status.lock();
            status.pending += 1;
            status.state = MutationState::Speculating;
        }
        Self {
            status,
            finished: false,
        }
    }

    fn finish(&mut self, state: MutationState) {
        self.status.lock().state = state;
        self.finished = true;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut status = self.status.lock();
        status.pending -= 1;
        if !self.finished {
            status.state = MutationState::RolledBack;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::error::{MutationConflictError, TransportError};
    use crate::key::RateKeys;
    use crate::notify::RecordingNotifier;
    use crate::query::QueryClient;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rate_mutation(
        engine: &OptimisticEngine,
        remote: Result<i64, TransportError>,
    ) -> Mutation<i64, i64> {
        Mutation::new(engine.clone(), move |_: i64| {
            let remote = remote.clone();
            async move { remote }
        })
        .affects(|_| vec![RateKeys::current()])
        .on_mutate(|next, session| {
            let next = *next;
            session.apply_speculative::<i64, _>(&RateKeys::current(), move |_| Some(next))?;
            Ok(())
        })
    }

    #[rstest]
    #[tokio::test]
    async fn success_commits_and_runs_hooks() {
        let engine = OptimisticEngine::new(QueryClient::new(QueryCache::new()));
        engine.client().cache().set(&RateKeys::current(), 1_i64);
        let settled = Arc::new(AtomicUsize::new(0));
        let settled_hook = Arc::clone(&settled);

        let mutation = rate_mutation(&engine, Ok(5)).on_settled(move |_, result| {
            assert!(result.is_ok());
            settled_hook.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(mutation.state(), MutationState::Idle);

        assert_eq!(mutation.mutate(5).await.unwrap(), 5);
        assert_eq!(mutation.state(), MutationState::Committed);
        assert!(!mutation.is_pending());
        assert_eq!(settled.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.client().cache().get_data::<i64>(&RateKeys::current()).as_deref(),
            Some(&5)
        );
    }

    #[rstest]
    #[tokio::test]
    async fn failure_rolls_back_then_notifies_once() {
        let engine = OptimisticEngine::new(QueryClient::new(QueryCache::new()));
        engine.client().cache().set(&RateKeys::current(), 1_i64);
        let notifier = Arc::new(RecordingNotifier::new());
        let seen_on_error = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_on_error);
        let cache = engine.client().cache().clone();

        let mutation = rate_mutation(&engine, Err(TransportError::status(409, "stale revision")))
            .notify_with(notifier.clone(), "Rate update failed")
            .on_error(move |_, _| {
                *seen.lock() = cache.get_data::<i64>(&RateKeys::current()).map(|value| *value);
            });

        let error = mutation.mutate(5).await.unwrap_err();
        assert_eq!(
            error,
            MutationError::Conflict(MutationConflictError::new("stale revision"))
        );
        assert_eq!(mutation.state(), MutationState::RolledBack);
        assert_eq!(*seen_on_error.lock(), Some(1));
        assert_eq!(notifier.len(), 1);
        assert_eq!(notifier.notifications()[0].title, "Rate update failed");
    }

    #[rstest]
    #[tokio::test]
    async fn pending_while_remote_call_runs() {
        let engine = OptimisticEngine::new(QueryClient::new(QueryCache::new()));
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let gate = Arc::new(Mutex::new(Some(gate)));
        let mutation: Mutation<(), ()> = Mutation::new(engine, move |()| {
            let gate = gate.lock().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok::<_, MutationError>(())
            }
        });

        let running = tokio::spawn({
            let mutation = mutation.clone();
            async move { mutation.mutate(()).await }
        });
        tokio::task::yield_now().await;
        assert!(mutation.is_pending());
        assert_eq!(mutation.state(), MutationState::Speculating);

        release.send(()).unwrap();
        running.await.unwrap().unwrap();
        assert!(!mutation.is_pending());
    }
}
