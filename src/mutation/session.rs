//! One in-flight optimistic mutation.

use crate::cache::{QueryCache, SpeculativeWrite};
use crate::error::MutationError;
use crate::key::QueryKey;

use super::ledger::RollbackStep;
use super::{MutationId, OptimisticEngine};

/// Speculative writes applied together by
/// [`MutationSession::apply_batch`].
#[derive(Default)]
pub struct SpeculativeBatch {
    writes: Vec<SpeculativeWrite>,
}

impl std::fmt::Debug for SpeculativeBatch {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.writes.iter().map(|write| &write.key))
            .finish()
    }
}

impl SpeculativeBatch {
    /// An empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `updater(current)` for `key`.
    pub fn update<T, F>(&mut self, key: &QueryKey, updater: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T> + Send + 'static,
    {
        self.writes.push(SpeculativeWrite::new(key.clone(), updater));
        self
    }

    /// Number of queued writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// An open mutation holding snapshots of the keys it affects.
///
/// Consumed by [`commit`](Self::commit) or [`rollback`](Self::rollback).
/// Dropping an open session rolls it back, so a cancelled caller never
/// leaves speculative data behind.
pub struct MutationSession {
    engine: OptimisticEngine,
    id: MutationId,
    keys: Vec<QueryKey>,
    dependents: Vec<QueryKey>,
    open: bool,
}

impl std::fmt::Debug for MutationSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MutationSession")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("dependents", &self.dependents)
            .finish_non_exhaustive()
    }
}

impl MutationSession {
    pub(super) const fn new(engine: OptimisticEngine, id: MutationId, keys: Vec<QueryKey>) -> Self {
        Self {
            engine,
            id,
            keys,
            dependents: Vec::new(),
            open: true,
        }
    }

    /// This mutation's id.
    #[must_use]
    pub const fn id(&self) -> MutationId {
        self.id
    }

    /// Keys snapshotted so far, in capture order.
    #[must_use]
    pub fn affected_keys(&self) -> &[QueryKey] {
        &self.keys
    }

    /// The cache being mutated, for reading current values.
    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        self.engine.client.cache()
    }

    /// Declares a prefix to invalidate on commit in addition to the
    /// affected keys.
    pub fn invalidates(&mut self, prefix: QueryKey) -> &mut Self {
        if !self.dependents.contains(&prefix) {
            self.dependents.push(prefix);
        }
        self
    }

    /// Writes `updater(current)` into the cache as a provisional value.
    ///
    /// A key not covered by [`OptimisticEngine::begin`] is captured first.
    /// Returns `false` if `updater` declined to write.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Speculation`] if the cached data under `key`
    /// is not a `T`.
    pub fn apply_speculative<T, F>(&mut self, key: &QueryKey, updater: F) -> Result<bool, MutationError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let engine = self.engine.clone();
        let mut ledger = engine.shared.ledger.lock();
        if !ledger.holds(key, self.id) {
            engine.capture(&mut ledger, self.id, key);
            self.keys.push(key.clone());
        }
        let written = engine.client.cache().speculate(key, updater)?;
        drop(ledger);
        if written {
            tracing::trace!(mutation = %self.id, key = %key, "speculative write");
        }
        Ok(written)
    }

    /// Writes every update in `batch` as one step: readers see all of them
    /// or none. Keys not covered by [`OptimisticEngine::begin`] are captured
    /// first.
    ///
    /// Returns the number of keys written.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Speculation`] if any cached value has the
    /// wrong type, in which case nothing is written.
    pub fn apply_batch(&mut self, batch: SpeculativeBatch) -> Result<usize, MutationError> {
        let engine = self.engine.clone();
        let mut ledger = engine.shared.ledger.lock();
        for write in &batch.writes {
            if !ledger.holds(&write.key, self.id) {
                engine.capture(&mut ledger, self.id, &write.key);
                self.keys.push(write.key.clone());
            }
        }
        let written = engine.client.cache().speculate_many(batch.writes)?;
        drop(ledger);
        tracing::trace!(mutation = %self.id, keys = written.len(), "speculative batch");
        Ok(written.len())
    }

    /// Confirms the mutation: drops the snapshots and invalidates the
    /// affected keys and declared dependents so the next read reconciles
    /// with the server.
    pub fn commit(mut self) {
        self.open = false;
        let cache = self.engine.client.cache();
        {
            let mut ledger = self.engine.shared.ledger.lock();
            for key in &self.keys {
                if ledger.commit(key, self.id) {
                    cache.settle(key);
                }
            }
            for key in self.keys.iter().chain(&self.dependents) {
                cache.invalidate(key);
            }
        }
        tracing::debug!(mutation = %self.id, keys = self.keys.len(), "mutation committed");
    }

    /// Abandons the mutation, restoring every snapshot in reverse capture
    /// order.
    pub fn rollback(mut self) {
        self.roll_back();
    }

    fn roll_back(&mut self) {
        self.open = false;
        let cache = self.engine.client.cache();
        let mut restored = 0_usize;
        {
            let mut ledger = self.engine.shared.ledger.lock();
            for key in self.keys.iter().rev() {
                let popped = ledger.rollback(key, self.id);
                match popped.step {
                    RollbackStep::Restore(snapshot) => {
                        cache.restore(key, snapshot);
                        restored += 1;
                    }
                    RollbackStep::Invalidate => {
                        cache.invalidate(key);
                    }
                }
                if popped.settled {
                    cache.settle(key);
                }
            }
        }
        tracing::warn!(
            mutation = %self.id,
            restored,
            invalidated = self.keys.len() - restored,
            "mutation rolled back"
        );
    }
}

impl Drop for MutationSession {
    fn drop(&mut self) {
        if self.open {
            tracing::debug!(mutation = %self.id, "open mutation dropped");
            self.roll_back();
        }
    }
}
