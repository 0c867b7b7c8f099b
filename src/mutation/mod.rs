//! Optimistic mutations.
//!
//! A mutation runs in three steps:
//!
//! 1. [`OptimisticEngine::begin`] cancels in-flight fetches for the affected
//!    keys, snapshots them and holds them so late fetch results are
//!    discarded;
//! 2. [`MutationSession::apply_speculative`] writes the expected result into
//!    the cache immediately ([`MutationSession::apply_batch`] writes several
//!    keys in one step);
//! 3. the remote call decides: [`MutationSession::commit`] drops the
//!    snapshots and invalidates the affected keys plus declared dependents,
//!    while [`MutationSession::rollback`] restores every snapshot verbatim in
//!    reverse capture order.
//!
//! Overlapping mutations on the same key stack up: a later `begin` snapshots
//! the speculative value left by the earlier one, so rolling back the later
//! mutation never resurrects data older than the earlier one.
//!
//! [`Mutation`] wraps the protocol behind a `mutate(input)` call with
//! lifecycle hooks and failure notification.
//!
//! # Examples
//!
//! ```rust
//! use dealboard::cache::QueryCache;
//! use dealboard::key::RateKeys;
//! use dealboard::mutation::OptimisticEngine;
//! use dealboard::query::QueryClient;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = QueryClient::new(QueryCache::new());
//! let key = RateKeys::current();
//! client.cache().set(&key, 6.25_f64);
//!
//! let engine = OptimisticEngine::new(client.clone());
//! let mut session = engine.begin(&[key.clone()]);
//! session
//!     .apply_speculative::<f64, _>(&key, |rate| rate.map(|rate| rate + 0.25))
//!     .unwrap();
//! assert_eq!(client.cache().get_data::<f64>(&key).as_deref(), Some(&6.5));
//!
//! session.rollback();
//! assert_eq!(client.cache().get_data::<f64>(&key).as_deref(), Some(&6.25));
//! # }
//! ```

mod handle;
mod ledger;
mod session;

pub use handle::{Mutation, MutationState};
pub use session::{MutationSession, SpeculativeBatch};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::key::QueryKey;
use crate::query::QueryClient;

use ledger::SpeculationLedger;

/// Identifies one mutation for the lifetime of its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Opens [`MutationSession`]s against one [`QueryClient`].
///
/// Cloning yields a handle to the same engine; overlapping mutations must go
/// through the same engine to be layered correctly.
#[derive(Clone)]
pub struct OptimisticEngine {
    client: QueryClient,
    shared: Arc<EngineShared>,
}

struct EngineShared {
    // Locked before the cache, never after.
    ledger: Mutex<SpeculationLedger>,
    next_id: AtomicU64,
}

impl fmt::Debug for OptimisticEngine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OptimisticEngine")
            .field("speculating_keys", &self.speculating_keys())
            .finish_non_exhaustive()
    }
}

impl OptimisticEngine {
    /// Creates an engine writing through `client`.
    #[must_use]
    pub fn new(client: QueryClient) -> Self {
        Self {
            client,
            shared: Arc::new(EngineShared {
                ledger: Mutex::new(SpeculationLedger::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The client this engine writes through.
    #[must_use]
    pub const fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Starts a mutation over `affected`.
    ///
    /// Each entry of `affected` is a key prefix; it covers every cached key
    /// under it, or the prefix itself when nothing is cached there yet. For
    /// every covered key, in order: the in-flight fetch is cancelled, the
    /// entry is snapshotted and then held provisional.
    #[must_use = "dropping the session rolls the mutation back"]
    pub fn begin(&self, affected: &[QueryKey]) -> MutationSession {
        let id = MutationId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mut keys: Vec<QueryKey> = Vec::new();
        {
            let mut ledger = self.shared.ledger.lock();
            for prefix in affected {
                self.client.coordinator().cancel_prefix(prefix);
                let mut covered = self.client.cache().keys_with_prefix(prefix);
                if covered.is_empty() {
                    covered.push(prefix.clone());
                }
                for key in covered {
                    if !keys.contains(&key) {
                        self.capture(&mut ledger, id, &key);
                        keys.push(key);
                    }
                }
            }
        }
        tracing::debug!(mutation = %id, keys = keys.len(), "mutation speculating");
        MutationSession::new(self.clone(), id, keys)
    }

    /// Number of keys currently held by at least one open mutation.
    #[must_use]
    pub fn speculating_keys(&self) -> usize {
        self.shared.ledger.lock().key_count()
    }

    /// Number of open mutations holding `key`.
    #[must_use]
    pub fn depth(&self, key: &QueryKey) -> usize {
        self.shared.ledger.lock().depth(key)
    }

    fn capture(&self, ledger: &mut SpeculationLedger, id: MutationId, key: &QueryKey) {
        let cache = self.client.cache();
        self.client.coordinator().cancel(key);
        ledger.push(key, id, cache.snapshot(key));
        cache.hold(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::key::{DealKeys, PropertyKeys};
    use crate::pipeline::{DealFilters, DealId, Stage};
    use rstest::rstest;

    #[rstest]
    fn begin_expands_prefixes_to_cached_keys() {
        let client = QueryClient::new(QueryCache::new());
        let open = DealKeys::list(&DealFilters::default());
        let active = DealKeys::list(&DealFilters::default().with_stage(Stage::ActiveReview));
        client.cache().set(&open, 1_u8);
        client.cache().set(&active, 2_u8);
        client.cache().set(&PropertyKeys::detail("P1"), 3_u8);

        let engine = OptimisticEngine::new(client);
        let session = engine.begin(&[DealKeys::lists(), DealKeys::detail(&DealId::new("D1"))]);

        assert_eq!(session.affected_keys().len(), 3);
        assert_eq!(engine.speculating_keys(), 3);
        assert_eq!(engine.depth(&PropertyKeys::detail("P1")), 0);
        session.commit();
        assert_eq!(engine.speculating_keys(), 0);
    }

    #[rstest]
    fn ids_are_unique() {
        let engine = OptimisticEngine::new(QueryClient::new(QueryCache::new()));
        let first = engine.begin(&[]);
        let second = engine.begin(&[]);
        assert_ne!(first.id(), second.id());
    }
}
