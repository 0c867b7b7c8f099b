//! Per-key stacks of speculative layers.
//!
//! Every in-flight mutation that touches a key pushes one layer holding the
//! state it saw before writing. Layers are popped on commit or rollback.
//!
//! A layer is *superseded* once its snapshot can no longer be restored
//! verbatim without resurrecting stale data:
//!
//! - a mutation above it committed, so the server state now includes that
//!   mutation's change while the snapshot does not;
//! - a mutation below it rolled back out of order, so the snapshot still
//!   contains the rolled-back speculative value.
//!
//! Rolling back a superseded layer (or any layer that is not on top)
//! invalidates the key instead of restoring, handing reconciliation to the
//! next refetch.

use crate::cache::{EntrySnapshot, KeyMap};
use crate::key::QueryKey;

use super::MutationId;

struct Layer {
    mutation: MutationId,
    snapshot: EntrySnapshot,
    superseded: bool,
}

/// What a rollback must do to one key.
pub(super) enum RollbackStep {
    /// Put the snapshot back verbatim.
    Restore(EntrySnapshot),
    /// The snapshot is unusable; mark the key stale.
    Invalidate,
}

/// Outcome of rolling back one layer.
pub(super) struct Popped {
    pub(super) step: RollbackStep,
    /// No mutation holds the key any more.
    pub(super) settled: bool,
}

#[derive(Default)]
pub(super) struct SpeculationLedger {
    stacks: KeyMap<Vec<Layer>>,
}

impl SpeculationLedger {
    pub(super) fn holds(&self, key: &QueryKey, mutation: MutationId) -> bool {
        self.stacks
            .get(key)
            .is_some_and(|stack| stack.iter().any(|layer| layer.mutation == mutation))
    }

    pub(super) fn push(&mut self, key: &QueryKey, mutation: MutationId, snapshot: EntrySnapshot) {
        self.stacks.entry(key.clone()).or_default().push(Layer {
            mutation,
            snapshot,
            superseded: false,
        });
    }

    /// Drops `mutation`'s layer on `key` after a confirmed write. Returns
    /// whether no mutation holds the key any more.
    pub(super) fn commit(&mut self, key: &QueryKey, mutation: MutationId) -> bool {
        self.pop_with(key, mutation, |stack, position, _| {
            for lower in &mut stack[..position] {
                lower.superseded = true;
            }
        })
    }

    /// Drops `mutation`'s layer on `key` after a failed write.
    pub(super) fn rollback(&mut self, key: &QueryKey, mutation: MutationId) -> Popped {
        let mut step = RollbackStep::Invalidate;
        let settled = self.pop_with(key, mutation, |stack, position, layer| {
            if position == stack.len() {
                if !layer.superseded {
                    step = RollbackStep::Restore(layer.snapshot);
                }
            } else {
                stack[position].superseded = true;
            }
        });
        Popped { step, settled }
    }

    /// Removes the layer and hands the remaining stack, the removed index
    /// and the removed layer to `after`. Returns whether the stack emptied.
    fn pop_with<F>(&mut self, key: &QueryKey, mutation: MutationId, after: F) -> bool
    where
        F: FnOnce(&mut [Layer], usize, Layer),
    {
        let Some(stack) = self.stacks.get_mut(key) else {
            return true;
        };
        let Some(position) = stack.iter().position(|layer| layer.mutation == mutation) else {
            return stack.is_empty();
        };
        let layer = stack.remove(position);
        after(stack, position, layer);
        if stack.is_empty() {
            self.stacks.remove(key);
            true
        } else {
            false
        }
    }

    pub(super) fn depth(&self, key: &QueryKey) -> usize {
        self.stacks.get(key).map_or(0, Vec::len)
    }

    pub(super) fn key_count(&self) -> usize {
        self.stacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DealKeys;
    use crate::pipeline::DealId;
    use rstest::rstest;

    fn key() -> QueryKey {
        DealKeys::detail(&DealId::new("D1"))
    }

    fn empty() -> EntrySnapshot {
        EntrySnapshot { state: None }
    }

    #[rstest]
    fn top_layer_restores() {
        let mut ledger = SpeculationLedger::default();
        ledger.push(&key(), MutationId(1), empty());

        let popped = ledger.rollback(&key(), MutationId(1));
        assert!(matches!(popped.step, RollbackStep::Restore(_)));
        assert!(popped.settled);
        assert_eq!(ledger.key_count(), 0);
    }

    #[rstest]
    fn out_of_order_rollback_invalidates_and_poisons_the_layer_above() {
        let mut ledger = SpeculationLedger::default();
        ledger.push(&key(), MutationId(1), empty());
        ledger.push(&key(), MutationId(2), empty());

        let first = ledger.rollback(&key(), MutationId(1));
        assert!(matches!(first.step, RollbackStep::Invalidate));
        assert!(!first.settled);

        let second = ledger.rollback(&key(), MutationId(2));
        assert!(matches!(second.step, RollbackStep::Invalidate));
        assert!(second.settled);
    }

    #[rstest]
    fn commit_above_supersedes_layers_below() {
        let mut ledger = SpeculationLedger::default();
        ledger.push(&key(), MutationId(1), empty());
        ledger.push(&key(), MutationId(2), empty());

        assert!(!ledger.commit(&key(), MutationId(2)));
        assert_eq!(ledger.depth(&key()), 1);

        let popped = ledger.rollback(&key(), MutationId(1));
        assert!(matches!(popped.step, RollbackStep::Invalidate));
        assert!(popped.settled);
    }

    #[rstest]
    fn in_order_rollback_restores_each_layer() {
        let mut ledger = SpeculationLedger::default();
        ledger.push(&key(), MutationId(1), empty());
        ledger.push(&key(), MutationId(2), empty());

        assert!(matches!(
            ledger.rollback(&key(), MutationId(2)).step,
            RollbackStep::Restore(_)
        ));
        assert!(matches!(
            ledger.rollback(&key(), MutationId(1)).step,
            RollbackStep::Restore(_)
        ));
        assert!(!ledger.holds(&key(), MutationId(1)));
    }
}
