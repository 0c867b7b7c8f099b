//! Derived views over a set of deals.
//!
//! [`PipelineView`] and [`DealStats`] are pure folds over a deal slice. They
//! are never treated as ground truth: refetching the deal list is always
//! enough to rebuild them.

use std::ops::Index;

use super::{Deal, DealId, Stage};

// =============================================================================
// Stage Group
// =============================================================================

/// The deals in one pipeline column, with running totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    /// The column's stage.
    pub stage: Stage,
    /// Deals currently in the stage.
    pub deals: Vec<Deal>,
    /// `deals.len()`.
    pub count: usize,
    /// Sum of `deals[..].value`.
    pub total_value: i64,
}

impl StageGroup {
    /// An empty column.
    #[must_use]
    pub const fn empty(stage: Stage) -> Self {
        Self {
            stage,
            deals: Vec::new(),
            count: 0,
            total_value: 0,
        }
    }

    fn push(&mut self, deal: Deal) {
        self.count += 1;
        self.total_value = self.total_value.saturating_add(deal.value);
        self.deals.push(deal);
    }

    /// Returns `true` if the column holds the deal.
    #[must_use]
    pub fn contains(&self, id: &DealId) -> bool {
        self.deals.iter().any(|deal| &deal.id == id)
    }
}

// =============================================================================
// Pipeline View
// =============================================================================

/// Deals grouped by canonical stage.
///
/// Has exactly one group per entry of [`Stage::ALL`], in column order, so a
/// new stage is a compile-visible change wherever groups are enumerated.
///
/// # Examples
///
/// ```rust
/// use dealboard::pipeline::{Deal, PipelineView, Stage};
///
/// let view = PipelineView::from_deals(&[
///     Deal::new("a", "Alpha", 100, Stage::ActiveReview),
///     Deal::new("b", "Beta", 250, Stage::ActiveReview),
/// ]);
///
/// assert_eq!(view[Stage::ActiveReview].count, 2);
/// assert_eq!(view[Stage::ActiveReview].total_value, 350);
/// assert_eq!(view[Stage::Closed].count, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineView {
    groups: [StageGroup; Stage::COUNT],
}

impl PipelineView {
    /// Groups `deals` by stage, preserving their relative order.
    #[must_use]
    pub fn from_deals(deals: &[Deal]) -> Self {
        let groups = deals
            .iter()
            .fold(Stage::ALL.map(StageGroup::empty), |mut groups, deal| {
                groups[deal.stage.index()].push(deal.clone());
                groups
            });
        Self { groups }
    }

    /// The column for `stage`.
    #[must_use]
    pub const fn group(&self, stage: Stage) -> &StageGroup {
        &self.groups[stage.index()]
    }

    /// All columns in order.
    pub fn groups(&self) -> impl Iterator<Item = &StageGroup> {
        self.groups.iter()
    }

    /// Every deal, column by column.
    pub fn deals(&self) -> impl Iterator<Item = &Deal> {
        self.groups.iter().flat_map(|group| group.deals.iter())
    }

    /// Looks up a deal by id.
    #[must_use]
    pub fn find(&self, id: &DealId) -> Option<&Deal> {
        self.deals().find(|deal| &deal.id == id)
    }

    /// The stage a deal currently sits in.
    #[must_use]
    pub fn stage_of(&self, id: &DealId) -> Option<Stage> {
        self.find(id).map(|deal| deal.stage)
    }

    /// Number of deals across all columns.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.groups.iter().map(|group| group.count).sum()
    }

    /// Value across all columns.
    #[must_use]
    pub fn total_value(&self) -> i64 {
        self.groups
            .iter()
            .fold(0_i64, |total, group| total.saturating_add(group.total_value))
    }

    /// Returns the view with `deal` replacing any record with the same id.
    ///
    /// Rebuilt through the same fold as [`PipelineView::from_deals`], so the
    /// totals can never drift from the deals they summarize.
    #[must_use]
    pub fn with_deal(&self, deal: &Deal) -> Self {
        let mut found = false;
        let mut deals: Vec<Deal> = self
            .deals()
            .map(|existing| {
                if existing.id == deal.id {
                    found = true;
                    deal.clone()
                } else {
                    existing.clone()
                }
            })
            .collect();
        if !found {
            deals.push(deal.clone());
        }
        Self::from_deals(&deals)
    }
}

impl Index<Stage> for PipelineView {
    type Output = StageGroup;

    fn index(&self, stage: Stage) -> &Self::Output {
        self.group(stage)
    }
}

impl Default for PipelineView {
    fn default() -> Self {
        Self::from_deals(&[])
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Headline numbers for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealStats {
    /// Number of deals.
    pub total_deals: usize,
    /// Total value of all deals.
    pub total_value: i64,
    /// Deals in an active stage.
    pub active_deals: usize,
    /// Value of deals in an active stage.
    pub active_value: i64,
    /// Deal count per stage, indexed by [`Stage::index`].
    pub by_stage: [usize; Stage::COUNT],
}

impl DealStats {
    /// Folds a deal slice into stats.
    #[must_use]
    pub fn from_deals(deals: &[Deal]) -> Self {
        deals.iter().fold(Self::default(), |mut stats, deal| {
            stats.total_deals += 1;
            stats.total_value = stats.total_value.saturating_add(deal.value);
            if deal.stage.is_active() {
                stats.active_deals += 1;
                stats.active_value = stats.active_value.saturating_add(deal.value);
            }
            stats.by_stage[deal.stage.index()] += 1;
            stats
        })
    }

    /// Stats for the deals in a pipeline view.
    #[must_use]
    pub fn from_pipeline(view: &PipelineView) -> Self {
        let deals: Vec<Deal> = view.deals().cloned().collect();
        Self::from_deals(&deals)
    }

    /// Deal count in `stage`.
    #[must_use]
    pub const fn count(&self, stage: Stage) -> usize {
        self.by_stage[stage.index()]
    }

    /// Returns the stats after `deal` moves from `from` to its current stage.
    ///
    /// The deal must already be counted under `from`.
    #[must_use]
    pub fn with_moved_deal(&self, deal: &Deal, from: Stage) -> Self {
        let mut next = self.clone();
        next.by_stage[from.index()] = next.by_stage[from.index()].saturating_sub(1);
        next.by_stage[deal.stage.index()] += 1;
        if from.is_active() {
            next.active_deals = next.active_deals.saturating_sub(1);
            next.active_value = next.active_value.saturating_sub(deal.value);
        }
        if deal.stage.is_active() {
            next.active_deals += 1;
            next.active_value = next.active_value.saturating_add(deal.value);
        }
        next
    }
}
