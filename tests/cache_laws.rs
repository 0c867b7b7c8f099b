//! Property-based tests for keys, derived pipeline views and the
//! transition validator.

use dealboard::key::KeySegment;
use dealboard::pipeline::StageTransitionValidator;
use dealboard::prelude::*;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arbitrary_stage() -> impl Strategy<Value = Stage> {
    prop::sample::select(Stage::ALL.to_vec())
}

fn arbitrary_filters() -> impl Strategy<Value = DealFilters> {
    (
        prop::option::of(arbitrary_stage()),
        prop::option::of(prop::sample::select(vec!["multifamily", "retail", "office"])),
        prop::option::of(prop::sample::select(vec!["Austin", "Denver"])),
        prop::option::of(0_i64..10),
        prop::option::of(0_i64..10),
        prop::option::of("[a-z]{1,4}"),
    )
        .prop_map(
            |(stage, property_type, market, min_value, max_value, search)| DealFilters {
                stage,
                property_type: property_type.map(str::to_owned),
                market: market.map(str::to_owned),
                min_value,
                max_value,
                search,
            },
        )
}

/// Deals with distinct ids.
fn arbitrary_deals() -> impl Strategy<Value = Vec<Deal>> {
    prop::collection::vec((arbitrary_stage(), 0_i64..10_000_000), 1..20).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (stage, value))| {
                Deal::new(DealId::new(format!("D{index}")), format!("Deal {index}"), value, stage)
            })
            .collect()
    })
}

fn moved(deals: &[Deal], index: usize, stage: Stage) -> (Deal, Vec<Deal>) {
    let deal = deals[index].with_stage(stage);
    let mut after = deals.to_vec();
    after[index] = deal.clone();
    (deal, after)
}

// =============================================================================
// Key Laws
// =============================================================================

proptest! {
    #[test]
    fn prop_map_segment_ignores_insertion_order(
        entries in prop::collection::vec(("[a-z]{1,6}", any::<i64>()), 0..10)
    ) {
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<(String, i64)> = entries
            .into_iter()
            .filter(|(name, _)| seen.insert(name.clone()))
            .collect();
        let forward = KeySegment::map(unique.iter().map(|(name, value)| (name.clone(), KeySegment::Int(*value))));
        let backward = KeySegment::map(unique.iter().rev().map(|(name, value)| (name.clone(), KeySegment::Int(*value))));

        prop_assert_eq!(
            QueryKey::root("deals").child(forward),
            QueryKey::root("deals").child(backward)
        );
    }
}

proptest! {
    #[test]
    fn prop_list_keys_equal_iff_filters_equal(
        first in arbitrary_filters(),
        second in arbitrary_filters()
    ) {
        prop_assert_eq!(
            DealKeys::list(&first) == DealKeys::list(&second),
            first == second
        );
    }
}

proptest! {
    #[test]
    fn prop_every_list_key_lives_under_lists_and_all(filters in arbitrary_filters()) {
        let key = DealKeys::list(&filters);
        prop_assert!(key.starts_with(&DealKeys::lists()));
        prop_assert!(key.starts_with(&DealKeys::all()));
        prop_assert!(!key.starts_with(&DealKeys::details()));
        prop_assert_eq!(Resource::of(&key), Some(Resource::Deals));
    }
}

// =============================================================================
// Pipeline Fold Laws
// =============================================================================

proptest! {
    #[test]
    fn prop_pipeline_partitions_every_deal(deals in arbitrary_deals()) {
        let view = PipelineView::from_deals(&deals);

        prop_assert_eq!(view.total_count(), deals.len());
        prop_assert_eq!(view.total_value(), deals.iter().map(|deal| deal.value).sum::<i64>());
        for deal in &deals {
            prop_assert_eq!(view.stage_of(&deal.id), Some(deal.stage));
        }
        for group in view.groups() {
            prop_assert_eq!(group.count, group.deals.len());
            prop_assert!(group.deals.iter().all(|deal| deal.stage == group.stage));
        }
    }
}

proptest! {
    #[test]
    fn prop_speculative_pipeline_matches_refetched_pipeline(
        deals in arbitrary_deals(),
        pick in any::<prop::sample::Index>(),
        stage in arbitrary_stage()
    ) {
        let index = pick.index(deals.len());
        let (deal, after) = moved(&deals, index, stage);

        let speculative = PipelineView::from_deals(&deals).with_deal(&deal);
        let refetched = PipelineView::from_deals(&after);

        for stage in Stage::ALL {
            prop_assert_eq!(speculative[stage].count, refetched[stage].count);
            prop_assert_eq!(speculative[stage].total_value, refetched[stage].total_value);
        }
        for deal in &after {
            prop_assert_eq!(speculative.stage_of(&deal.id), Some(deal.stage));
        }
    }
}

proptest! {
    #[test]
    fn prop_speculative_stats_match_refetched_stats(
        deals in arbitrary_deals(),
        pick in any::<prop::sample::Index>(),
        stage in arbitrary_stage()
    ) {
        let index = pick.index(deals.len());
        let previous = deals[index].stage;
        let (deal, after) = moved(&deals, index, stage);

        prop_assert_eq!(
            DealStats::from_deals(&deals).with_moved_deal(&deal, previous),
            DealStats::from_deals(&after)
        );
    }
}

// =============================================================================
// Transition Laws
// =============================================================================

proptest! {
    #[test]
    fn prop_absorbing_stages_have_no_exits(from in arbitrary_stage(), to in arbitrary_stage()) {
        let validator = StageTransitionValidator::new();
        let allowed = validator.can_transition(from, to);

        prop_assert_eq!(allowed, !from.is_absorbing() && from != to);
        if let Err(error) = validator.validate(from, to) {
            prop_assert_eq!(error.from, from);
            prop_assert_eq!(error.to, to);
        }
    }
}
