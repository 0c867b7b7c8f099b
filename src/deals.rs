//! Deal queries and the stage-change mutation.
//!
//! [`DealQueries`] wires the deal key space to the remote store: lists,
//! details, the pipeline grouping and headline stats. The pipeline and stats
//! are folds over the full deal list and are registered as dependents of
//! the list family, so any list invalidation also marks them stale.
//!
//! [`DealCommands::move_deal`] is the stage-change mutation. It validates
//! locally, then speculatively moves the deal in every cached view at once
//! (detail, every cached list, pipeline, stats) so no view ever shows the
//! move applied to only part of the cache.

use std::sync::Arc;

use crate::cache::QueryCache;
use crate::config::CacheConfig;
use crate::error::{MutationError, QueryError, ValidationError};
use crate::fetch::Loader;
use crate::key::{DealKeys, QueryKey, Resource};
use crate::mutation::{Mutation, MutationSession, OptimisticEngine, SpeculativeBatch};
use crate::notify::{Notification, Notifier};
use crate::pipeline::{
    Deal, DealFilters, DealId, DealList, DealStats, PipelineView, RawDeal, Stage, StageTransitionValidator,
};
use crate::query::{QueryClient, QueryObserver, QueryOptions};
use crate::remote::DealsApi;

// =============================================================================
// Queries
// =============================================================================

/// Read access to deals.
#[derive(Clone)]
pub struct DealQueries {
    client: QueryClient,
    api: Arc<dyn DealsApi>,
    options: QueryOptions,
}

impl std::fmt::Debug for DealQueries {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DealQueries")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn normalize_all(raw: Vec<RawDeal>) -> Result<Vec<Deal>, ValidationError> {
    raw.into_iter().map(RawDeal::normalize).collect()
}

impl DealQueries {
    /// Creates the deal queries and registers the pipeline and stats keys as
    /// dependents of the list family.
    #[must_use]
    pub fn new(client: QueryClient, api: Arc<dyn DealsApi>, config: &CacheConfig) -> Self {
        let cache = client.cache();
        cache.add_dependency(DealKeys::lists(), DealKeys::pipeline());
        cache.add_dependency(DealKeys::lists(), DealKeys::stats());
        Self {
            options: config.options(Resource::Deals),
            client,
            api,
        }
    }

    /// The caching policy applied to deal queries.
    #[must_use]
    pub const fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Loads a filtered list. The whole list fails if any record fails
    /// normalization.
    #[must_use]
    pub fn list_loader(&self, filters: &DealFilters) -> Loader<DealList> {
        let api = Arc::clone(&self.api);
        let filters = filters.clone();
        Loader::new(move || {
            let request = api.list_deals(&filters);
            let filters = filters.clone();
            async move {
                let deals = normalize_all(request.await?)?;
                Ok::<_, QueryError>(DealList::new(filters, deals))
            }
        })
    }

    /// Loads one deal.
    #[must_use]
    pub fn detail_loader(&self, id: &DealId) -> Loader<Deal> {
        let api = Arc::clone(&self.api);
        let id = id.clone();
        Loader::new(move || {
            let request = api.get_deal(&id);
            async move { Ok::<_, QueryError>(request.await?.normalize()?) }
        })
    }

    /// Loads every deal and groups it by stage.
    #[must_use]
    pub fn pipeline_loader(&self) -> Loader<PipelineView> {
        let api = Arc::clone(&self.api);
        Loader::new(move || {
            let request = api.list_deals(&DealFilters::default());
            async move {
                let deals = normalize_all(request.await?)?;
                Ok::<_, QueryError>(PipelineView::from_deals(&deals))
            }
        })
    }

    /// Loads every deal and folds it into stats.
    #[must_use]
    pub fn stats_loader(&self) -> Loader<DealStats> {
        let api = Arc::clone(&self.api);
        Loader::new(move || {
            let request = api.list_deals(&DealFilters::default());
            async move {
                let deals = normalize_all(request.await?)?;
                Ok::<_, QueryError>(DealStats::from_deals(&deals))
            }
        })
    }

    /// Reads a filtered list.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when nothing is cached.
    pub async fn list(&self, filters: &DealFilters) -> Result<Arc<DealList>, QueryError> {
        self.client
            .fetch_query(&DealKeys::list(filters), &self.list_loader(filters), &self.options)
            .await
    }

    /// Reads one deal.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when nothing is cached.
    pub async fn detail(&self, id: &DealId) -> Result<Arc<Deal>, QueryError> {
        self.client
            .fetch_query(&DealKeys::detail(id), &self.detail_loader(id), &self.options)
            .await
    }

    /// Reads the pipeline grouping.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when nothing is cached.
    pub async fn pipeline(&self) -> Result<Arc<PipelineView>, QueryError> {
        self.client
            .fetch_query(&DealKeys::pipeline(), &self.pipeline_loader(), &self.options)
            .await
    }

    /// Reads the headline stats.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when nothing is cached.
    pub async fn stats(&self) -> Result<Arc<DealStats>, QueryError> {
        self.client
            .fetch_query(&DealKeys::stats(), &self.stats_loader(), &self.options)
            .await
    }

    /// Observes a filtered list.
    #[must_use]
    pub fn watch_list(&self, filters: &DealFilters) -> QueryObserver<DealList> {
        self.client
            .watch(&DealKeys::list(filters), self.list_loader(filters), self.options)
    }

    /// Observes one deal.
    #[must_use]
    pub fn watch_detail(&self, id: &DealId) -> QueryObserver<Deal> {
        self.client
            .watch(&DealKeys::detail(id), self.detail_loader(id), self.options)
    }

    /// Observes the pipeline grouping.
    #[must_use]
    pub fn watch_pipeline(&self) -> QueryObserver<PipelineView> {
        self.client
            .watch(&DealKeys::pipeline(), self.pipeline_loader(), self.options)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// A requested stage move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageChange {
    /// The deal being moved.
    pub deal_id: DealId,
    /// The stage the deal is shown in now.
    pub from: Stage,
    /// The target stage.
    pub to: Stage,
}

impl StageChange {
    /// The keys a stage move touches.
    #[must_use]
    pub fn affected_keys(&self) -> Vec<QueryKey> {
        vec![
            DealKeys::detail(&self.deal_id),
            DealKeys::pipeline(),
            DealKeys::lists(),
            DealKeys::stats(),
        ]
    }
}

/// Write access to deals.
#[derive(Clone)]
pub struct DealCommands {
    move_stage: Mutation<StageChange, Deal>,
    notifier: Arc<dyn Notifier>,
    validator: StageTransitionValidator,
}

impl std::fmt::Debug for DealCommands {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DealCommands")
            .field("move_stage", &self.move_stage)
            .finish_non_exhaustive()
    }
}

/// Title of the toast shown when a move is refused locally.
pub const MOVE_REJECTED_TITLE: &str = "Move not allowed";
/// Title of the toast shown when the server refuses a move.
pub const MOVE_FAILED_TITLE: &str = "Could not move deal";

impl DealCommands {
    /// Creates the deal commands.
    #[must_use]
    pub fn new(engine: OptimisticEngine, api: Arc<dyn DealsApi>, notifier: Arc<dyn Notifier>) -> Self {
        let move_stage = Mutation::new(engine, move |change: StageChange| {
            let request = api.update_stage(&change.deal_id, change.to);
            async move { Ok::<_, MutationError>(request.await?.normalize()?) }
        })
        .affects(StageChange::affected_keys)
        .on_mutate(|change, session| speculate_move(change, session))
        .notify_with(Arc::clone(&notifier), MOVE_FAILED_TITLE);
        Self {
            move_stage,
            notifier,
            validator: StageTransitionValidator::new(),
        }
    }

    /// The underlying mutation, for `is_pending` and `state`.
    #[must_use]
    pub const fn move_mutation(&self) -> &Mutation<StageChange, Deal> {
        &self.move_stage
    }

    /// Moves a deal to another stage.
    ///
    /// Illegal moves are rejected before any cache write or network call,
    /// with one notification. Otherwise every cached view shows the move
    /// immediately; a server failure restores them all and notifies.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Transition`] for an illegal move, otherwise
    /// the server's error after rollback.
    pub async fn move_deal(&self, change: StageChange) -> Result<Deal, MutationError> {
        if let Err(error) = self.validator.validate(change.from, change.to) {
            tracing::info!(deal = %change.deal_id, error = %error, "stage move rejected");
            self.notifier.notify(Notification::error(MOVE_REJECTED_TITLE, &error));
            return Err(error.into());
        }
        self.move_stage.mutate(change).await
    }
}

/// The freshest cached copy of a deal, from any view.
fn cached_deal(cache: &QueryCache, id: &DealId) -> Option<Deal> {
    if let Some(deal) = cache.get_data::<Deal>(&DealKeys::detail(id)) {
        return Some((*deal).clone());
    }
    if let Some(deal) = cache
        .get_data::<PipelineView>(&DealKeys::pipeline())
        .and_then(|view| view.find(id).cloned())
    {
        return Some(deal);
    }
    cache
        .keys_with_prefix(&DealKeys::lists())
        .iter()
        .find_map(|key| cache.get_data::<DealList>(key).and_then(|list| list.find(id).cloned()))
}

fn speculate_move(change: &StageChange, session: &mut MutationSession) -> Result<(), MutationError> {
    let Some(current) = cached_deal(session.cache(), &change.deal_id) else {
        tracing::debug!(deal = %change.deal_id, "deal not cached; relying on refetch");
        return Ok(());
    };
    let previous = current.stage;
    let moved = current.with_stage(change.to);

    let lists: Vec<QueryKey> = session
        .affected_keys()
        .iter()
        .filter(|key| key.starts_with(&DealKeys::lists()))
        .cloned()
        .collect();

    // One batch, so no view sees the detail moved but the board not.
    let mut batch = SpeculativeBatch::new();
    let detail = moved.clone();
    batch.update::<Deal, _>(&DealKeys::detail(&change.deal_id), move |deal| deal.map(|_| detail));
    for key in &lists {
        let moved = moved.clone();
        batch.update::<DealList, _>(key, move |list| list.map(|list| list.with_deal(&moved)));
    }
    let board = moved.clone();
    batch.update::<PipelineView, _>(&DealKeys::pipeline(), move |view| view.map(|view| view.with_deal(&board)));
    batch.update::<DealStats, _>(&DealKeys::stats(), move |stats| {
        stats.map(|stats| stats.with_moved_deal(&moved, previous))
    });
    session.apply_batch(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEventKind;
    use crate::error::{StageTransitionError, TransportError};
    use crate::notify::RecordingNotifier;
    use crate::remote::InMemoryDealsApi;
    use rstest::{fixture, rstest};

    struct Harness {
        api: InMemoryDealsApi,
        queries: DealQueries,
        commands: DealCommands,
        notifier: Arc<RecordingNotifier>,
        cache: QueryCache,
    }

    fn raw(id: &str, stage: &str, value: i64) -> RawDeal {
        RawDeal {
            id: id.into(),
            name: format!("Deal {id}"),
            value: Some(value),
            stage: stage.into(),
            property_type: None,
            market: None,
        }
    }

    #[fixture]
    fn harness() -> Harness {
        let api = InMemoryDealsApi::with_deals([
            raw("D1", "active_review", 5_000_000),
            raw("D2", "dead", 750_000),
        ]);
        let cache = QueryCache::new();
        let client = QueryClient::new(cache.clone());
        let notifier = Arc::new(RecordingNotifier::new());
        let remote: Arc<dyn DealsApi> = Arc::new(api.clone());
        Harness {
            queries: DealQueries::new(client.clone(), Arc::clone(&remote), &CacheConfig::default()),
            commands: DealCommands::new(OptimisticEngine::new(client), remote, notifier.clone()),
            api,
            notifier,
            cache,
        }
    }

    fn change(id: &str, from: Stage, to: Stage) -> StageChange {
        StageChange {
            deal_id: DealId::new(id),
            from,
            to,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn list_invalidation_reaches_pipeline_and_stats(harness: Harness) {
        harness.queries.list(&DealFilters::default()).await.unwrap();
        harness.queries.pipeline().await.unwrap();
        harness.queries.stats().await.unwrap();

        harness.cache.invalidate(&DealKeys::list(&DealFilters::default()));

        for key in [DealKeys::pipeline(), DealKeys::stats()] {
            assert!(harness.cache.is_stale(&key, std::time::Duration::from_secs(3600)));
        }
    }

    #[rstest]
    #[tokio::test]
    async fn move_updates_every_view(harness: Harness) {
        let id = DealId::new("D1");
        harness.queries.detail(&id).await.unwrap();
        harness.queries.list(&DealFilters::default()).await.unwrap();
        let active = DealFilters::default().with_stage(Stage::ActiveReview);
        harness.queries.list(&active).await.unwrap();
        harness.queries.pipeline().await.unwrap();
        harness.queries.stats().await.unwrap();

        let moved = harness
            .commands
            .move_deal(change("D1", Stage::ActiveReview, Stage::UnderContract))
            .await
            .unwrap();
        assert_eq!(moved.stage, Stage::UnderContract);

        let detail = harness.cache.get_data::<Deal>(&DealKeys::detail(&id)).unwrap();
        assert_eq!(detail.stage, Stage::UnderContract);
        let pipeline = harness.cache.get_data::<PipelineView>(&DealKeys::pipeline()).unwrap();
        assert!(pipeline[Stage::UnderContract].contains(&id));
        assert!(!pipeline[Stage::ActiveReview].contains(&id));
        let all = harness
            .cache
            .get_data::<DealList>(&DealKeys::list(&DealFilters::default()))
            .unwrap();
        assert_eq!(all.find(&id).unwrap().stage, Stage::UnderContract);
        let filtered = harness.cache.get_data::<DealList>(&DealKeys::list(&active)).unwrap();
        assert!(filtered.find(&id).is_none());
        let stats = harness.cache.get_data::<DealStats>(&DealKeys::stats()).unwrap();
        assert_eq!(stats.count(Stage::UnderContract), 1);
        assert_eq!(stats.count(Stage::ActiveReview), 0);
        assert!(harness.notifier.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn move_speculates_every_view_in_one_step(harness: Harness) {
        let id = DealId::new("D1");
        harness.queries.detail(&id).await.unwrap();
        harness.queries.list(&DealFilters::default()).await.unwrap();
        harness.queries.pipeline().await.unwrap();
        harness.queries.stats().await.unwrap();
        let mut events = harness.cache.subscribe(&DealKeys::all());

        harness
            .commands
            .move_deal(change("D1", Stage::ActiveReview, Stage::UnderContract))
            .await
            .unwrap();

        let speculated: Vec<QueryKey> = events
            .drain()
            .into_iter()
            .filter(|event| event.kind == CacheEventKind::Speculated)
            .map(|event| event.key)
            .collect();
        assert_eq!(
            speculated,
            vec![
                DealKeys::detail(&id),
                DealKeys::list(&DealFilters::default()),
                DealKeys::pipeline(),
                DealKeys::stats(),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn absorbing_origin_is_rejected_without_side_effects(harness: Harness) {
        harness.queries.pipeline().await.unwrap();
        let calls = harness.api.total_calls();
        let before = harness.cache.get_data::<PipelineView>(&DealKeys::pipeline()).unwrap();

        let error = harness
            .commands
            .move_deal(change("D2", Stage::Dead, Stage::InitialReview))
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            MutationError::Transition(StageTransitionError { from: Stage::Dead, .. })
        ));
        assert_eq!(harness.api.total_calls(), calls);
        let after = harness.cache.get_data::<PipelineView>(&DealKeys::pipeline()).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(harness.notifier.len(), 1);
        assert_eq!(harness.notifier.notifications()[0].title, MOVE_REJECTED_TITLE);
    }

    #[rstest]
    #[tokio::test]
    async fn server_failure_restores_every_view(harness: Harness) {
        let id = DealId::new("D1");
        harness.queries.detail(&id).await.unwrap();
        harness.queries.pipeline().await.unwrap();
        harness.api.fail_next_update(TransportError::network("connection reset"));

        let error = harness
            .commands
            .move_deal(change("D1", Stage::ActiveReview, Stage::UnderContract))
            .await
            .unwrap_err();

        assert!(matches!(error, MutationError::Transport(_)));
        let detail = harness.cache.get::<Deal>(&DealKeys::detail(&id)).unwrap().unwrap();
        assert_eq!(detail.data.unwrap().stage, Stage::ActiveReview);
        assert!(!detail.is_provisional);
        let pipeline = harness.cache.get_data::<PipelineView>(&DealKeys::pipeline()).unwrap();
        assert!(pipeline[Stage::ActiveReview].contains(&id));
        assert_eq!(harness.notifier.len(), 1);
        assert_eq!(harness.notifier.notifications()[0].title, MOVE_FAILED_TITLE);
        assert_eq!(harness.commands.move_mutation().state(), crate::mutation::MutationState::RolledBack);
    }
}
