//! In-memory [`DealsApi`] for tests, benchmarks and the demo binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::pipeline::{DealFilters, DealId, RawDeal, Stage};

use super::DealsApi;

#[derive(Default)]
struct Counters {
    list: AtomicUsize,
    get: AtomicUsize,
    update: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    next_update: Option<TransportError>,
    next_list: Option<TransportError>,
}

/// A deal store held in memory.
///
/// Records are kept in the backend's raw shape, so legacy stage names
/// seeded here come back exactly as a real backend would return them.
/// Updates write canonical stage names.
///
/// # Examples
///
/// ```rust
/// use dealboard::pipeline::{DealFilters, RawDeal};
/// use dealboard::remote::{DealsApi, InMemoryDealsApi};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let api = InMemoryDealsApi::with_deals([RawDeal {
///     id: "D1".into(),
///     name: "Harbor Point".into(),
///     value: Some(5_000_000),
///     stage: "loi_submitted".into(),
///     property_type: None,
///     market: None,
/// }]);
///
/// let deals = api.list_deals(&DealFilters::default()).await.unwrap();
/// assert_eq!(deals[0].stage, "loi_submitted");
/// assert_eq!(api.list_calls(), 1);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryDealsApi {
    deals: Arc<Mutex<Vec<RawDeal>>>,
    counters: Arc<Counters>,
    faults: Arc<Mutex<Faults>>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for InMemoryDealsApi {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("InMemoryDealsApi")
            .field("deals", &self.deals.lock().len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl InMemoryDealsApi {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `deals`.
    #[must_use]
    pub fn with_deals(deals: impl IntoIterator<Item = RawDeal>) -> Self {
        let api = Self::new();
        api.deals.lock().extend(deals);
        api
    }

    /// Delays every response by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Inserts or replaces a record, as another client would.
    pub fn upsert(&self, deal: RawDeal) {
        let mut deals = self.deals.lock();
        match deals.iter_mut().find(|existing| existing.id == deal.id) {
            Some(existing) => *existing = deal,
            None => deals.push(deal),
        }
    }

    /// The stored record for `id`.
    #[must_use]
    pub fn stored(&self, id: &DealId) -> Option<RawDeal> {
        self.deals
            .lock()
            .iter()
            .find(|deal| deal.id == id.as_str())
            .cloned()
    }

    /// Makes the next `update_stage` call fail with `error` without
    /// touching the store.
    pub fn fail_next_update(&self, error: TransportError) {
        self.faults.lock().next_update = Some(error);
    }

    /// Makes the next `list_deals` call fail with `error`.
    pub fn fail_next_list(&self, error: TransportError) {
        self.faults.lock().next_list = Some(error);
    }

    /// Number of `list_deals` calls so far.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.counters.list.load(Ordering::SeqCst)
    }

    /// Number of `get_deal` calls so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.counters.get.load(Ordering::SeqCst)
    }

    /// Number of `update_stage` calls so far.
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.counters.update.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.list_calls() + self.get_calls() + self.update_calls()
    }

    async fn delay(latency: Option<Duration>) {
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Backend-side filtering. Records whose stage cannot be read are returned
/// unfiltered so the client's normalization reports them.
fn backend_matches(filters: &DealFilters, raw: &RawDeal) -> bool {
    raw.clone()
        .normalize()
        .map_or(true, |deal| filters.matches(&deal))
}

impl DealsApi for InMemoryDealsApi {
    fn list_deals(&self, filters: &DealFilters) -> BoxFuture<'static, Result<Vec<RawDeal>, TransportError>> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);
        let deals = Arc::clone(&self.deals);
        let faults = Arc::clone(&self.faults);
        let filters = filters.clone();
        let latency = self.latency;
        async move {
            Self::delay(latency).await;
            if let Some(error) = faults.lock().next_list.take() {
                return Err(error);
            }
            Ok(deals
                .lock()
                .iter()
                .filter(|raw| backend_matches(&filters, raw))
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn get_deal(&self, id: &DealId) -> BoxFuture<'static, Result<RawDeal, TransportError>> {
        self.counters.get.fetch_add(1, Ordering::SeqCst);
        let deals = Arc::clone(&self.deals);
        let id = id.clone();
        let latency = self.latency;
        async move {
            Self::delay(latency).await;
            deals
                .lock()
                .iter()
                .find(|deal| deal.id == id.as_str())
                .cloned()
                .ok_or_else(|| TransportError::status(404, format!("deal {id} not found")))
        }
        .boxed()
    }

    fn update_stage(&self, id: &DealId, stage: Stage) -> BoxFuture<'static, Result<RawDeal, TransportError>> {
        self.counters.update.fetch_add(1, Ordering::SeqCst);
        let deals = Arc::clone(&self.deals);
        let faults = Arc::clone(&self.faults);
        let id = id.clone();
        let latency = self.latency;
        async move {
            Self::delay(latency).await;
            if let Some(error) = faults.lock().next_update.take() {
                return Err(error);
            }
            let mut deals = deals.lock();
            let deal = deals
                .iter_mut()
                .find(|deal| deal.id == id.as_str())
                .ok_or_else(|| TransportError::status(404, format!("deal {id} not found")))?;
            deal.stage = stage.as_str().to_owned();
            Ok(deal.clone())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

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
    fn api() -> InMemoryDealsApi {
        InMemoryDealsApi::with_deals([
            raw("D1", "active_review", 5_000_000),
            raw("D2", "underwriting", 1_000_000),
            raw("D3", "lead", 250_000),
        ])
    }

    #[rstest]
    #[tokio::test]
    async fn list_filters_through_legacy_names(api: InMemoryDealsApi) {
        let filters = DealFilters::default().with_stage(Stage::ActiveReview);
        let deals = api.list_deals(&filters).await.unwrap();
        let ids: Vec<_> = deals.iter().map(|deal| deal.id.as_str()).collect();
        assert_eq!(ids, ["D1", "D2"]);
    }

    #[rstest]
    #[tokio::test]
    async fn update_writes_canonical_stage(api: InMemoryDealsApi) {
        let updated = api.update_stage(&DealId::new("D2"), Stage::UnderContract).await.unwrap();
        assert_eq!(updated.stage, "under_contract");
        assert_eq!(api.stored(&DealId::new("D2")).unwrap().stage, "under_contract");
    }

    #[rstest]
    #[tokio::test]
    async fn injected_failure_is_one_shot(api: InMemoryDealsApi) {
        api.fail_next_update(TransportError::network("connection reset"));
        let id = DealId::new("D1");

        assert!(api.update_stage(&id, Stage::UnderContract).await.is_err());
        assert_eq!(api.stored(&id).unwrap().stage, "active_review");
        assert!(api.update_stage(&id, Stage::UnderContract).await.is_ok());
        assert_eq!(api.update_calls(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn missing_deal_is_404(api: InMemoryDealsApi) {
        let error = api.get_deal(&DealId::new("nope")).await.unwrap_err();
        assert_eq!(error.status, Some(404));
    }
}
