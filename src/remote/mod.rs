//! The remote deal store, seen from the cache layer.
//!
//! Transport, retries and authentication live behind [`DealsApi`]; this
//! crate only needs the three calls below. Responses come back in the
//! backend's raw shape ([`RawDeal`]) and are normalized at the query
//! boundary, so legacy stage names never reach the cache.

mod in_memory;

pub use in_memory::InMemoryDealsApi;

use futures::future::BoxFuture;

use crate::error::TransportError;
use crate::pipeline::{DealFilters, DealId, RawDeal, Stage};

/// Remote operations on deals.
///
/// Every method returns a `'static` future so callers can hand it to a
/// spawned fetch task.
pub trait DealsApi: Send + Sync {
    /// Lists deals matching `filters`.
    fn list_deals(&self, filters: &DealFilters) -> BoxFuture<'static, Result<Vec<RawDeal>, TransportError>>;

    /// Fetches one deal. A missing deal is a 404 [`TransportError`].
    fn get_deal(&self, id: &DealId) -> BoxFuture<'static, Result<RawDeal, TransportError>>;

    /// Moves a deal to `stage` and returns the stored record.
    ///
    /// A 409 response means the server rejected the change, typically a
    /// concurrent edit.
    fn update_stage(&self, id: &DealId, stage: Stage) -> BoxFuture<'static, Result<RawDeal, TransportError>>;
}
