//! # dealboard
//!
//! Cache consistency and optimistic mutations for a real-estate deal
//! pipeline dashboard.
//!
//! ## Overview
//!
//! Many views show the same deals at once: filtered lists, the
//! pipeline-by-stage grouping, headline stats, the kanban board. This crate
//! keeps them consistent with a remote, multi-writer store while the user
//! drags and edits:
//!
//! - **Key space** ([`key`]): structural, hierarchical cache keys
//! - **Query cache** ([`cache`]): entries with staleness, invalidation,
//!   snapshots and change events
//! - **Fetch coordinator** ([`fetch`]): one request per key, late results
//!   voided, background refresh
//! - **Query client** ([`query`]): stale-while-revalidate reads and observers
//! - **Optimistic mutations** ([`mutation`]): speculate, then commit or roll
//!   back exactly
//! - **Pipeline** ([`pipeline`]): canonical stages, the transition validator
//!   and derived views
//! - **Board** ([`board`]): drag gestures turned into validated moves
//!
//! ## Feature Flags
//!
//! - `serde`: `Serialize`/`Deserialize` for domain types, accepting legacy
//!   stage names on input
//! - `fxhash`: `FxHashMap` for the cache's internal maps
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dealboard::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let api = InMemoryDealsApi::with_deals([RawDeal {
//!     id: "D1".into(),
//!     name: "Harbor Point".into(),
//!     value: Some(5_000_000),
//!     stage: "loi_submitted".into(),
//!     property_type: None,
//!     market: None,
//! }]);
//! let client = QueryClient::new(QueryCache::new());
//! let queries = DealQueries::new(client.clone(), Arc::new(api), &CacheConfig::default());
//!
//! let pipeline = queries.pipeline().await.unwrap();
//! assert_eq!(pipeline[Stage::UnderContract].count, 1);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use dealboard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::board::{BoardState, DragController, DragDecision, DragOutcome, DropTarget};
    pub use crate::cache::{CacheEntry, CacheEvent, CacheEventKind, QueryCache, QueryStatus};
    pub use crate::config::CacheConfig;
    pub use crate::deals::{DealCommands, DealQueries, StageChange};
    pub use crate::error::{
        MutationConflictError, MutationError, QueryError, StageTransitionError, TransportError,
        ValidationError,
    };
    pub use crate::fetch::{FetchCoordinator, Loader};
    pub use crate::key::{DealKeys, PropertyKeys, QueryKey, RateKeys, Resource, SalesCompKeys, key_for};
    pub use crate::mutation::{Mutation, MutationSession, MutationState, OptimisticEngine, SpeculativeBatch};
    pub use crate::notify::{ChannelNotifier, Notification, Notifier, RecordingNotifier};
    pub use crate::pipeline::{
        Deal, DealFilters, DealId, DealList, DealStats, PipelineView, RawDeal, Stage,
        StageTransitionValidator,
    };
    pub use crate::query::{QueryClient, QueryObserver, QueryOptions, QueryResult};
    pub use crate::remote::{DealsApi, InMemoryDealsApi};
}

pub mod board;
pub mod cache;
pub mod config;
pub mod deals;
pub mod error;
pub mod fetch;
pub mod key;
pub mod mutation;
pub mod notify;
pub mod pipeline;
pub mod query;
pub mod remote;
pub mod telemetry;
