//! In-memory query cache.
//!
//! The cache maps [`QueryKey`](crate::key::QueryKey)s to entries holding the
//! last known data, when it was fetched, and the entry's lifecycle status.
//! It is an explicit object injected wherever it is needed; any number of
//! independent caches can coexist (one per test, for instance).
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──fetch──▶ Loading ──ok──▶ Success ──refetch──▶ Loading ──ok──▶ Success
//!                    │                                    │
//!                    └──err──▶ Error                      └──err──▶ Error (data kept)
//! ```
//!
//! A refetch never clears `data`; views keep rendering the last known good
//! value while the refresh is in flight (stale-while-revalidate).
//!
//! # Change Notification
//!
//! Every state change is broadcast as a [`CacheEvent`]. Views hold a
//! [`CacheSubscription`] scoped to a key prefix and schedule their own
//! repaint when an event arrives.

mod entry;
mod events;
mod store;

pub use entry::{CacheEntry, QueryStatus};
pub use events::{CacheEvent, CacheEventKind, CacheSubscription};
pub use store::QueryCache;

pub(crate) use entry::{EntrySnapshot, ErasedValue};
pub(crate) use store::SpeculativeWrite;

#[cfg(feature = "fxhash")]
pub(crate) type KeyMap<V> = rustc_hash::FxHashMap<crate::key::QueryKey, V>;

#[cfg(not(feature = "fxhash"))]
pub(crate) type KeyMap<V> = std::collections::HashMap<crate::key::QueryKey, V>;
