//! Key space: deterministic, hierarchical identifiers for cached results.
//!
//! A [`QueryKey`] is an ordered sequence of [`KeySegment`]s. Keys compare
//! structurally, so two filter objects that are deep-equal always produce the
//! same key regardless of where they were built. Maps inside a key are stored
//! as `BTreeMap`s, which makes their ordering (and therefore hashing)
//! independent of insertion order.
//!
//! Keys form a prefix hierarchy: `["deals"]` is a prefix of
//! `["deals", "list", {...}]`, and invalidating the former addresses the
//! whole family.
//!
//! Consumers obtain keys only from the factories in this module
//! ([`DealKeys`], [`PropertyKeys`], [`SalesCompKeys`], [`RateKeys`]), never by
//! assembling segments by hand at the call site.
//!
//! # Examples
//!
//! ```rust
//! use dealboard::key::DealKeys;
//! use dealboard::pipeline::{DealFilters, Stage};
//!
//! let first = DealFilters::default().with_stage(Stage::ActiveReview);
//! let second = DealFilters::default().with_stage(Stage::ActiveReview);
//!
//! assert_eq!(DealKeys::list(&first), DealKeys::list(&second));
//! assert!(DealKeys::list(&first).starts_with(&DealKeys::lists()));
//! assert!(DealKeys::list(&first).starts_with(&DealKeys::all()));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;

use crate::pipeline::{DealFilters, DealId, Stage};

// =============================================================================
// Key Segment
// =============================================================================

/// One element of a [`QueryKey`].
///
/// Floating-point values are intentionally absent: every segment must have
/// total equality so keys can be hashed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeySegment {
    /// Absent value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Text.
    Str(String),
    /// Ordered list of segments.
    List(Vec<KeySegment>),
    /// String-keyed map, ordered by key.
    Map(BTreeMap<String, KeySegment>),
}

impl KeySegment {
    /// Builds a map segment from `(name, value)` pairs.
    ///
    /// Later duplicates overwrite earlier ones.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(formatter, "null"),
            Self::Bool(value) => write!(formatter, "{value}"),
            Self::Int(value) => write!(formatter, "{value}"),
            Self::Str(value) => write!(formatter, "{value:?}"),
            Self::List(items) => {
                write!(formatter, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(formatter, ",")?;
                    }
                    write!(formatter, "{item}")?;
                }
                write!(formatter, "]")
            }
            Self::Map(entries) => {
                write!(formatter, "{{")?;
                for (index, (name, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        write!(formatter, ",")?;
                    }
                    write!(formatter, "{name:?}:{value}")?;
                }
                write!(formatter, "}}")
            }
        }
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for KeySegment {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> From<Vec<T>> for KeySegment {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Query Key
// =============================================================================

/// Identifies one cacheable result set.
///
/// Keys are immutable: [`QueryKey::child`] returns a new key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryKey {
    segments: SmallVec<[KeySegment; 4]>,
}

impl QueryKey {
    /// The root key of a resource family, e.g. `["deals"]`.
    #[must_use]
    pub fn root(resource: impl Into<KeySegment>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(resource.into());
        Self { segments }
    }

    /// Returns a new key with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<KeySegment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// The key's segments in order.
    #[must_use]
    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always `false`: a key has at least its resource segment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns `true` if `prefix` is an initial subsequence of this key.
    ///
    /// Every key is a prefix of itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// The immediate parent key, or `None` for a root key.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.segments.len() > 1).then(|| Self {
            segments: self.segments[..self.segments.len() - 1].iter().cloned().collect(),
        })
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[")?;
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                write!(formatter, ",")?;
            }
            write!(formatter, "{segment}")?;
        }
        write!(formatter, "]")
    }
}

/// Builds a key from a resource name and trailing segments.
///
/// ```rust
/// use dealboard::key::{KeySegment, Resource, key_for};
///
/// let key = key_for(Resource::Deals, ["detail".into(), KeySegment::from("d-1")]);
/// assert_eq!(key.to_string(), r#"["deals","detail","d-1"]"#);
/// ```
pub fn key_for<I>(resource: Resource, segments: I) -> QueryKey
where
    I: IntoIterator<Item = KeySegment>,
{
    segments
        .into_iter()
        .fold(resource.root(), |key, segment| key.child(segment))
}

// =============================================================================
// Resources
// =============================================================================

/// The remote resource families the dashboard caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Deals in the acquisition pipeline.
    Deals,
    /// Properties attached to deals.
    Properties,
    /// Comparable sales.
    SalesComps,
    /// Market interest rates.
    InterestRates,
}

impl Resource {
    /// All resources, in a fixed order.
    pub const ALL: [Self; 4] = [
        Self::Deals,
        Self::Properties,
        Self::SalesComps,
        Self::InterestRates,
    ];

    /// The root segment name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deals => "deals",
            Self::Properties => "properties",
            Self::SalesComps => "sales_comps",
            Self::InterestRates => "interest_rates",
        }
    }

    /// The resource's root key.
    #[must_use]
    pub fn root(self) -> QueryKey {
        QueryKey::root(self.name())
    }

    /// The resource a key belongs to, if any.
    #[must_use]
    pub fn of(key: &QueryKey) -> Option<Self> {
        let KeySegment::Str(first) = key.segments().first()? else {
            return None;
        };
        Self::ALL
            .into_iter()
            .find(|resource| resource.name() == first)
    }
}

impl From<Resource> for KeySegment {
    fn from(resource: Resource) -> Self {
        Self::Str(resource.name().to_owned())
    }
}

// =============================================================================
// Key Factories
// =============================================================================

/// Keys for the deal resource.
///
/// ```text
/// ["deals"]
/// ├── ["deals","list"]
/// │   └── ["deals","list",{filters}]
/// ├── ["deals","detail"]
/// │   └── ["deals","detail",id]
/// ├── ["deals","pipeline"]
/// └── ["deals","stats"]
/// ```
pub struct DealKeys;

impl DealKeys {
    /// `["deals"]`
    #[must_use]
    pub fn all() -> QueryKey {
        Resource::Deals.root()
    }

    /// `["deals","list"]`
    #[must_use]
    pub fn lists() -> QueryKey {
        Self::all().child("list")
    }

    /// `["deals","list",{filters}]`
    #[must_use]
    pub fn list(filters: &DealFilters) -> QueryKey {
        Self::lists().child(KeySegment::from(filters))
    }

    /// The list of deals in one stage.
    ///
    /// Same key as `list` with only the stage filter set, so a board column
    /// and a filtered table share one cache entry.
    #[must_use]
    pub fn by_stage(stage: Stage) -> QueryKey {
        Self::list(&DealFilters::default().with_stage(stage))
    }

    /// `["deals","detail"]`
    #[must_use]
    pub fn details() -> QueryKey {
        Self::all().child("detail")
    }

    /// `["deals","detail",id]`
    #[must_use]
    pub fn detail(id: &DealId) -> QueryKey {
        Self::details().child(id.as_str())
    }

    /// `["deals","pipeline"]`
    #[must_use]
    pub fn pipeline() -> QueryKey {
        Self::all().child("pipeline")
    }

    /// `["deals","stats"]`
    #[must_use]
    pub fn stats() -> QueryKey {
        Self::all().child("stats")
    }
}

/// Keys for the property resource.
pub struct PropertyKeys;

impl PropertyKeys {
    /// `["properties"]`
    #[must_use]
    pub fn all() -> QueryKey {
        Resource::Properties.root()
    }

    /// `["properties","list",{filters}]`
    #[must_use]
    pub fn list(filters: KeySegment) -> QueryKey {
        Self::all().child("list").child(filters)
    }

    /// `["properties","detail",id]`
    #[must_use]
    pub fn detail(id: &str) -> QueryKey {
        Self::all().child("detail").child(id)
    }
}

/// Keys for the sales-comp resource.
pub struct SalesCompKeys;

impl SalesCompKeys {
    /// `["sales_comps"]`
    #[must_use]
    pub fn all() -> QueryKey {
        Resource::SalesComps.root()
    }

    /// `["sales_comps","list",{filters}]`
    #[must_use]
    pub fn list(filters: KeySegment) -> QueryKey {
        Self::all().child("list").child(filters)
    }
}

/// Keys for the interest-rate resource.
pub struct RateKeys;

impl RateKeys {
    /// `["interest_rates"]`
    #[must_use]
    pub fn all() -> QueryKey {
        Resource::InterestRates.root()
    }

    /// `["interest_rates","current"]`
    #[must_use]
    pub fn current() -> QueryKey {
        Self::all().child("current")
    }

    /// `["interest_rates","history",days]`
    #[must_use]
    pub fn history(days: u32) -> QueryKey {
        Self::all().child("history").child(days)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn map_segment_ignores_insertion_order() {
        let first = KeySegment::map([("a", KeySegment::Int(1)), ("b", KeySegment::Int(2))]);
        let second = KeySegment::map([("b", KeySegment::Int(2)), ("a", KeySegment::Int(1))]);
        assert_eq!(first, second);
    }

    #[rstest]
    fn key_display_is_json_like() {
        let key = DealKeys::detail(&DealId::new("d-1"));
        assert_eq!(key.to_string(), r#"["deals","detail","d-1"]"#);
    }

    #[rstest]
    #[case(DealKeys::lists(), true)]
    #[case(DealKeys::details(), false)]
    #[case(DealKeys::all(), true)]
    #[case(PropertyKeys::all(), false)]
    fn list_key_prefixes(#[case] prefix: QueryKey, #[case] expected: bool) {
        let filters = DealFilters::default().with_stage(Stage::Closed);
        assert_eq!(DealKeys::list(&filters).starts_with(&prefix), expected);
    }

    #[rstest]
    fn by_stage_is_a_stage_filtered_list() {
        let key = DealKeys::by_stage(Stage::UnderContract);
        assert_eq!(key, DealKeys::list(&DealFilters::default().with_stage(Stage::UnderContract)));
        assert!(key.starts_with(&DealKeys::lists()));
        assert_ne!(key, DealKeys::by_stage(Stage::Closed));
    }

    #[rstest]
    fn parent_walks_up_the_hierarchy() {
        let key = DealKeys::detail(&DealId::new("d-9"));
        assert_eq!(key.parent(), Some(DealKeys::details()));
        assert_eq!(DealKeys::all().parent(), None);
    }

    #[rstest]
    fn resource_of_key() {
        assert_eq!(Resource::of(&DealKeys::stats()), Some(Resource::Deals));
        assert_eq!(Resource::of(&RateKeys::history(30)), Some(Resource::InterestRates));
        assert_eq!(Resource::of(&QueryKey::root(7_i64)), None);
    }

    #[rstest]
    fn key_for_appends_segments() {
        let key = key_for(Resource::Properties, ["detail".into(), "p-1".into()]);
        assert_eq!(key, PropertyKeys::detail("p-1"));
    }
}
