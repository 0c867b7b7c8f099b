//! Deal records, list filters and the ingestion boundary.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::key::KeySegment;

use super::Stage;

// =============================================================================
// Deal Identity
// =============================================================================

/// Unique identifier for a deal, as issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DealId(String);

impl DealId {
    /// Wraps a backend identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DealId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<&str> for DealId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Deal
// =============================================================================

/// A normalized deal. Only ever constructed with a canonical [`Stage`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Deal {
    /// Identity.
    pub id: DealId,
    /// Display name.
    pub name: String,
    /// Deal value in whole dollars.
    pub value: i64,
    /// Canonical pipeline stage.
    pub stage: Stage,
    /// Asset class, e.g. `"multifamily"`.
    pub property_type: Option<String>,
    /// Market or metro area.
    pub market: Option<String>,
}

impl Deal {
    /// Creates a deal with no property type or market.
    #[must_use]
    pub fn new(id: impl Into<DealId>, name: impl Into<String>, value: i64, stage: Stage) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
            stage,
            property_type: None,
            market: None,
        }
    }

    /// Returns a copy of the deal moved to `stage`.
    #[must_use]
    pub fn with_stage(&self, stage: Stage) -> Self {
        Self {
            stage,
            ..self.clone()
        }
    }

    /// Sets the property type.
    #[must_use]
    pub fn with_property_type(mut self, property_type: impl Into<String>) -> Self {
        self.property_type = Some(property_type.into());
        self
    }

    /// Sets the market.
    #[must_use]
    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }
}

// =============================================================================
// Ingestion
// =============================================================================

/// A deal exactly as the backend sends it, before normalization.
///
/// The stage is kept as free text so legacy names can be mapped here and
/// nowhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawDeal {
    /// Backend identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Deal value in whole dollars, if known.
    pub value: Option<i64>,
    /// Stage name, canonical or legacy.
    pub stage: String,
    /// Asset class.
    #[cfg_attr(feature = "serde", serde(default))]
    pub property_type: Option<String>,
    /// Market.
    #[cfg_attr(feature = "serde", serde(default))]
    pub market: Option<String>,
}

impl RawDeal {
    /// Normalizes the record into a [`Deal`].
    ///
    /// A missing value is read as zero.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the id is blank, the value is negative,
    /// or the stage is unknown.
    pub fn normalize(self) -> Result<Deal, ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::new("id", "must not be blank"));
        }
        let value = self.value.unwrap_or(0);
        if value < 0 {
            return Err(ValidationError::new(
                "value",
                format!("must not be negative, got {value}"),
            ));
        }
        let stage = Stage::parse(&self.stage)?;
        Ok(Deal {
            id: DealId::new(self.id),
            name: self.name,
            value,
            stage,
            property_type: self.property_type,
            market: self.market,
        })
    }
}

impl From<&Deal> for RawDeal {
    fn from(deal: &Deal) -> Self {
        Self {
            id: deal.id.as_str().to_owned(),
            name: deal.name.clone(),
            value: Some(deal.value),
            stage: deal.stage.as_str().to_owned(),
            property_type: deal.property_type.clone(),
            market: deal.market.clone(),
        }
    }
}

// =============================================================================
// Filters
// =============================================================================

/// Filters for a deal list query.
///
/// Unset fields are omitted from the list's key, so a filter object built
/// field-by-field and one built in a different order produce the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DealFilters {
    /// Restrict to one stage.
    pub stage: Option<Stage>,
    /// Restrict to one asset class.
    pub property_type: Option<String>,
    /// Restrict to one market.
    pub market: Option<String>,
    /// Minimum value, inclusive.
    pub min_value: Option<i64>,
    /// Maximum value, inclusive.
    pub max_value: Option<i64>,
    /// Case-insensitive substring match on the name.
    pub search: Option<String>,
}

impl DealFilters {
    /// Restricts to one stage.
    #[must_use]
    pub const fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Restricts to one asset class.
    #[must_use]
    pub fn with_property_type(mut self, property_type: impl Into<String>) -> Self {
        self.property_type = Some(property_type.into());
        self
    }

    /// Restricts to one market.
    #[must_use]
    pub fn with_market(mut self, market: impl Into<String>) -> Self {
        self.market = Some(market.into());
        self
    }

    /// Restricts to a value range.
    #[must_use]
    pub const fn with_value_range(mut self, min_value: Option<i64>, max_value: Option<i64>) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    /// Adds a name search term.
    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Returns `true` if `deal` belongs in a list with these filters.
    #[must_use]
    pub fn matches(&self, deal: &Deal) -> bool {
        self.stage.is_none_or(|stage| deal.stage == stage)
            && self
                .property_type
                .as_ref()
                .is_none_or(|wanted| deal.property_type.as_ref() == Some(wanted))
            && self
                .market
                .as_ref()
                .is_none_or(|wanted| deal.market.as_ref() == Some(wanted))
            && self.min_value.is_none_or(|min| deal.value >= min)
            && self.max_value.is_none_or(|max| deal.value <= max)
            && self.search.as_ref().is_none_or(|term| {
                deal.name
                    .to_lowercase()
                    .contains(&term.trim().to_lowercase())
            })
    }
}

impl From<&DealFilters> for KeySegment {
    fn from(filters: &DealFilters) -> Self {
        let mut entries: Vec<(&str, Self)> = Vec::new();
        if let Some(stage) = filters.stage {
            entries.push(("stage", stage.as_str().into()));
        }
        if let Some(property_type) = &filters.property_type {
            entries.push(("property_type", property_type.clone().into()));
        }
        if let Some(market) = &filters.market {
            entries.push(("market", market.clone().into()));
        }
        if let Some(min_value) = filters.min_value {
            entries.push(("min_value", min_value.into()));
        }
        if let Some(max_value) = filters.max_value {
            entries.push(("max_value", max_value.into()));
        }
        if let Some(search) = &filters.search {
            entries.push(("search", search.trim().to_lowercase().into()));
        }
        Self::map(entries)
    }
}

// =============================================================================
// Deal List
// =============================================================================

/// The cached result of a list query.
///
/// Carries its filters so a speculative stage change can decide whether a
/// moved deal still belongs in the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealList {
    /// The filters the list was fetched with.
    pub filters: DealFilters,
    /// Matching deals in server order.
    pub deals: Vec<Deal>,
}

impl DealList {
    /// Creates a list result.
    #[must_use]
    pub const fn new(filters: DealFilters, deals: Vec<Deal>) -> Self {
        Self { filters, deals }
    }

    /// Looks up a deal by id.
    #[must_use]
    pub fn find(&self, id: &DealId) -> Option<&Deal> {
        self.deals.iter().find(|deal| &deal.id == id)
    }

    /// Returns the list with `deal` replacing any record with the same id.
    ///
    /// A deal that no longer matches the filters is dropped; one that now
    /// matches but was absent is appended.
    #[must_use]
    pub fn with_deal(&self, deal: &Deal) -> Self {
        let belongs = self.filters.matches(deal);
        let mut found = false;
        let mut deals: Vec<Deal> = self
            .deals
            .iter()
            .filter_map(|existing| {
                if existing.id == deal.id {
                    found = true;
                    belongs.then(|| deal.clone())
                } else {
                    Some(existing.clone())
                }
            })
            .collect();
        if belongs && !found {
            deals.push(deal.clone());
        }
        Self {
            filters: self.filters.clone(),
            deals,
        }
    }
}
