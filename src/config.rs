//! Per-resource caching policy.
//!
//! Each resource gets a [`QueryOptions`]: how long data stays fresh, whether
//! it is refreshed in the background, and how long an unobserved entry
//! survives. Deals change often and are edited by several people, so they go
//! stale quickly; properties and comps rarely change; interest rates are
//! refreshed on a timer.

use std::time::Duration;

use crate::key::Resource;
use crate::query::QueryOptions;

// =============================================================================
// Defaults
// =============================================================================

const DEFAULT_GC: Duration = Duration::from_secs(5 * 60);
const DEALS_STALE: Duration = Duration::from_secs(30);
const PROPERTIES_STALE: Duration = Duration::from_secs(5 * 60);
const SALES_COMPS_STALE: Duration = Duration::from_secs(10 * 60);
const RATES_STALE: Duration = Duration::from_secs(60);
const RATES_REFETCH: Duration = Duration::from_secs(5 * 60);

/// Caching policy for every resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Deal lists, details, pipeline and stats.
    pub deals: QueryOptions,
    /// Property records.
    pub properties: QueryOptions,
    /// Sales comparables.
    pub sales_comps: QueryOptions,
    /// Interest rate series.
    pub interest_rates: QueryOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let base = QueryOptions::default().with_gc_time(DEFAULT_GC);
        Self {
            deals: base.with_stale_time(DEALS_STALE),
            properties: base.with_stale_time(PROPERTIES_STALE),
            sales_comps: base.with_stale_time(SALES_COMPS_STALE),
            interest_rates: base
                .with_stale_time(RATES_STALE)
                .with_refetch_interval(RATES_REFETCH),
        }
    }
}

impl CacheConfig {
    /// The options for `resource`.
    #[must_use]
    pub const fn options(&self, resource: Resource) -> QueryOptions {
        match resource {
            Resource::Deals => self.deals,
            Resource::Properties => self.properties,
            Resource::SalesComps => self.sales_comps,
            Resource::InterestRates => self.interest_rates,
        }
    }

    const fn options_mut(&mut self, resource: Resource) -> &mut QueryOptions {
        match resource {
            Resource::Deals => &mut self.deals,
            Resource::Properties => &mut self.properties,
            Resource::SalesComps => &mut self.sales_comps,
            Resource::InterestRates => &mut self.interest_rates,
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `DEALBOARD_<RESOURCE>_STALE_SECS`: stale time in seconds
    /// - `DEALBOARD_<RESOURCE>_REFETCH_SECS`: background refresh period in
    ///   seconds, `0` disables it
    /// - `DEALBOARD_GC_SECS`: GC time for every resource
    ///
    /// `<RESOURCE>` is one of `DEALS`, `PROPERTIES`, `SALES_COMPS`,
    /// `INTEREST_RATES`. Missing or unparsable values keep their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |name: &str| -> Option<u64> {
            let raw = lookup(name)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "ignoring unparsable setting");
                    None
                }
            }
        };

        let mut config = Self::default();
        let gc_time = seconds("DEALBOARD_GC_SECS").map(Duration::from_secs);
        for resource in Resource::ALL {
            let prefix = format!("DEALBOARD_{}", resource.name().to_uppercase());
            let options = config.options_mut(resource);
            if let Some(stale) = seconds(&format!("{prefix}_STALE_SECS")) {
                options.stale_time = Duration::from_secs(stale);
            }
            if let Some(refetch) = seconds(&format!("{prefix}_REFETCH_SECS")) {
                options.refetch_interval = (refetch > 0).then(|| Duration::from_secs(refetch));
            }
            if let Some(gc_time) = gc_time {
                options.gc_time = gc_time;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[rstest]
    fn defaults_match_resource_volatility() {
        let config = CacheConfig::default();
        assert_eq!(config.deals.stale_time, Duration::from_secs(30));
        assert_eq!(config.properties.stale_time, Duration::from_secs(300));
        assert_eq!(config.sales_comps.stale_time, Duration::from_secs(600));
        assert_eq!(config.interest_rates.refetch_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.deals.refetch_interval, None);
        assert_eq!(config.options(Resource::Deals).gc_time, Duration::from_secs(300));
    }

    #[rstest]
    #[case::stale("DEALBOARD_DEALS_STALE_SECS", "5")]
    #[case::padded("DEALBOARD_DEALS_STALE_SECS", " 5 ")]
    fn stale_override(#[case] name: &str, #[case] value: &str) {
        let config = CacheConfig::from_lookup(lookup(&[(name, value)]));
        assert_eq!(config.deals.stale_time, Duration::from_secs(5));
        assert_eq!(config.properties, CacheConfig::default().properties);
    }

    #[rstest]
    fn zero_refetch_disables_background_refresh() {
        let config = CacheConfig::from_lookup(lookup(&[("DEALBOARD_INTEREST_RATES_REFETCH_SECS", "0")]));
        assert_eq!(config.interest_rates.refetch_interval, None);
    }

    #[rstest]
    fn gc_applies_to_every_resource() {
        let config = CacheConfig::from_lookup(lookup(&[("DEALBOARD_GC_SECS", "42")]));
        for resource in Resource::ALL {
            assert_eq!(config.options(resource).gc_time, Duration::from_secs(42));
        }
    }

    #[rstest]
    fn garbage_values_keep_defaults() {
        let config = CacheConfig::from_lookup(lookup(&[
            ("DEALBOARD_SALES_COMPS_STALE_SECS", "soon"),
            ("DEALBOARD_GC_SECS", "-1"),
        ]));
        assert_eq!(config, CacheConfig::default());
    }
}
