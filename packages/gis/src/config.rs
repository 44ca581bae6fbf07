//! Engine limits and TTLs, read from the environment.

use std::time::Duration;

use georise_cache::ttl_from_millis;

pub const DEFAULT_CACHE_TTL_MS: i64 = 5_000;
pub const DEFAULT_OVERLAY_CACHE_TTL_MS: i64 = 300_000;
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 300;
pub const DEFAULT_PAGE_SIZE: i64 = 200;
pub const DEFAULT_NEARBY_LIMIT: i64 = 300;
pub const DEFAULT_OVERLAY_LIMIT: i64 = 500;
pub const DEFAULT_CLUSTER_GRID: f64 = 0.02;

/// Nearby radius bounds in kilometers.
pub const NEARBY_DEFAULT_KM: f64 = 2.0;
pub const NEARBY_MIN_KM: f64 = 0.1;
pub const NEARBY_MAX_KM: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct GisConfig {
    /// TTL of incident listing, cluster, and nearby payloads.
    pub cache_ttl: Option<Duration>,
    /// TTL of overlay payloads.
    pub overlay_cache_ttl: Option<Duration>,
    /// Upper bound of the effective page size.
    pub max_page_size: i64,
    /// Page size used when the caller gives none.
    pub default_page_size: i64,
    /// Row cap of the nearby endpoint.
    pub nearby_limit: i64,
    /// Row cap of the overlay endpoint.
    pub overlay_limit: i64,
    /// Cluster cell size used when the caller gives none, in degrees.
    pub cluster_grid: f64,
}

impl Default for GisConfig {
    fn default() -> Self {
        Self {
            cache_ttl: ttl_from_millis(DEFAULT_CACHE_TTL_MS),
            overlay_cache_ttl: ttl_from_millis(DEFAULT_OVERLAY_CACHE_TTL_MS),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            nearby_limit: DEFAULT_NEARBY_LIMIT,
            overlay_limit: DEFAULT_OVERLAY_LIMIT,
            cluster_grid: DEFAULT_CLUSTER_GRID,
        }
    }
}

impl GisConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable lookup. Unparseable
    /// values fall back to their defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let int = |name: &str, default: i64| {
            lookup(name)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(default)
        };
        let positive = |name: &str, default: i64| {
            let value = int(name, default);
            if value > 0 { value } else { default }
        };

        let max_page_size = positive("GIS_MAX_PAGE_SIZE", DEFAULT_MAX_PAGE_SIZE);
        let default_page_size =
            positive("GIS_DEFAULT_PAGE_SIZE", DEFAULT_PAGE_SIZE).min(max_page_size);

        Self {
            cache_ttl: ttl_from_millis(int("GIS_CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS)),
            overlay_cache_ttl: ttl_from_millis(int(
                "GIS_OVERLAY_CACHE_TTL_MS",
                DEFAULT_OVERLAY_CACHE_TTL_MS,
            )),
            max_page_size,
            default_page_size,
            nearby_limit: positive("GIS_NEARBY_LIMIT", DEFAULT_NEARBY_LIMIT),
            overlay_limit: positive("GIS_OVERLAY_LIMIT", DEFAULT_OVERLAY_LIMIT),
            cluster_grid: lookup("GIS_CLUSTER_GRID")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(DEFAULT_CLUSTER_GRID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(GisConfig::from_lookup(|_| None), GisConfig::default());
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let config = GisConfig::from_lookup(|name| {
            match name {
                "GIS_CACHE_TTL_MS" => Some("0"),
                "GIS_MAX_PAGE_SIZE" => Some("100"),
                "GIS_DEFAULT_PAGE_SIZE" => Some("250"),
                "GIS_NEARBY_LIMIT" => Some("-3"),
                "GIS_CLUSTER_GRID" => Some("abc"),
                _ => None,
            }
            .map(str::to_string)
        });

        assert_eq!(config.cache_ttl, None);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.nearby_limit, DEFAULT_NEARBY_LIMIT);
        assert!((config.cluster_grid - DEFAULT_CLUSTER_GRID).abs() < f64::EPSILON);
        assert_eq!(
            config.overlay_cache_ttl,
            Some(Duration::from_millis(300_000))
        );
    }
}
