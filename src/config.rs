use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration of the local cache tiers.
///
/// Remote-tier wiring lives on the builder, since it carries a live
/// [`ObjectStore`](crate::ObjectStore) handle rather than plain settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory to use for storing cache entries. Will be created if it
    /// does not exist.
    ///
    /// Leaving this as `None` disables the disk tier.
    pub cache_dir: Option<PathBuf>,

    /// Cost ceiling (in bytes) of the in-memory tier.
    pub in_memory_limit: u64,

    /// Size ceiling (in bytes) of the on-disk tier.
    pub on_disk_limit: u64,

    /// Maximum age applied to lookups that do not constrain freshness
    /// themselves.
    #[serde(with = "humantime_serde")]
    pub default_max_age: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_dir: None,
            in_memory_limit: 100 * 1024 * 1024,
            on_disk_limit: 1024 * 1024 * 1024,
            default_max_age: None,
        }
    }
}
