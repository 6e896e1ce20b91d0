//! # Tiered caching engine
//!
//! This module contains the cache engine: the tier implementations, the
//! freshness predicate, the single-flight registry, and the [`Cache`] that
//! composes them.
//!
//! ## Tiers
//!
//! A cache is built from up to three storage tiers, traversed in order:
//!
//! - An in-memory tier holding decoded payloads, cost-bounded and
//!   LRU-evicted.
//! - A file-system tier persisting encoded payloads as one file per entry,
//!   byte-bounded and LRU-evicted by access time. Disabled when no cache
//!   directory is configured.
//! - An optional remote tier backed by an [`ObjectStore`], shared across the
//!   devices of one user account. Remote writes are best-effort and happen
//!   on background tasks.
//!
//! A lookup on the synchronous path consults memory, then disk; a disk hit
//! is promoted into memory. The asynchronous path additionally consults the
//! remote tier and finally a user-supplied fetch callback, persisting
//! whatever those produce into the warmer tiers. Concurrent asynchronous
//! misses for the same key coalesce onto a single fetch through an
//! in-flight registry, and every caller observes that fetch's result.
//!
//! ## Errors
//!
//! The synchronous surface never fails: defects are handed to the
//! [`Reporter`] hook and degrade into misses (reads) or skipped writes. The
//! asynchronous read path is the only surface that propagates errors, and
//! only those of the fetch itself; see [`CacheError`] for the taxonomy.

use std::time::{Duration, SystemTime};

mod cache;
mod cache_error;
mod cache_key;
mod codec;
mod fs;
mod inflight;
mod memory;
mod remote;

pub use cache::{Cache, CacheBuilder};
pub use cache_error::{CacheContents, CacheError, Reporter};
pub use cache_key::CacheKey;
pub use codec::{BytesCodec, Codec, JsonCodec};
pub use remote::{ObjectStore, RemoteConfig, RemoteRecord};

pub(crate) use cache_key::safe_file_stem;

/// Constraints an entry must satisfy to count as a hit.
///
/// Both constraints are applied to the entry's original insertion time:
/// `max_age` bounds how long ago that was, `newer_than` puts a floor on it.
/// The default is unconstrained. A zero `max_age` rejects everything, as
/// does a `newer_than` in the future.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Freshness {
    pub max_age: Option<Duration>,
    pub newer_than: Option<SystemTime>,
}

impl Freshness {
    pub fn max_age(max_age: Duration) -> Self {
        Freshness {
            max_age: Some(max_age),
            newer_than: None,
        }
    }

    pub fn newer_than(instant: SystemTime) -> Self {
        Freshness {
            max_age: None,
            newer_than: Some(instant),
        }
    }

    /// Whether an entry inserted at `cached_at` satisfies the constraints.
    pub fn passes(&self, cached_at: SystemTime) -> bool {
        if let Some(newer_than) = self.newer_than {
            if cached_at < newer_than {
                return false;
            }
        }
        if let Some(max_age) = self.max_age {
            if max_age.is_zero() {
                return false;
            }
            // Clock skew can put cached_at in the future; use the absolute
            // distance.
            let age = SystemTime::now()
                .duration_since(cached_at)
                .unwrap_or_else(|e| e.duration());
            if age > max_age {
                return false;
            }
        }
        true
    }

    pub(crate) fn is_unconstrained(&self) -> bool {
        self.max_age.is_none() && self.newer_than.is_none()
    }
}
