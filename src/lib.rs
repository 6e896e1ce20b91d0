//! # tiercache
//!
//! A typed, multi-tier content cache. Applications hand the cache a key
//! with a stable printable form and get back a previously stored payload,
//! or — on the async path — a payload produced by a fetch callback that the
//! cache transparently persists.
//!
//! Three tiers compose in a strict hierarchy:
//!
//! - a hot in-memory tier, cost-bounded and LRU-evicted;
//! - a warm file-system tier, byte-bounded and LRU-evicted by access time;
//! - an optional cold remote tier shared across the devices of one user
//!   account, reached through an [`ObjectStore`] implementation.
//!
//! Concurrent async misses for the same key coalesce onto a single fetch,
//! and all callers observe its result. Freshness constraints
//! ([`Freshness`]) apply uniformly across tiers. The synchronous surface
//! never fails; defects are handed to an error-reporting hook and degrade
//! into misses.
//!
//! ```no_run
//! use tiercache::{BytesCodec, Cache, Freshness};
//!
//! # fn main() -> std::io::Result<()> {
//! let cache = Cache::builder(BytesCodec)
//!     .cache_dir("/var/cache/thumbnails")
//!     .in_memory_limit(64 * 1024 * 1024)
//!     .build()?;
//!
//! cache.set("user/42/avatar", Some(b"...".to_vec()));
//! assert!(cache.get(&"user/42/avatar", Freshness::default()).is_some());
//! # Ok(())
//! # }
//! ```

pub mod caching;
pub mod config;
mod utils;

pub use caching::{
    BytesCodec, Cache, CacheBuilder, CacheContents, CacheError, CacheKey, Codec, Freshness,
    JsonCodec, ObjectStore, RemoteConfig, RemoteRecord, Reporter,
};
pub use config::CacheConfig;
