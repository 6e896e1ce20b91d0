use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::CacheConfig;

use super::fs::DiskTier;
use super::inflight::InflightRegistry;
use super::memory::MemoryTier;
use super::remote::RemoteTier;
use super::{
    safe_file_stem, CacheContents, CacheError, CacheKey, Codec, Freshness, RemoteConfig, Reporter,
};

/// The user-supplied source of last resort for async lookups.
pub(crate) type FetchFn<K, P> =
    Arc<dyn Fn(K) -> BoxFuture<'static, CacheContents<Option<P>>> + Send + Sync>;

/// A typed, multi-tier content cache.
///
/// Composes the in-memory, on-disk, and remote tiers with single-flight
/// coalescing of concurrent misses. Construct one through
/// [`Cache::builder`]; clones share the same underlying cache.
///
/// The cache directory, when configured, is owned exclusively by one
/// `Cache`; pointing concurrent instances at the same directory is
/// undefined. Filenames derive from the key's printable form with `/`
/// replaced by `-` and `:` by `;`; printable keys must stay distinct under
/// that substitution (hash them into the key's printable form if they may
/// not).
pub struct Cache<K: CacheKey, P, C> {
    inner: Arc<CacheInner<K, P, C>>,
}

impl<K: CacheKey, P, C> Clone for Cache<K, P, C> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<K: CacheKey, P, C> {
    codec: C,
    default_max_age: Option<Duration>,
    memory: Mutex<MemoryTier<K, P>>,
    disk: Option<Mutex<DiskTier>>,
    remote: RemoteTier,
    inflight: InflightRegistry<K, P>,
    fetcher: Option<FetchFn<K, P>>,
    reporter: Reporter,
}

impl<K, P, C> Cache<K, P, C>
where
    K: CacheKey,
    P: Clone + Send + Sync + 'static,
    C: Codec<P>,
{
    pub fn builder(codec: C) -> CacheBuilder<K, P, C> {
        CacheBuilder {
            config: CacheConfig::default(),
            codec,
            remote: None,
            fetcher: None,
            _payload: PhantomData,
        }
    }

    /// Looks up a payload in the local tiers.
    ///
    /// Tries memory first, then disk; a disk hit is decoded and promoted
    /// into memory carrying the disk file's original insertion time. Never
    /// consults the remote tier and never fails: defects are reported and
    /// degrade into a miss.
    pub fn get(&self, key: &K, freshness: Freshness) -> Option<P> {
        let freshness = self.effective(freshness);
        if let Some(payload) = self.inner.memory.lock().unwrap().get(key, &freshness) {
            return Some(payload);
        }

        let disk = self.inner.disk.as_ref()?;
        let stem = safe_file_stem(&key.printable());
        let extension = self.inner.codec.extension();
        let looked_up = disk.lock().unwrap().get(&stem, extension, &freshness);
        let (bytes, cached_at) = match looked_up {
            Ok(Some(found)) => found,
            Ok(None) => return None,
            Err(err) => {
                self.inner
                    .reporter
                    .report(&err, &format!("reading cache entry {stem}"));
                return None;
            }
        };

        match self.inner.codec.decode(&bytes) {
            Ok(payload) => {
                let cost = self.inner.codec.cost(&payload, bytes.len());
                self.inner
                    .memory
                    .lock()
                    .unwrap()
                    .put(key.clone(), payload.clone(), cost, cached_at);
                Some(payload)
            }
            Err(err) => {
                self.inner
                    .reporter
                    .report(&err, &format!("decoding cache entry {stem}"));
                None
            }
        }
    }

    /// Stores a payload in all configured tiers, or removes it when `None`.
    ///
    /// The remote write happens on a fire-and-forget background task; this
    /// method never blocks on the network and surfaces no errors.
    pub fn set(&self, key: K, payload: Option<P>) {
        match payload {
            Some(payload) => self.store(key, payload),
            None => self.remove(key),
        }
    }

    fn store(&self, key: K, payload: P) {
        let bytes = match self.inner.codec.encode(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.inner
                    .reporter
                    .report(&err, &format!("encoding payload for {}", key.printable()));
                return;
            }
        };
        let cost = self.inner.codec.cost(&payload, bytes.len());
        self.inner
            .memory
            .lock()
            .unwrap()
            .put(key.clone(), payload, cost, SystemTime::now());
        self.write_disk(&key, &bytes);

        let this = self.clone();
        let printable = key.printable();
        self.spawn_remote(
            async move { this.inner.remote.put(&printable, bytes).await },
            "storing remote record",
        );
    }

    fn remove(&self, key: K) {
        self.inner.memory.lock().unwrap().remove(&key);
        if let Some(disk) = &self.inner.disk {
            let stem = safe_file_stem(&key.printable());
            let removed = disk
                .lock()
                .unwrap()
                .remove(&stem, self.inner.codec.extension());
            if let Err(err) = removed {
                self.inner
                    .reporter
                    .report(&err, &format!("deleting cache entry {stem}"));
            }
        }

        let this = self.clone();
        let printable = key.printable();
        self.spawn_remote(
            async move { this.inner.remote.remove(&printable).await },
            "deleting remote record",
        );
    }

    /// Looks up a payload across all tiers, fetching on a full miss.
    ///
    /// Runs the synchronous path first. On a local miss this joins the
    /// in-flight fetch for the key if one exists, otherwise starts one:
    /// the remote tier is consulted first, then the configured fetch
    /// callback; whatever they produce is persisted into the warmer tiers.
    /// Returns `Ok(None)` immediately when neither a remote tier nor a
    /// fetch callback is configured.
    ///
    /// This is the only surface that returns errors: fetch and remote
    /// transport failures propagate to every awaiter of the flight.
    pub async fn get_async(&self, key: &K, freshness: Freshness) -> CacheContents<Option<P>> {
        if let Some(payload) = self.get(key, freshness) {
            return Ok(Some(payload));
        }
        if !self.inner.remote.is_enabled() && self.inner.fetcher.is_none() {
            return Ok(None);
        }

        let freshness = self.effective(freshness);
        let this = self.clone();
        let task_key = key.clone();
        let fetch = self
            .inner
            .inflight
            .get_or_start(key.clone(), move || this.run_fetch(task_key, freshness));
        fetch.await
    }

    /// The fetch task body: remote tier, then fetch callback.
    async fn run_fetch(self, key: K, freshness: Freshness) -> CacheContents<Option<P>> {
        let printable = key.printable();
        match self.inner.remote.get(&printable, &freshness).await {
            Ok(Some((bytes, modified_at))) => match self.inner.codec.decode(&bytes) {
                Ok(payload) => {
                    let cost = self.inner.codec.cost(&payload, bytes.len());
                    self.inner.memory.lock().unwrap().put(
                        key.clone(),
                        payload.clone(),
                        cost,
                        modified_at,
                    );
                    self.write_disk(&key, &bytes);
                    return Ok(Some(payload));
                }
                // A record we cannot decode is a miss; fall through to the
                // fetch callback.
                Err(err) => self
                    .inner
                    .reporter
                    .report(&err, &format!("decoding remote record for {printable}")),
            },
            Ok(None) => {}
            Err(err) => return Err(err),
        }

        let Some(fetcher) = &self.inner.fetcher else {
            return Ok(None);
        };
        match fetcher(key.clone()).await {
            Ok(Some(payload)) => {
                match self.inner.codec.encode(&payload) {
                    Ok(bytes) => {
                        let cost = self.inner.codec.cost(&payload, bytes.len());
                        self.inner.memory.lock().unwrap().put(
                            key.clone(),
                            payload.clone(),
                            cost,
                            SystemTime::now(),
                        );
                        self.write_disk(&key, &bytes);

                        let this = self.clone();
                        self.spawn_remote(
                            async move { this.inner.remote.put(&printable, bytes).await },
                            "storing remote record",
                        );
                    }
                    // The fetched value is still good; hand it out without
                    // persisting it.
                    Err(err) => self
                        .inner
                        .reporter
                        .report(&err, &format!("encoding fetched payload for {printable}")),
                }
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.inner
                    .reporter
                    .report(&err, &format!("fetching payload for {printable}"));
                Err(err)
            }
        }
    }

    /// Clears the local tiers.
    ///
    /// Clearing memory also cancels every outstanding fetch; their awaiters
    /// observe [`CacheError::Cancelled`].
    pub fn clear(&self, memory: bool, disk: bool) {
        if memory {
            self.inner.inflight.cancel_all();
            self.inner.memory.lock().unwrap().clear();
        }
        if disk {
            if let Some(disk) = &self.inner.disk {
                let cleared = disk.lock().unwrap().clear();
                if let Err(err) = cleared {
                    self.inner.reporter.report(&err, "clearing the disk tier");
                }
            }
        }
    }

    /// Clears the selected tiers, including the remote one.
    ///
    /// Only the remote listing failure propagates; local failures and
    /// per-record remote failures are reported.
    pub async fn clear_async(&self, memory: bool, disk: bool, remote: bool) -> CacheContents<()> {
        self.clear(memory, disk);
        if remote {
            self.inner.remote.clear().await?;
        }
        Ok(())
    }

    /// Total codec-reported cost of the in-memory tier, in bytes.
    pub fn in_memory_cost(&self) -> u64 {
        self.inner.memory.lock().unwrap().total_cost()
    }

    /// Number of entries in the in-memory tier.
    pub fn in_memory_count(&self) -> usize {
        self.inner.memory.lock().unwrap().len()
    }

    /// Total size of the on-disk tier, in bytes. Zero when disabled.
    pub fn on_disk_cost(&self) -> u64 {
        match &self.inner.disk {
            Some(disk) => disk.lock().unwrap().total_cost(),
            None => 0,
        }
    }

    /// Installs the error-reporting hook.
    ///
    /// The hook receives every defect the cache swallows, with a short
    /// context string. It must be non-blocking and must not call back into
    /// this cache. Without a hook, defects are logged.
    pub fn set_error_reporter(&self, reporter: impl Fn(&CacheError, &str) + Send + Sync + 'static) {
        self.inner.reporter.set(Arc::new(reporter));
    }

    #[cfg(test)]
    pub(crate) fn inflight_count(&self) -> usize {
        self.inner.inflight.len()
    }

    /// Applies the configured default max age to unconstrained lookups.
    fn effective(&self, freshness: Freshness) -> Freshness {
        match self.inner.default_max_age {
            Some(max_age) if freshness.is_unconstrained() => Freshness::max_age(max_age),
            _ => freshness,
        }
    }

    fn write_disk(&self, key: &K, bytes: &[u8]) {
        if let Some(disk) = &self.inner.disk {
            let stem = safe_file_stem(&key.printable());
            let written = disk
                .lock()
                .unwrap()
                .put(&stem, self.inner.codec.extension(), bytes);
            if let Err(err) = written {
                self.inner
                    .reporter
                    .report(&err, &format!("writing cache entry {stem}"));
            }
        }
    }

    /// Runs a remote-tier operation on a background task.
    ///
    /// Failures are reported, never propagated; a `set` must not block on
    /// or fail because of the network. Without an ambient runtime the
    /// operation is skipped and reported.
    fn spawn_remote(
        &self,
        operation: impl std::future::Future<Output = CacheContents<()>> + Send + 'static,
        context: &'static str,
    ) {
        if !self.inner.remote.is_enabled() {
            return;
        }
        let reporter = self.inner.reporter.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = operation.await {
                        reporter.report(&err, context);
                    }
                });
            }
            Err(_) => reporter.report(
                &CacheError::Transport("no async runtime to run remote operation on".into()),
                context,
            ),
        }
    }
}

/// Builder for a [`Cache`].
pub struct CacheBuilder<K: CacheKey, P, C> {
    config: CacheConfig,
    codec: C,
    remote: Option<RemoteConfig>,
    fetcher: Option<FetchFn<K, P>>,
    _payload: PhantomData<fn() -> P>,
}

impl<K, P, C> CacheBuilder<K, P, C>
where
    K: CacheKey,
    P: Clone + Send + Sync + 'static,
    C: Codec<P>,
{
    /// Replaces the whole configuration at once.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables the disk tier rooted at `dir`.
    pub fn cache_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    pub fn in_memory_limit(mut self, limit: u64) -> Self {
        self.config.in_memory_limit = limit;
        self
    }

    pub fn on_disk_limit(mut self, limit: u64) -> Self {
        self.config.on_disk_limit = limit;
        self
    }

    /// Applies `max_age` to every lookup made with an unconstrained
    /// [`Freshness`]. Explicit constraints always win.
    pub fn default_max_age(mut self, max_age: Duration) -> Self {
        self.config.default_max_age = Some(max_age);
        self
    }

    /// Enables the remote tier.
    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Installs the fetch callback consulted on a full miss of the async
    /// path.
    pub fn fetcher<F, Fut>(mut self, fetcher: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CacheContents<Option<P>>> + Send + 'static,
    {
        self.fetcher = Some(Arc::new(move |key| fetcher(key).boxed()));
        self
    }

    /// Builds the cache, initializing the disk tier if one is configured.
    pub fn build(self) -> io::Result<Cache<K, P, C>> {
        let reporter = Reporter::default();
        let disk = match self.config.cache_dir {
            Some(dir) => Some(Mutex::new(DiskTier::new(dir, self.config.on_disk_limit)?)),
            None => None,
        };

        Ok(Cache {
            inner: Arc::new(CacheInner {
                codec: self.codec,
                default_max_age: self.config.default_max_age,
                memory: Mutex::new(MemoryTier::new(self.config.in_memory_limit)),
                disk,
                remote: RemoteTier::new(self.remote, reporter.clone()),
                inflight: InflightRegistry::new(),
                fetcher: self.fetcher,
                reporter,
            }),
        })
    }
}
