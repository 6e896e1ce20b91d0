use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::BoxFuture;

use super::{CacheContents, CacheError, Freshness, Reporter};

/// A record in the remote store.
///
/// Exactly one of `inline` and `asset` carries the payload: encoded payloads
/// strictly smaller than the configured asset limit travel inline, larger
/// ones as an asset blob the store resolves itself. `modified_at` is
/// server-assigned on upsert; the value a client sends is advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub id: String,
    pub inline: Option<Vec<u8>>,
    pub asset: Option<Vec<u8>>,
    pub modified_at: SystemTime,
}

impl RemoteRecord {
    pub fn inline(id: String, bytes: Vec<u8>) -> Self {
        RemoteRecord {
            id,
            inline: Some(bytes),
            asset: None,
            modified_at: SystemTime::now(),
        }
    }

    pub fn asset(id: String, bytes: Vec<u8>) -> Self {
        RemoteRecord {
            id,
            inline: None,
            asset: Some(bytes),
            modified_at: SystemTime::now(),
        }
    }

    /// The payload bytes, from whichever field is populated.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.inline.or(self.asset)
    }
}

/// Abstract remote record store.
///
/// Implementations map these operations onto whatever transport backs the
/// shared store. Absent records surface as [`CacheError::UnknownRecord`],
/// denied operations as [`CacheError::PermissionDenied`], and everything
/// else transport-shaped as [`CacheError::Transport`].
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetches the record stored under `id`.
    fn fetch<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CacheContents<RemoteRecord>>;

    /// Creates or overwrites a record.
    fn upsert(&self, record: RemoteRecord) -> BoxFuture<'_, CacheContents<()>>;

    /// Deletes the record stored under `id`.
    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CacheContents<()>>;

    /// Lists the ids of all records of the given record type.
    fn list<'a>(&'a self, record_type: &'a str) -> BoxFuture<'a, CacheContents<Vec<String>>>;
}

/// Configuration of the remote tier.
#[derive(Clone)]
pub struct RemoteConfig {
    /// The store backing the tier.
    pub store: Arc<dyn ObjectStore>,
    /// Namespaces this cache's records within the store; also the prefix of
    /// every record id.
    pub record_type: String,
    /// Encoded payloads of this size and above are stored as an asset blob
    /// instead of inline bytes.
    pub asset_limit: u64,
}

impl RemoteConfig {
    fn record_id(&self, printable_key: &str) -> String {
        format!("{}:{}", self.record_type, printable_key)
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("record_type", &self.record_type)
            .field("asset_limit", &self.asset_limit)
            .finish()
    }
}

/// The cold tier: best-effort shared storage across a user's devices.
///
/// All operations are no-op misses when no [`RemoteConfig`] is present.
#[derive(Debug)]
pub(crate) struct RemoteTier {
    config: Option<RemoteConfig>,
    reporter: Reporter,
}

impl RemoteTier {
    pub fn new(config: Option<RemoteConfig>, reporter: Reporter) -> Self {
        RemoteTier { config, reporter }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Fetches the payload bytes for a key, along with the record's
    /// server-assigned modification time.
    ///
    /// Absent and stale records are misses. Transport failures and payload-
    /// less records are reported and returned as errors.
    pub async fn get(
        &self,
        printable_key: &str,
        freshness: &Freshness,
    ) -> CacheContents<Option<(Vec<u8>, SystemTime)>> {
        let Some(config) = &self.config else {
            return Ok(None);
        };
        let id = config.record_id(printable_key);
        let record = match config.store.fetch(&id).await {
            Ok(record) => record,
            Err(CacheError::UnknownRecord) => return Ok(None),
            Err(err) => {
                self.reporter
                    .report(&err, &format!("fetching remote record {id}"));
                return Err(err);
            }
        };
        if !freshness.passes(record.modified_at) {
            return Ok(None);
        }
        let modified_at = record.modified_at;
        match record.into_payload() {
            Some(bytes) => Ok(Some((bytes, modified_at))),
            None => {
                let err = CacheError::Malformed("remote record carries no payload".into());
                self.reporter
                    .report(&err, &format!("reading remote record {id}"));
                Err(err)
            }
        }
    }

    /// Upserts the encoded payload for a key.
    ///
    /// Permission failures indicate a configuration problem, not a runtime
    /// fault; they are reported and swallowed so local caching keeps
    /// working.
    pub async fn put(&self, printable_key: &str, bytes: Vec<u8>) -> CacheContents<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        let id = config.record_id(printable_key);
        let record = if bytes.len() as u64 >= config.asset_limit {
            RemoteRecord::asset(id.clone(), bytes)
        } else {
            RemoteRecord::inline(id.clone(), bytes)
        };
        match config.store.upsert(record).await {
            Ok(()) => Ok(()),
            Err(err @ CacheError::PermissionDenied(_)) => {
                self.reporter
                    .report(&err, &format!("storing remote record {id}"));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Deletes the record for a key; already-absent records are fine.
    pub async fn remove(&self, printable_key: &str) -> CacheContents<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        match config.store.delete(&config.record_id(printable_key)).await {
            Ok(()) | Err(CacheError::UnknownRecord) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Deletes every record of this cache's record type.
    ///
    /// Per-record failures are reported and skipped; only the listing
    /// failure propagates.
    pub async fn clear(&self) -> CacheContents<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };
        let ids = config.store.list(&config.record_type).await?;
        for id in ids {
            match config.store.delete(&id).await {
                Ok(()) | Err(CacheError::UnknownRecord) => {}
                Err(err) => self
                    .reporter
                    .report(&err, &format!("deleting remote record {id}")),
            }
        }
        Ok(())
    }
}
