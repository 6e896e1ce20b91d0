use std::sync::{Arc, RwLock};

use thiserror::Error;

/// An error that happens while reading from or writing to a cache tier.
///
/// All variants carry owned string details so that results stay cloneable;
/// a single resolved value may be handed to many awaiters of a shared
/// in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The codec could not produce bytes for a value.
    #[error("codec produced no data: {0}")]
    NoData(String),
    /// Stored bytes could not be decoded back into a value.
    #[error("malformed cache entry: {0}")]
    Malformed(String),
    /// A filesystem failure on read, write, enumerate, or delete.
    #[error("io error: {0}")]
    Io(String),
    /// The remote store has no record under the requested id.
    ///
    /// This is a cache miss, not a failure.
    #[error("unknown remote record")]
    UnknownRecord,
    /// The remote store denied the operation.
    ///
    /// On writes this indicates a configuration problem and is swallowed
    /// after reporting, so that a misconfigured remote does not break local
    /// caching.
    #[error("remote permission denied: {0}")]
    PermissionDenied(String),
    /// A network or transport failure talking to the remote store.
    #[error("remote transport failed: {0}")]
    Transport(String),
    /// The user-supplied fetch callback failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),
    /// The in-flight fetch was cancelled by a cache clear.
    #[error("fetch was cancelled")]
    Cancelled,
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// The result of a cache operation.
pub type CacheContents<T = ()> = Result<T, CacheError>;

type ReporterFn = Arc<dyn Fn(&CacheError, &str) + Send + Sync>;

/// Forwards cache defects to an application-installed hook.
///
/// Without a hook, defects are logged through `tracing`. The hook must be
/// non-blocking and must not call back into the cache that reported through
/// it.
#[derive(Clone, Default)]
pub struct Reporter {
    hook: Arc<RwLock<Option<ReporterFn>>>,
}

impl Reporter {
    pub fn set(&self, hook: ReporterFn) {
        *self.hook.write().unwrap() = Some(hook);
    }

    pub fn report(&self, error: &CacheError, context: &str) {
        let hook = self.hook.read().unwrap().clone();
        match hook {
            Some(hook) => hook(error, context),
            None => tracing::error!(
                error = error as &dyn std::error::Error,
                context,
                "cache operation failed",
            ),
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed = self.hook.read().map(|h| h.is_some()).unwrap_or_default();
        f.debug_struct("Reporter").field("hook", &installed).finish()
    }
}
