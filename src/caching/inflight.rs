use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::task::AbortHandle;

use super::{CacheContents, CacheError, CacheKey};

/// A fetch shared between every caller that missed on the same key.
pub(crate) type SharedFetch<P> = Shared<BoxFuture<'static, CacheContents<Option<P>>>>;

struct Inflight<P> {
    future: SharedFetch<P>,
    abort: AbortHandle,
    /// Distinguishes this flight from a successor registered under the same
    /// key after a cancellation, so a late cleanup cannot evict the
    /// successor.
    generation: u64,
}

/// Tracks outstanding fetches and coalesces concurrent misses per key.
///
/// At most one fetch task runs per key. The task is spawned, so it runs to
/// completion even when every awaiter is dropped; its registry entry is
/// removed whether it resolves, panics, or is aborted. All awaiters of one
/// flight observe the same resolved value.
pub(crate) struct InflightRegistry<K, P> {
    flights: Arc<Mutex<HashMap<K, Inflight<P>>>>,
    generation: AtomicU64,
}

impl<K, P> InflightRegistry<K, P>
where
    K: CacheKey,
    P: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        InflightRegistry {
            flights: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the fetch in flight for `key`, starting one via `start` if
    /// there is none.
    pub fn get_or_start<F, Fut>(&self, key: K, start: F) -> SharedFetch<P>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<Option<P>>> + Send + 'static,
    {
        let mut flights = self.flights.lock().unwrap();
        if let Some(flight) = flights.get(&key) {
            return flight.future.clone();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let fetch = start();

        let registry = Arc::clone(&self.flights);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _cleanup = crate::utils::defer(move || {
                let mut flights = registry.lock().unwrap();
                if flights
                    .get(&task_key)
                    .is_some_and(|flight| flight.generation == generation)
                {
                    flights.remove(&task_key);
                }
            });
            fetch.await
        });
        let abort = handle.abort_handle();

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(CacheError::Cancelled),
                Err(err) => Err(CacheError::FetchFailed(err.to_string())),
            }
        }
        .boxed()
        .shared();

        flights.insert(
            key,
            Inflight {
                future: future.clone(),
                abort,
                generation,
            },
        );
        future
    }

    /// Cancels every outstanding fetch and empties the registry.
    ///
    /// Awaiters observe [`CacheError::Cancelled`].
    pub fn cancel_all(&self) {
        let aborts: Vec<_> = {
            let mut flights = self.flights.lock().unwrap();
            flights.drain().map(|(_, flight)| flight.abort).collect()
        };
        for abort in aborts {
            abort.abort();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.flights.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_fetch() {
        let registry = InflightRegistry::<&'static str, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Some(42))
        };

        let first = registry.get_or_start("k", || fetch(calls.clone()));
        let second = registry.get_or_start("k", || fetch(calls.clone()));
        assert_eq!(registry.len(), 1);

        assert_eq!(first.await, Ok(Some(42)));
        assert_eq!(second.await, Ok(Some(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_removed_after_resolution() {
        let registry = InflightRegistry::<&'static str, u32>::new();

        let future = registry.get_or_start("k", || async { Ok(Some(7)) });
        assert_eq!(future.await, Ok(Some(7)));

        // Next lookup for the same key starts a fresh fetch.
        let future = registry.get_or_start("k", || async { Ok(Some(8)) });
        assert_eq!(future.await, Ok(Some(8)));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_entry_removed_after_failure() {
        let registry = InflightRegistry::<&'static str, u32>::new();

        let future =
            registry.get_or_start("k", || async { Err(CacheError::FetchFailed("boom".into())) });
        assert!(future.await.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_aborts_and_clears() {
        let registry = InflightRegistry::<&'static str, u32>::new();

        let slow = registry.get_or_start("slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(1))
        });
        assert_eq!(registry.len(), 1);

        registry.cancel_all();
        assert_eq!(registry.len(), 0);
        assert_eq!(slow.await, Err(CacheError::Cancelled));
    }
}
