//! In-flight request deduplication.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use storage_gateway_sdk::StorageError;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, StorageError>>>;

struct InFlight<T> {
    id: u64,
    outcome: SharedOutcome<T>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// Removes the in-flight entry when the producer task finishes, panics or
/// is aborted, unless the entry has since been replaced.
struct Settle<T> {
    map: InFlightMap<T>,
    key: String,
    id: u64,
}

impl<T> Drop for Settle<T> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        if map.get(&self.key).is_some_and(|e| e.id == self.id) {
            map.remove(&self.key);
        }
    }
}

/// Merges concurrent requests for the same key into one producer run.
///
/// The producer runs on its own task, so a waiter that stops polling does
/// not cancel it for the others. The entry leaves the map before any waiter
/// observes the outcome.
pub struct RequestCoalescer<T> {
    in_flight: InFlightMap<T>,
    next_id: AtomicU64,
}

impl<T> Default for RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Join the in-flight request for `key`, or start one with `producer`.
    ///
    /// # Errors
    /// Whatever the shared producer returned; `StorageError::Internal` if it
    /// panicked.
    pub async fn coalesce<F, Fut>(&self, key: &str, producer: F) -> Result<T, StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        let outcome = {
            let mut map = self.in_flight.lock();
            if let Some(existing) = map.get(key) {
                tracing::trace!(key, "joining in-flight request");
                existing.outcome.clone()
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let settle = Settle {
                    map: Arc::clone(&self.in_flight),
                    key: key.to_owned(),
                    id,
                };
                let work = producer();
                let task = tokio::spawn(async move {
                    let result = work.await;
                    drop(settle);
                    result
                });
                let outcome = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(StorageError::internal(format!(
                            "coalesced request did not complete: {e}"
                        ))),
                    }
                }
                .boxed()
                .shared();
                map.insert(
                    key.to_owned(),
                    InFlight {
                        id,
                        outcome: outcome.clone(),
                    },
                );
                outcome
            }
        };
        outcome.await
    }

    /// Detach `key`; the next request for it starts a fresh producer.
    pub fn forget(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }

    /// Detach `prefix` and every key below it.
    pub fn forget_subtree(&self, prefix: &str) {
        self.in_flight
            .lock()
            .retain(|key, _| !super::cache::is_within(key, prefix));
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}
