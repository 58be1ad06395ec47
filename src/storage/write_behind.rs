//! Asynchronous write-through to a [`KeyValueStore`].
//!
//! In-memory state is updated synchronously by its owner; the durable copy
//! follows through [`WriteBehind::persist`]. Each write takes the store's
//! single write mutex and only then snapshots the value to write, so the
//! durable value always converges on the latest in-memory value no matter
//! in which order the queued writes start.

use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::KeyValueStore;
use crate::error::{PhrasecastError, Result};

/// Fire-and-forget persister for one logical store (namespace).
pub struct WriteBehind {
    store: Arc<dyn KeyValueStore>,
    namespace: &'static str,
    write_lock: Arc<AsyncMutex<()>>,
    tracker: TaskTracker,
    last_error: Arc<Mutex<Option<String>>>,
}

impl WriteBehind {
    /// Create a persister writing into `namespace`.
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &'static str) -> Self {
        Self {
            store,
            namespace,
            write_lock: Arc::new(AsyncMutex::new(())),
            tracker: TaskTracker::new(),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Underlying store, for synchronous reads at load time.
    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Namespace this persister writes into.
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Queue a write of `key`.
    ///
    /// `encode` runs under the write mutex and must snapshot the current
    /// in-memory value. Outside a tokio runtime the write happens inline.
    pub fn persist<F>(&self, key: impl Into<String>, encode: F)
    where
        F: FnOnce() -> Result<Vec<u8>> + Send + 'static,
    {
        let key = key.into();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            let _guard = self.write_lock.blocking_lock();
            let outcome = encode().and_then(|bytes| self.store.put(self.namespace, &key, &bytes));
            record_outcome(&self.last_error, self.namespace, &key, outcome);
            return;
        };

        let store = Arc::clone(&self.store);
        let write_lock = Arc::clone(&self.write_lock);
        let last_error = Arc::clone(&self.last_error);
        let namespace = self.namespace;

        handle.spawn(self.tracker.track_future(async move {
            let _guard = write_lock.lock().await;
            let outcome = match encode() {
                Ok(bytes) => {
                    let key = key.clone();
                    tokio::task::spawn_blocking(move || store.put(namespace, &key, &bytes))
                        .await
                        .unwrap_or_else(|e| {
                            Err(PhrasecastError::Storage(format!("write task failed: {e}")))
                        })
                }
                Err(e) => Err(e),
            };
            record_outcome(&last_error, namespace, &key, outcome);
        }));
    }

    /// Wait for every queued write, then report the first failure since the
    /// previous flush.
    pub async fn flush(&self) -> Result<()> {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();

        let failure = self
            .last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match failure {
            Some(msg) => Err(PhrasecastError::Storage(msg)),
            None => Ok(()),
        }
    }

    /// Acquire the store's write mutex.
    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }
}

fn record_outcome(
    last_error: &Mutex<Option<String>>,
    namespace: &str,
    key: &str,
    outcome: Result<()>,
) {
    match outcome {
        Ok(()) => debug!(namespace, key, "persisted"),
        Err(e) => {
            warn!(namespace, key, error = %e, "durable write failed");
            let mut slot = last_error.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(format!("write {namespace}/{key} failed: {e}"));
            }
        }
    }
}
