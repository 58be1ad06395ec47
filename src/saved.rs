//! Saved-item ledger.
//!
//! The set of bookmarked item ids lives in a `watch` channel: reads are
//! synchronous from memory and every mutation notifies subscribers at once.
//! The durable copy (`saved/saved_item_ids`, a set of string-encoded ids)
//! is written behind asynchronously and may lag by one write cycle.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::content::{ContentItem, ContentStore};
use crate::error::Result;
use crate::storage::{KeyValueStore, NS_SAVED, WriteBehind, encode_json, get_json};

const KEY_SAVED_ITEM_IDS: &str = "saved_item_ids";

/// Concurrently accessible set of saved item ids.
pub struct SavedItemLedger {
    state: watch::Sender<BTreeSet<u64>>,
    resolved: Mutex<Option<Arc<[ContentItem]>>>,
    writer: WriteBehind,
}

impl SavedItemLedger {
    /// Load the ledger from durable storage.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let ids = read_ids(store.as_ref())?;
        debug!(count = ids.len(), "loaded saved items");
        let (state, _rx) = watch::channel(ids);
        Ok(Self {
            state,
            resolved: Mutex::new(None),
            writer: WriteBehind::new(store, NS_SAVED),
        })
    }

    /// Save the item if absent, remove it if present.
    ///
    /// Returns `true` when the item is saved after the call.
    pub fn toggle(&self, item: &ContentItem) -> bool {
        self.toggle_id(item.id)
    }

    /// [`Self::toggle`] by id.
    pub fn toggle_id(&self, id: u64) -> bool {
        let mut now_saved = false;
        self.state.send_modify(|ids| {
            now_saved = if ids.remove(&id) {
                false
            } else {
                ids.insert(id);
                true
            };
        });
        self.invalidate();
        self.persist();
        now_saved
    }

    /// Add an id. Returns `false` if it was already saved.
    pub fn add(&self, id: u64) -> bool {
        let changed = self.state.send_if_modified(|ids| ids.insert(id));
        if changed {
            self.invalidate();
            self.persist();
        }
        changed
    }

    /// Remove an id. Returns `false` if it was not saved.
    pub fn remove(&self, id: u64) -> bool {
        let changed = self.state.send_if_modified(|ids| ids.remove(&id));
        if changed {
            self.invalidate();
            self.persist();
        }
        changed
    }

    /// Whether an id is saved.
    pub fn contains(&self, id: u64) -> bool {
        self.state.borrow().contains(&id)
    }

    /// Snapshot of saved ids.
    pub fn ids(&self) -> BTreeSet<u64> {
        self.state.borrow().clone()
    }

    /// Number of saved ids.
    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    /// Returns `true` when nothing is saved.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    /// Saved items resolved against the catalog, newest first.
    ///
    /// Ids missing from the catalog are skipped. The list is memoised until
    /// the next mutation or [`Self::clear_cache`].
    pub fn all(&self, content: &ContentStore) -> Arc<[ContentItem]> {
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(items) = resolved.as_ref() {
            return Arc::clone(items);
        }

        let ids = self.ids();
        let mut items: Vec<ContentItem> = ids
            .iter()
            .filter_map(|id| {
                let item = content.get(*id).cloned();
                if item.is_none() {
                    warn!(id, "saved item no longer in catalog");
                }
                item
            })
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let items: Arc<[ContentItem]> = items.into();
        *resolved = Some(Arc::clone(&items));
        items
    }

    /// Drop the memoised item list.
    pub fn clear_cache(&self) {
        self.invalidate();
    }

    /// Change notifications carrying the full id set.
    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<u64>> {
        self.state.subscribe()
    }

    /// Wait for pending durable writes.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    fn invalidate(&self) {
        *self.resolved.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn persist(&self) {
        let rx = self.state.subscribe();
        self.writer.persist(KEY_SAVED_ITEM_IDS, move || {
            let encoded: Vec<String> = rx.borrow().iter().map(u64::to_string).collect();
            encode_json(&encoded)
        });
    }
}

fn read_ids(store: &dyn KeyValueStore) -> Result<BTreeSet<u64>> {
    let raw: Vec<String> = get_json(store, NS_SAVED, KEY_SAVED_ITEM_IDS)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|entry| match entry.trim().parse::<u64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(entry, "ignoring malformed saved item id");
                None
            }
        })
        .collect())
}
