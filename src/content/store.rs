//! In-memory content store with weighted random selection.
//!
//! Candidates match when their tier is in the requested tier set AND their
//! topic is in the requested topic set. Per-`(tier, sorted topics)` index
//! lists are cached; the catalog never changes at runtime so entries stay
//! valid until [`ContentStore::clear_cache`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use tracing::debug;

use super::catalog::{BUNDLED_CATALOG, load_catalog_file, normalize_catalog, parse_catalog};
use super::item::{ContentItem, Tier};
use crate::criteria::UserCriteria;
use crate::error::Result;

/// Selection weight of primary-tier items when several tiers are selected.
pub const PRIMARY_TIER_WEIGHT: f64 = 1.5;

/// Selection weight of every other item.
pub const SECONDARY_TIER_WEIGHT: f64 = 1.0;

type CacheKey = (Tier, Vec<String>);

/// Static catalog plus a candidate cache.
pub struct ContentStore {
    items: Vec<ContentItem>,
    by_id: HashMap<u64, usize>,
    cache: Mutex<HashMap<CacheKey, Arc<[usize]>>>,
}

impl ContentStore {
    /// Build a store from raw items (normalized and validated here).
    pub fn new(items: Vec<ContentItem>) -> Result<Self> {
        let items = normalize_catalog(items)?;
        let by_id = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.id, idx))
            .collect();
        Ok(Self {
            items,
            by_id,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Build a store from a JSON catalog string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(parse_catalog(json)?)
    }

    /// Build a store from a JSON catalog file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::new(load_catalog_file(path)?)
    }

    /// Build a store from the catalog compiled into the binary.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_CATALOG)
    }

    /// Number of catalog items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` for an empty catalog.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All catalog items in load order.
    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    /// Look an item up by id.
    pub fn get(&self, id: u64) -> Option<&ContentItem> {
        self.by_id.get(&id).and_then(|idx| self.items.get(*idx))
    }

    /// Distinct topics present in the catalog.
    pub fn topics(&self) -> BTreeSet<String> {
        self.items.iter().map(|i| i.topic.clone()).collect()
    }

    /// Items matching `tiers` × `topics`, in catalog order.
    pub fn candidates(&self, tiers: &BTreeSet<Tier>, topics: &BTreeSet<String>) -> Vec<&ContentItem> {
        let mut indexes: Vec<usize> = tiers
            .iter()
            .flat_map(|tier| self.indexes_for(*tier, topics).to_vec())
            .collect();
        indexes.sort_unstable();
        indexes.iter().filter_map(|idx| self.items.get(*idx)).collect()
    }

    /// Uniform random pick among items matching `tiers` × `topics`.
    ///
    /// `None` when nothing matches; callers treat that as a soft skip.
    pub fn select_item(&self, tiers: &BTreeSet<Tier>, topics: &BTreeSet<String>) -> Option<ContentItem> {
        self.select_item_with_rng(tiers, topics, &mut rand::thread_rng())
    }

    /// [`Self::select_item`] with a caller-supplied RNG.
    pub fn select_item_with_rng<R: Rng + ?Sized>(
        &self,
        tiers: &BTreeSet<Tier>,
        topics: &BTreeSet<String>,
        rng: &mut R,
    ) -> Option<ContentItem> {
        self.candidates(tiers, topics).choose(rng).map(|item| (*item).clone())
    }

    /// Weighted pick for a full set of user criteria.
    ///
    /// Primary-tier items weigh [`PRIMARY_TIER_WEIGHT`] when more than one
    /// tier is selected; otherwise every item weighs the same.
    pub fn select_for_criteria(&self, criteria: &UserCriteria) -> Option<ContentItem> {
        self.select_for_criteria_with_rng(criteria, &mut rand::thread_rng())
    }

    /// [`Self::select_for_criteria`] with a caller-supplied RNG.
    pub fn select_for_criteria_with_rng<R: Rng + ?Sized>(
        &self,
        criteria: &UserCriteria,
        rng: &mut R,
    ) -> Option<ContentItem> {
        let pool = self.candidates(&criteria.selected_tiers, &criteria.selected_topics);
        if pool.is_empty() {
            debug!(
                tiers = ?criteria.selected_tiers,
                topics = ?criteria.selected_topics,
                "no content matches criteria"
            );
            return None;
        }

        let weighted = criteria.selected_tiers.len() > 1;
        let weights = pool.iter().map(|item| {
            if weighted && item.tier == criteria.primary_tier {
                PRIMARY_TIER_WEIGHT
            } else {
                SECONDARY_TIER_WEIGHT
            }
        });
        // Weights are positive and the pool is non-empty, so this only fails
        // on a broken invariant; fall back to a uniform pick.
        match WeightedIndex::new(weights) {
            Ok(dist) => pool.get(dist.sample(rng)).map(|item| (*item).clone()),
            Err(_) => pool.choose(rng).map(|item| (*item).clone()),
        }
    }

    /// Drop every cached candidate list.
    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    /// Number of cached `(tier, topics)` entries.
    pub fn cached_entries(&self) -> usize {
        self.lock_cache().len()
    }

    fn indexes_for(&self, tier: Tier, topics: &BTreeSet<String>) -> Arc<[usize]> {
        let key: CacheKey = (tier, topics.iter().cloned().collect());
        let mut cache = self.lock_cache();
        if let Some(hit) = cache.get(&key) {
            return Arc::clone(hit);
        }
        let indexes: Arc<[usize]> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.tier == tier && topics.contains(&item.topic))
            .map(|(idx, _)| idx)
            .collect();
        cache.insert(key, Arc::clone(&indexes));
        indexes
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<[usize]>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
