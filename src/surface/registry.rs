//! Surface registry with durable per-surface cadence and timestamps.
//!
//! Persisted layout (namespace `surfaces`): `items_per_day_<key>` and
//! `last_update_<key>`. Timestamps survive restarts so a relaunch does not
//! trigger a burst of updates on every surface.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::{Arc, RwLock};

use tokio::sync::{MutexGuard, broadcast};
use tracing::{debug, info};

use super::{SurfaceConfig, SurfaceKey};
use crate::error::{PhrasecastError, Result};
use crate::interval::{IntervalCalculator, clamp_items_per_day};
use crate::storage::{KeyValueStore, NS_SURFACES, WriteBehind, encode_json, get_json};

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Configuration change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceChange {
    /// A surface was added to the registry.
    Registered(SurfaceKey),
    /// A surface's cadence changed.
    ItemsPerDay {
        key: SurfaceKey,
        items_per_day: u32,
    },
}

/// All known surfaces.
pub struct SurfaceRegistry {
    surfaces: Arc<RwLock<BTreeMap<SurfaceKey, SurfaceConfig>>>,
    calculator: IntervalCalculator,
    writer: WriteBehind,
    changes: broadcast::Sender<SurfaceChange>,
}

impl SurfaceRegistry {
    /// Create an empty registry over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, calculator: IntervalCalculator) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            surfaces: Arc::new(RwLock::new(BTreeMap::new())),
            calculator,
            writer: WriteBehind::new(store, NS_SURFACES),
            changes,
        }
    }

    /// Create a registry and register each `(key, default items_per_day)`.
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        calculator: IntervalCalculator,
        defaults: &[(SurfaceKey, i64)],
    ) -> Result<Self> {
        let registry = Self::new(store, calculator);
        for (key, items_per_day) in defaults {
            registry.register(key.clone(), *items_per_day)?;
        }
        Ok(registry)
    }

    /// Add a surface. Persisted cadence and timestamp take precedence over
    /// `default_items_per_day`. Re-registering returns the existing config.
    pub fn register(&self, key: SurfaceKey, default_items_per_day: i64) -> Result<SurfaceConfig> {
        let config = {
            let mut surfaces = self.write();
            let entry = match surfaces.entry(key.clone()) {
                Entry::Occupied(existing) => return Ok(existing.get().clone()),
                Entry::Vacant(entry) => entry,
            };

            let store = self.writer.store();
            let items_per_day: i64 = get_json(store, NS_SURFACES, &items_per_day_key(&key))?
                .unwrap_or(default_items_per_day);
            let last_update: u64 =
                get_json(store, NS_SURFACES, &last_update_key(&key))?.unwrap_or(0);

            let mut config = SurfaceConfig::new(key.clone(), items_per_day);
            config.last_update = last_update;
            entry.insert(config).clone()
        };
        debug!(
            surface = %key,
            items_per_day = config.items_per_day,
            last_update = config.last_update,
            "surface registered"
        );
        let _ = self.changes.send(SurfaceChange::Registered(key));
        Ok(config)
    }

    /// Current configuration of a surface.
    pub fn config_for(&self, key: &SurfaceKey) -> Result<SurfaceConfig> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| PhrasecastError::UnknownSurface(key.clone()))
    }

    /// All surface configurations ordered by key.
    pub fn configs(&self) -> Vec<SurfaceConfig> {
        self.read().values().cloned().collect()
    }

    /// All surface keys ordered by key.
    pub fn keys(&self) -> Vec<SurfaceKey> {
        self.read().keys().cloned().collect()
    }

    /// Number of registered surfaces.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when no surface is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Change a surface's cadence (clamped to `[1, 10]`) and notify listeners.
    pub fn set_items_per_day(&self, key: &SurfaceKey, items_per_day: i64) -> Result<SurfaceConfig> {
        let clamped = clamp_items_per_day(items_per_day);
        let config = {
            let mut surfaces = self.write();
            let config = surfaces
                .get_mut(key)
                .ok_or_else(|| PhrasecastError::UnknownSurface(key.clone()))?;
            config.items_per_day = clamped;
            config.clone()
        };

        let surfaces = Arc::clone(&self.surfaces);
        let snapshot_key = key.clone();
        self.writer.persist(items_per_day_key(key), move || {
            let surfaces = surfaces.read().unwrap_or_else(|e| e.into_inner());
            let value = surfaces.get(&snapshot_key).map_or(clamped, |c| c.items_per_day);
            encode_json(&value)
        });

        info!(surface = %key, items_per_day = clamped, "surface cadence changed");
        let _ = self.changes.send(SurfaceChange::ItemsPerDay {
            key: key.clone(),
            items_per_day: clamped,
        });
        Ok(config)
    }

    /// Record a successful update at `timestamp_ms`.
    pub fn record_update(&self, key: &SurfaceKey, timestamp_ms: u64) -> Result<()> {
        {
            let mut surfaces = self.write();
            let config = surfaces
                .get_mut(key)
                .ok_or_else(|| PhrasecastError::UnknownSurface(key.clone()))?;
            config.last_update = timestamp_ms;
        }

        let surfaces = Arc::clone(&self.surfaces);
        let snapshot_key = key.clone();
        self.writer.persist(last_update_key(key), move || {
            let surfaces = surfaces.read().unwrap_or_else(|e| e.into_inner());
            let value = surfaces.get(&snapshot_key).map_or(timestamp_ms, |c| c.last_update);
            encode_json(&value)
        });
        Ok(())
    }

    /// Whether `key` should be refreshed at `now_ms`.
    pub fn is_due(&self, key: &SurfaceKey, now_ms: u64) -> Result<bool> {
        Ok(self.config_for(key)?.is_due(&self.calculator, now_ms))
    }

    /// Earliest epoch millisecond at which `key` is due (0 = immediately).
    pub fn next_due_at(&self, key: &SurfaceKey) -> Result<u64> {
        Ok(self.config_for(key)?.next_due_at(&self.calculator))
    }

    /// Minutes between updates for `key`.
    pub fn interval_for(&self, key: &SurfaceKey) -> Result<u32> {
        let config = self.config_for(key)?;
        Ok(self
            .calculator
            .minutes_between_updates(i64::from(config.items_per_day)))
    }

    /// Minimum interval across all surfaces, `None` with no surfaces.
    pub fn shared_interval_minutes(&self) -> Option<u32> {
        self.read()
            .values()
            .map(|c| {
                self.calculator
                    .minutes_between_updates(i64::from(c.items_per_day))
            })
            .min()
            .map(|minutes| minutes.max(self.calculator.floor_minutes()))
    }

    /// The calculator used for due checks.
    pub fn calculator(&self) -> &IntervalCalculator {
        &self.calculator
    }

    /// Configuration change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceChange> {
        self.changes.subscribe()
    }

    /// Wait for pending durable writes; reports the first failure.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    /// The registry's write mutex.
    pub async fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.write_lock().await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<SurfaceKey, SurfaceConfig>> {
        self.surfaces.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<SurfaceKey, SurfaceConfig>> {
        self.surfaces.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn items_per_day_key(key: &SurfaceKey) -> String {
    format!("items_per_day_{key}")
}

fn last_update_key(key: &SurfaceKey) -> String {
    format!("last_update_{key}")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::interval::minutes_between_updates;
    use crate::storage::{MemoryStore, put_json};

    fn defaults() -> Vec<(SurfaceKey, i64)> {
        vec![
            (SurfaceKey::main(), 1),
            (SurfaceKey::list(), 4),
            (SurfaceKey::hero(), 10),
        ]
    }

    fn registry(store: Arc<dyn KeyValueStore>) -> SurfaceRegistry {
        SurfaceRegistry::load(store, IntervalCalculator::default(), &defaults()).unwrap()
    }

    #[test]
    fn shared_interval_is_the_most_frequent_surface() {
        let registry = registry(Arc::new(MemoryStore::new()));
        assert_eq!(
            registry.shared_interval_minutes(),
            Some(minutes_between_updates(10))
        );
    }

    #[test]
    fn empty_registry_has_no_shared_interval() {
        let registry = SurfaceRegistry::new(Arc::new(MemoryStore::new()), IntervalCalculator::default());
        assert!(registry.is_empty());
        assert_eq!(registry.shared_interval_minutes(), None);
    }

    #[test]
    fn unknown_surface_is_reported() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let err = registry.config_for(&SurfaceKey::new("lockscreen")).unwrap_err();
        assert!(matches!(err, PhrasecastError::UnknownSurface(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn record_update_controls_due_state() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let key = SurfaceKey::list();
        assert!(registry.is_due(&key, 1_000).unwrap());

        registry.record_update(&key, 1_000).unwrap();
        let interval_ms = u64::from(registry.interval_for(&key).unwrap()) * 60_000;
        assert!(!registry.is_due(&key, 1_000 + interval_ms - 1).unwrap());
        assert!(registry.is_due(&key, 1_000 + interval_ms).unwrap());
        assert_eq!(registry.next_due_at(&key).unwrap(), 1_000 + interval_ms);
    }

    #[test]
    fn set_items_per_day_clamps_and_notifies() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let mut changes = registry.subscribe();

        let config = registry.set_items_per_day(&SurfaceKey::main(), 99).unwrap();
        assert_eq!(config.items_per_day, 10);
        assert_eq!(
            changes.try_recv().unwrap(),
            SurfaceChange::ItemsPerDay {
                key: SurfaceKey::main(),
                items_per_day: 10
            }
        );
    }

    #[test]
    fn persisted_values_override_defaults() {
        let store = Arc::new(MemoryStore::new());
        put_json(store.as_ref(), NS_SURFACES, "items_per_day_main", &6_i64).unwrap();
        put_json(store.as_ref(), NS_SURFACES, "last_update_main", &42_u64).unwrap();

        let registry = registry(store);
        let main = registry.config_for(&SurfaceKey::main()).unwrap();
        assert_eq!(main.items_per_day, 6);
        assert_eq!(main.last_update, 42);
    }

    #[tokio::test]
    async fn timestamps_survive_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = registry(Arc::clone(&store));
        first.record_update(&SurfaceKey::hero(), 7_000).unwrap();
        first.set_items_per_day(&SurfaceKey::hero(), 3).unwrap();
        first.flush().await.unwrap();

        let second = registry(store);
        let hero = second.config_for(&SurfaceKey::hero()).unwrap();
        assert_eq!(hero.last_update, 7_000);
        assert_eq!(hero.items_per_day, 3);
        assert!(!second.is_due(&SurfaceKey::hero(), 7_001).unwrap());
    }

    #[test]
    fn register_is_idempotent() {
        let registry = registry(Arc::new(MemoryStore::new()));
        registry.set_items_per_day(&SurfaceKey::list(), 2).unwrap();
        let again = registry.register(SurfaceKey::list(), 9).unwrap();
        assert_eq!(again.items_per_day, 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn concurrent_registration_announces_a_key_once() {
        for _ in 0..50 {
            let registry =
                SurfaceRegistry::new(Arc::new(MemoryStore::new()), IntervalCalculator::default());
            let mut changes = registry.subscribe();

            let configs: Vec<SurfaceConfig> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..4_i64)
                    .map(|n| {
                        let registry = &registry;
                        scope.spawn(move || registry.register(SurfaceKey::new("widget"), n + 1))
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|w| w.join().unwrap().unwrap())
                    .collect()
            });

            assert!(configs.windows(2).all(|w| w[0] == w[1]));
            assert_eq!(
                changes.try_recv().unwrap(),
                SurfaceChange::Registered(SurfaceKey::new("widget"))
            );
            assert!(changes.try_recv().is_err());
        }
    }
}
