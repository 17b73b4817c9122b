//! # Instance Registry
//!
//! Process-wide map from document key to its live instance.
//!
//! ## Coalesced creation
//! Each key owns a slot holding a once-cell. Callers clone the slot under the
//! map lock and then load through the cell with the lock released, so
//! concurrent first accesses share one load and unrelated keys never wait on
//! each other. A load that completes after its slot was invalidated is thrown
//! away and retried, since it may reflect pre-change data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::OnceCell;

use super::document::{Document, DocumentKey, EntityId};
use super::errors::{SyncError, SyncResult};
use super::instance::{Instance, InstanceConfig};
use crate::observability::{Logger, MetricsRegistry, ObservationScope};
use crate::store::DocumentStore;

/// Attempts before a `get` that keeps racing invalidation gives up
const MAX_GET_ATTEMPTS: usize = 3;

/// Upper bound for the load retry backoff
const MAX_LOAD_BACKOFF: Duration = Duration::from_secs(5);

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub instance: InstanceConfig,
    /// Soft cap on live instances
    pub max_instances: usize,
    /// Retries of a transient store failure while loading
    pub load_retries: u32,
    /// First retry delay; doubles per attempt
    pub load_backoff: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            instance: InstanceConfig::default(),
            max_instances: 10_000,
            load_retries: 3,
            load_backoff: Duration::from_millis(100),
        }
    }
}

/// Aggregate view across live instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub instances: usize,
    pub waiters: usize,
    pub oldest_waiter_ms: Option<u64>,
}

type Slot<D> = Arc<OnceCell<Arc<Instance<D>>>>;

/// Key → instance map with lazy, coalesced loading
pub struct InstanceRegistry<D: Document> {
    slots: Mutex<HashMap<DocumentKey, Slot<D>>>,
    store: Arc<dyn DocumentStore<D>>,
    metrics: Arc<MetricsRegistry>,
    config: RegistryConfig,
}

impl<D: Document> InstanceRegistry<D> {
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn DocumentStore<D>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            store,
            metrics,
            config,
        }
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, HashMap<DocumentKey, Slot<D>>>> {
        self.slots
            .lock()
            .map_err(|_| SyncError::Internal("Lock poisoned".into()))
    }

    /// The live instance for `key`, loading it on first access
    pub async fn get(&self, key: &DocumentKey) -> SyncResult<Arc<Instance<D>>> {
        for _ in 0..MAX_GET_ATTEMPTS {
            let slot = self.slot_for(key)?;
            let instance = match slot.get_or_try_init(|| self.load(key)).await {
                Ok(instance) => Arc::clone(instance),
                Err(err) => {
                    self.remove_slot(key, &slot)?;
                    return Err(err);
                }
            };

            if instance.is_invalidated() {
                self.remove_slot(key, &slot)?;
                continue;
            }
            if !self.is_current(key, &slot)? {
                // Invalidated or evicted while loading.
                instance.retire("superseded_during_load");
                continue;
            }
            return Ok(instance);
        }
        Err(SyncError::Invalidated)
    }

    /// The live instance for `key` without loading
    pub fn peek(&self, key: &DocumentKey) -> Option<Arc<Instance<D>>> {
        let slots = self.slots.lock().ok()?;
        slots
            .get(key)
            .and_then(|slot| slot.get().cloned())
            .filter(|instance| !instance.is_invalidated())
    }

    fn slot_for(&self, key: &DocumentKey) -> SyncResult<Slot<D>> {
        let mut slots = self.lock()?;
        if let Some(slot) = slots.get(key) {
            return Ok(Arc::clone(slot));
        }
        if slots.len() >= self.config.max_instances {
            self.evict_least_active(&mut slots);
        }
        let slot: Slot<D> = Arc::new(OnceCell::new());
        slots.insert(key.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    fn is_current(&self, key: &DocumentKey, slot: &Slot<D>) -> SyncResult<bool> {
        let slots = self.lock()?;
        Ok(slots.get(key).map_or(false, |s| Arc::ptr_eq(s, slot)))
    }

    fn remove_slot(&self, key: &DocumentKey, slot: &Slot<D>) -> SyncResult<()> {
        let mut slots = self.lock()?;
        if slots.get(key).map_or(false, |s| Arc::ptr_eq(s, slot)) {
            slots.remove(key);
        }
        Ok(())
    }

    /// Make room by evicting the longest-idle instance without waiters
    fn evict_least_active(&self, slots: &mut HashMap<DocumentKey, Slot<D>>) {
        let victim = slots
            .iter()
            .filter_map(|(key, slot)| {
                let instance = slot.get()?;
                instance.idle_for().map(|idle| (key.clone(), idle))
            })
            .max_by_key(|(_, idle)| *idle)
            .map(|(key, _)| key);

        match victim {
            Some(key) => {
                if let Some(instance) = slots.remove(&key).and_then(|s| s.get().cloned()) {
                    instance.retire("capacity");
                }
                self.metrics.add_instances_evicted(1);
                Logger::info(
                    "INSTANCE_EVICTED",
                    &[("document", &key.to_string()), ("reason", "capacity")],
                );
            }
            None => Logger::warn(
                "REGISTRY_OVER_CAPACITY",
                &[
                    ("instances", &slots.len().to_string()),
                    ("max_instances", &self.config.max_instances.to_string()),
                ],
            ),
        }
    }

    async fn load(&self, key: &DocumentKey) -> SyncResult<Arc<Instance<D>>> {
        let document = key.to_string();
        let scope = ObservationScope::with_fields("INSTANCE_LOAD", &[("document", &document)]);
        let mut attempt = 0;
        let mut backoff = self.config.load_backoff;

        loop {
            match self.store.load(key).await {
                Ok(loaded) => {
                    let version = loaded.version;
                    let instance = Arc::new(Instance::new(
                        key.clone(),
                        loaded,
                        &self.config.instance,
                        Arc::clone(&self.store),
                        Arc::clone(&self.metrics),
                    ));
                    self.metrics.increment_instances_loaded();
                    scope.complete_with_fields(&[("version", &version.to_string())]);
                    return Ok(instance);
                }
                Err(err) if err.is_transient() && attempt < self.config.load_retries => {
                    attempt += 1;
                    Logger::warn(
                        "INSTANCE_LOAD_RETRY",
                        &[
                            ("attempt", &attempt.to_string()),
                            ("document", &document),
                            ("reason", &err.to_string()),
                        ],
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_LOAD_BACKOFF);
                }
                Err(err) => {
                    scope.fail(&err.to_string());
                    return Err(err.into());
                }
            }
        }
    }

    /// Retire the instance for `key`; the next `get` loads a fresh one
    pub fn invalidate(&self, key: &DocumentKey) -> bool {
        let slot = match self.slots.lock() {
            Ok(mut slots) => slots.remove(key),
            Err(_) => return false,
        };
        match slot.and_then(|s| s.get().cloned()) {
            Some(instance) => instance.invalidate(),
            None => false,
        }
    }

    /// Retire every instance affected by a change to `entity_id`
    ///
    /// A document is affected if it is the entity or embeds it. With a tenant
    /// given, only that tenant's documents are considered.
    pub fn invalidate_entity(&self, entity_id: &EntityId, tenant: Option<&str>) -> Vec<DocumentKey> {
        let candidates: Vec<(DocumentKey, Slot<D>)> = match self.slots.lock() {
            Ok(slots) => slots
                .iter()
                .filter(|(key, _)| tenant.map_or(true, |t| key.tenant == t))
                .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
                .collect(),
            Err(_) => return Vec::new(),
        };

        // Content is inspected without the map lock held.
        let affected: Vec<(DocumentKey, Slot<D>)> = candidates
            .into_iter()
            .filter(|(key, slot)| match slot.get() {
                Some(instance) => instance.embeds(entity_id),
                None => key.document_id == *entity_id,
            })
            .collect();
        if affected.is_empty() {
            return Vec::new();
        }

        let removed: Vec<(DocumentKey, Slot<D>)> = match self.slots.lock() {
            Ok(mut slots) => affected
                .into_iter()
                .filter(|(key, slot)| {
                    let current = slots.get(key).map_or(false, |s| Arc::ptr_eq(s, slot));
                    if current {
                        slots.remove(key);
                    }
                    current
                })
                .collect(),
            Err(_) => return Vec::new(),
        };

        removed
            .into_iter()
            .map(|(key, slot)| {
                if let Some(instance) = slot.get() {
                    instance.invalidate();
                }
                key
            })
            .collect()
    }

    /// Evict instances idle for at least `max_idle` with no parked waiters
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted: Vec<Arc<Instance<D>>> = match self.slots.lock() {
            Ok(mut slots) => {
                let keys: Vec<DocumentKey> = slots
                    .iter()
                    .filter(|(_, slot)| {
                        slot.get()
                            .and_then(|instance| instance.idle_for())
                            .map_or(false, |idle| idle >= max_idle)
                    })
                    .map(|(key, _)| key.clone())
                    .collect();
                keys.iter()
                    .filter_map(|key| slots.remove(key))
                    .filter_map(|slot| slot.get().cloned())
                    .collect()
            }
            Err(_) => return 0,
        };

        for instance in &evicted {
            instance.retire("idle");
        }
        self.metrics.add_instances_evicted(evicted.len() as u64);
        evicted.len()
    }

    /// Drop stale positions across all live instances
    pub fn prune_positions(&self, max_age: chrono::Duration) -> usize {
        self.live_instances()
            .iter()
            .map(|instance| instance.prune_positions(max_age))
            .sum()
    }

    /// Retire everything (shutdown); parked waiters resolve as invalidated
    pub fn drain(&self) -> usize {
        let slots: Vec<Slot<D>> = match self.slots.lock() {
            Ok(mut slots) => slots.drain().map(|(_, slot)| slot).collect(),
            Err(_) => return 0,
        };
        slots
            .iter()
            .filter_map(|slot| slot.get())
            .filter(|instance| instance.retire("shutdown"))
            .count()
    }

    fn live_instances(&self) -> Vec<Arc<Instance<D>>> {
        self.slots
            .lock()
            .map(|slots| slots.values().filter_map(|s| s.get().cloned()).collect())
            .unwrap_or_default()
    }

    /// Keys with a loaded instance
    pub fn keys(&self) -> Vec<DocumentKey> {
        let mut keys: Vec<DocumentKey> = self
            .live_instances()
            .iter()
            .map(|instance| instance.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of loaded instances
    pub fn len(&self) -> usize {
        self.live_instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let per_instance: Vec<_> = self
            .live_instances()
            .iter()
            .filter_map(|instance| instance.stats().ok())
            .collect();
        RegistryStats {
            instances: per_instance.len(),
            waiters: per_instance.iter().map(|s| s.waiters).sum(),
            oldest_waiter_ms: per_instance.iter().filter_map(|s| s.oldest_waiter_ms).max(),
        }
    }
}
